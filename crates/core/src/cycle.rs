use crate::fix::FixId;
use crate::issue::IssueId;
use crate::DomainError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

pub type CycleId = Uuid;

/// Pipeline stage a remediation attempt has traversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CycleStage {
    Fix,
    Test,
    Deploy,
    Production,
}

/// Terminal outcome of a learning cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CycleOutcome {
    Success,
    Failed,
    ProductionSuccess,
    ProductionIssues,
}

impl CycleOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleOutcome::Success => "success",
            CycleOutcome::Failed => "failed",
            CycleOutcome::ProductionSuccess => "production-success",
            CycleOutcome::ProductionIssues => "production-issues",
        }
    }

    pub fn is_positive(&self) -> bool {
        matches!(self, CycleOutcome::Success | CycleOutcome::ProductionSuccess)
    }

    /// Production outcomes carry more learning weight than bench outcomes.
    pub fn is_production(&self) -> bool {
        matches!(
            self,
            CycleOutcome::ProductionSuccess | CycleOutcome::ProductionIssues
        )
    }
}

/// Append-only audit trail of one issue's remediation attempt, from
/// detection through production outcome. Never mutated after the terminal
/// outcome is recorded; history is replayed, not overwritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningCycle {
    pub id: CycleId,
    pub issue_id: IssueId,
    pub fix_id: Option<FixId>,
    pub stages: Vec<(CycleStage, DateTime<Utc>)>,
    pub outcome: Option<CycleOutcome>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl LearningCycle {
    pub fn new(issue_id: IssueId) -> Self {
        Self {
            id: Uuid::new_v4(),
            issue_id,
            fix_id: None,
            stages: Vec::new(),
            outcome: None,
            metadata: HashMap::new(),
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn attach_fix(&mut self, fix_id: FixId) {
        self.fix_id = Some(fix_id);
    }

    pub fn record_stage(&mut self, stage: CycleStage) {
        self.stages.push((stage, Utc::now()));
    }

    pub fn add_metadata(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.metadata.insert(key.into(), value);
    }

    /// Write-once terminal outcome. A second terminal write is a domain
    /// violation, not a silent overwrite.
    pub fn record_outcome(&mut self, outcome: CycleOutcome) -> Result<(), DomainError> {
        if self.outcome.is_some() {
            return Err(DomainError::OutcomeAlreadyRecorded(self.id));
        }
        self.outcome = Some(outcome);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome.is_some()
    }
}
