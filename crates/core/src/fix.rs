use crate::issue::{IssueId, SourceSpan};
use crate::DomainError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type FixId = Uuid;

/// Which strategy family produced a fix candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyKind {
    /// Template rules matched against the issue category
    Pattern,
    /// Heuristics over the surrounding code
    ContextAware,
    /// External text-generation model
    ModelAssisted,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Pattern => "pattern",
            StrategyKind::ContextAware => "context-aware",
            StrategyKind::ModelAssisted => "model-assisted",
        }
    }

    pub fn from_str_key(key: &str) -> Option<Self> {
        match key {
            "pattern" => Some(StrategyKind::Pattern),
            "context-aware" => Some(StrategyKind::ContextAware),
            "model-assisted" => Some(StrategyKind::ModelAssisted),
            _ => None,
        }
    }
}

/// Safety classification gating how a fix may be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SafetyTier {
    /// Narrow mechanical change, eligible for automatic application
    Safe,
    /// Structural change, requires explicit approval
    Medium,
    /// Dynamic code construction or wide blast radius; suggestion only
    Risky,
}

impl SafetyTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SafetyTier::Safe => "safe",
            SafetyTier::Medium => "medium",
            SafetyTier::Risky => "risky",
        }
    }
}

/// The concrete edit a fix proposes: replace `original` with `replacement`
/// at `span`. Restore-on-rollback never replays this diff, it overwrites
/// from a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixPayload {
    pub original: String,
    pub replacement: String,
    pub span: SourceSpan,
}

impl FixPayload {
    /// Size of the change in characters, used by the safety classifier.
    pub fn change_size(&self) -> usize {
        self.original.len().max(self.replacement.len())
    }
}

/// A candidate remediation for an issue.
///
/// One issue may accumulate many candidates; exactly one becomes applied
/// per remediation attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fix {
    pub id: FixId,
    pub issue_id: IssueId,
    pub strategy: StrategyKind,
    pub payload: FixPayload,
    pub confidence: f64,
    pub safety_tier: SafetyTier,
    pub generated_at: DateTime<Utc>,
}

impl Fix {
    pub fn new(
        issue_id: IssueId,
        strategy: StrategyKind,
        payload: FixPayload,
        confidence: f64,
    ) -> Result<Self, DomainError> {
        if !(0.0..=1.0).contains(&confidence) || confidence.is_nan() {
            return Err(DomainError::ConfidenceOutOfRange(confidence));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            issue_id,
            strategy,
            payload,
            confidence,
            // Until classified, treat the candidate as risky so it can
            // never slip through the apply gate unclassified.
            safety_tier: SafetyTier::Risky,
            generated_at: Utc::now(),
        })
    }

    pub fn with_tier(mut self, tier: SafetyTier) -> Self {
        self.safety_tier = tier;
        self
    }
}
