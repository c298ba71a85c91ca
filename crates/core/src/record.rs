use crate::fix::FixId;
use crate::DomainError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

pub type RecordId = Uuid;

/// Per-fix application state machine:
/// `Proposed -> Applying -> Applied -> {Verified | RolledBack}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplicationState {
    Proposed,
    Applying,
    Applied,
    Verified,
    RolledBack,
}

impl ApplicationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationState::Proposed => "proposed",
            ApplicationState::Applying => "applying",
            ApplicationState::Applied => "applied",
            ApplicationState::Verified => "verified",
            ApplicationState::RolledBack => "rolled-back",
        }
    }

    fn can_transition(&self, next: ApplicationState) -> bool {
        use ApplicationState::*;
        matches!(
            (self, next),
            (Proposed, Applying)
                | (Applying, Applied)
                // Apply failed before the write landed
                | (Applying, RolledBack)
                | (Applied, Verified)
                | (Applied, RolledBack)
        )
    }
}

/// Outcome of the verifier battery for one applied fix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub passed: bool,
    /// Name of the first failing stage, if any
    pub failed_stage: Option<String>,
    pub detail: Option<String>,
    pub duration_ms: u64,
}

impl VerificationResult {
    pub fn pass(duration_ms: u64) -> Self {
        Self {
            passed: true,
            failed_stage: None,
            detail: None,
            duration_ms,
        }
    }

    pub fn fail(stage: impl Into<String>, detail: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            passed: false,
            failed_stage: Some(stage.into()),
            detail: Some(detail.into()),
            duration_ms,
        }
    }
}

/// Transactional record of applying a fix, owning the rollback snapshot
/// reference exclusively. The snapshot blob itself lives in the pipeline's
/// snapshot store, keyed by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub id: RecordId,
    pub fix_id: FixId,
    pub file_path: PathBuf,
    pub state: ApplicationState,
    pub applied_at: Option<DateTime<Utc>>,
    pub verification: Option<VerificationResult>,
    pub rolled_back_at: Option<DateTime<Utc>>,
}

impl ApplicationRecord {
    pub fn new(fix_id: FixId, file_path: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            fix_id,
            file_path: file_path.into(),
            state: ApplicationState::Proposed,
            applied_at: None,
            verification: None,
            rolled_back_at: None,
        }
    }

    pub fn transition(&mut self, next: ApplicationState) -> Result<(), DomainError> {
        if !self.state.can_transition(next) {
            return Err(DomainError::InvalidTransition {
                from: self.state.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        match next {
            ApplicationState::Applied => self.applied_at = Some(Utc::now()),
            ApplicationState::RolledBack => self.rolled_back_at = Some(Utc::now()),
            _ => {}
        }
        self.state = next;
        Ok(())
    }

    pub fn record_verification(&mut self, result: VerificationResult) {
        self.verification = Some(result);
    }

    /// True once the fix passed verification and was never rolled back.
    pub fn is_verified_pass(&self) -> bool {
        self.state == ApplicationState::Verified
            && self.verification.as_ref().is_some_and(|v| v.passed)
    }
}
