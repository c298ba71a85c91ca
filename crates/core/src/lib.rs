//! Domain entities for the REMEDY remediation pipeline.
//!
//! Pure data model: no I/O, no infrastructure dependencies. Everything that
//! crosses a crate boundary in the workspace is defined here.

pub mod cycle;
pub mod deployment;
pub mod expertise;
pub mod fix;
pub mod issue;
pub mod record;

pub use cycle::{CycleOutcome, CycleStage, LearningCycle};
pub use deployment::{Deployment, DeploymentStatus};
pub use expertise::{DomainKey, ExpertiseScore, INITIAL_WEIGHT};
pub use fix::{Fix, FixPayload, SafetyTier, StrategyKind};
pub use issue::{Issue, IssueCategory, Severity, SourceSpan};
pub use record::{ApplicationRecord, ApplicationState, VerificationResult};

use thiserror::Error;

/// Violations of domain invariants (illegal state transitions, write-once
/// fields). Infrastructure failures live in `common::RemedyError`.
#[derive(Debug, Error, PartialEq)]
pub enum DomainError {
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("learning cycle {0} already has a terminal outcome")]
    OutcomeAlreadyRecorded(uuid::Uuid),

    #[error("confidence {0} outside [0, 1]")]
    ConfidenceOutOfRange(f64),
}
