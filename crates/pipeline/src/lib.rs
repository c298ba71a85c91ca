//! The remediation pipeline: safety classification, transactional fix
//! application with snapshot rollback, verification, deployment tracking,
//! and production monitoring.

pub mod applier;
pub mod deploy;
pub mod orchestrator;
pub mod safety;
pub mod snapshot;
pub mod verifier;
pub mod workspace;

pub use applier::{AppliedFix, FixApplier};
pub use deploy::{DeploymentTracker, ErrorSignalSource, ProductionMonitor};
pub use orchestrator::{OutcomeSink, OutcomeTask, Pipeline, RemediationReport};
pub use safety::SafetyClassifier;
pub use snapshot::SnapshotStore;
pub use verifier::{LintStage, SyntaxStage, TestRunner, TestsStage, Verifier, VerifierStage};
pub use workspace::{LocalWorkspace, WorkspaceFiles};
