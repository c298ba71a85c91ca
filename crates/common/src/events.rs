use remedy_core::{CycleOutcome, SafetyTier};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Structured notification payloads for external alerting/chat consumers.
///
/// Published on the [`crate::EventBus`]; consumers subscribe by topic (see
/// [`crate::topics`]). Delivery is best-effort and never blocks the
/// pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    IssueDetected {
        issue_id: Uuid,
        file_path: PathBuf,
        category: String,
    },
    FixGenerated {
        fix_id: Uuid,
        issue_id: Uuid,
        strategy: String,
        confidence: f64,
        tier: SafetyTier,
    },
    FixApplied {
        fix_id: Uuid,
        record_id: Uuid,
        file_path: PathBuf,
    },
    FixHeldForApproval {
        fix_id: Uuid,
        file_path: PathBuf,
        tier: SafetyTier,
    },
    FixRolledBack {
        fix_id: Uuid,
        record_id: Uuid,
        file_path: PathBuf,
        reason: String,
    },
    DeploymentOutcome {
        deployment_id: Uuid,
        fix_id: Uuid,
        outcome: CycleOutcome,
    },
    CrawlFinished {
        files_scanned: usize,
        files_failed: usize,
        issues_found: usize,
    },
    FileQuarantined {
        file_path: PathBuf,
        reason: String,
    },
}
