use crate::snapshot::SnapshotStore;
use crate::workspace::WorkspaceFiles;
use common::errors::{RemedyError, RemedyResult};
use dashmap::DashMap;
use infra::Store;
use remedy_core::{ApplicationRecord, ApplicationState, Fix, SafetyTier};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info, warn};

/// An in-flight application. Holds the per-file lock for its lifetime, so
/// within one file applications are strictly sequential; dropping the
/// handle releases the lock on every exit path.
#[derive(Debug)]
pub struct AppliedFix {
    pub record: ApplicationRecord,
    _guard: OwnedMutexGuard<()>,
}

/// Application and rollback manager.
///
/// Enforces the safety tier as a hard gate, captures a pre-state snapshot
/// before any write, and serializes applications per file through fair
/// queued locks. A file whose snapshot restore fails is quarantined:
/// further automatic application is refused until an operator clears it.
pub struct FixApplier {
    workspace: Arc<dyn WorkspaceFiles>,
    snapshots: Arc<SnapshotStore>,
    store: Arc<Store>,
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
    quarantined: DashMap<PathBuf, String>,
    snapshot_grace: Duration,
}

impl FixApplier {
    pub fn new(
        workspace: Arc<dyn WorkspaceFiles>,
        snapshots: Arc<SnapshotStore>,
        store: Arc<Store>,
        snapshot_grace: Duration,
    ) -> Self {
        Self {
            workspace,
            snapshots,
            store,
            locks: DashMap::new(),
            quarantined: DashMap::new(),
            snapshot_grace,
        }
    }

    /// Apply an automatically-eligible fix. Medium-tier fixes need the
    /// explicit approval path; risky fixes are rejected everywhere.
    pub async fn apply(&self, fix: &Fix) -> RemedyResult<AppliedFix> {
        match fix.safety_tier {
            SafetyTier::Safe => self.apply_inner(fix).await,
            SafetyTier::Medium => Err(RemedyError::Validation {
                stage: "approval".into(),
                detail: format!("fix {} requires explicit approval", fix.id),
            }),
            SafetyTier::Risky => Err(RemedyError::SafetyViolation { fix_id: fix.id }),
        }
    }

    /// Apply a medium-tier fix that an operator has approved. The risky
    /// gate still holds: approval never overrides it.
    pub async fn apply_approved(&self, fix: &Fix) -> RemedyResult<AppliedFix> {
        if fix.safety_tier == SafetyTier::Risky {
            return Err(RemedyError::SafetyViolation { fix_id: fix.id });
        }
        self.apply_inner(fix).await
    }

    async fn apply_inner(&self, fix: &Fix) -> RemedyResult<AppliedFix> {
        let file_path = self.file_path_for(fix)?;
        if let Some(reason) = self.quarantine_reason(&file_path) {
            return Err(RemedyError::Unrecoverable(format!(
                "{} is quarantined: {reason}",
                file_path.display()
            )));
        }

        // tokio's Mutex queues waiters in FIFO order
        let lock = self
            .locks
            .entry(file_path.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;

        let mut record = ApplicationRecord::new(fix.id, file_path.clone());
        record.transition(ApplicationState::Applying)?;
        self.store.save_record(&record)?;

        let content = self.workspace.read(&file_path).await?;
        if !content.contains(&fix.payload.original) {
            record.transition(ApplicationState::RolledBack)?;
            self.store.save_record(&record)?;
            return Err(RemedyError::Validation {
                stage: "patch".into(),
                detail: format!(
                    "original text no longer present in {}",
                    file_path.display()
                ),
            });
        }

        self.snapshots.take(record.id, content.clone());

        let patched = content.replacen(&fix.payload.original, &fix.payload.replacement, 1);
        if let Err(write_err) = self.workspace.write(&file_path, &patched).await {
            warn!(fix_id = %fix.id, error = %write_err, "apply write failed, restoring");
            self.restore_from_snapshot(&record).await?;
            record.transition(ApplicationState::RolledBack)?;
            self.store.save_record(&record)?;
            self.snapshots.discard(&record.id);
            return Err(write_err);
        }

        record.transition(ApplicationState::Applied)?;
        self.store.save_record(&record)?;
        info!(fix_id = %fix.id, record_id = %record.id, file = %file_path.display(), "fix applied");

        Ok(AppliedFix {
            record,
            _guard: guard,
        })
    }

    /// Restore the pre-state and mark the record rolled back. Idempotent:
    /// the restore is a pure overwrite from the stored blob, so repeated
    /// calls land on the identical pre-state.
    pub async fn rollback(&self, applied: &mut AppliedFix) -> RemedyResult<()> {
        self.restore_from_snapshot(&applied.record).await?;
        if applied.record.state != ApplicationState::RolledBack {
            applied.record.transition(ApplicationState::RolledBack)?;
            self.store.save_record(&applied.record)?;
        }
        info!(record_id = %applied.record.id, "rolled back");
        Ok(())
    }

    /// Mark a verified application. The snapshot is retained until the
    /// deployment outcome resolves, in case production forces a revert.
    pub fn confirm_verified(&self, applied: &mut AppliedFix) -> RemedyResult<()> {
        applied.record.transition(ApplicationState::Verified)?;
        self.store.save_record(&applied.record)?;
        Ok(())
    }

    /// Production revert: restore the file of an already-verified record.
    /// Takes the per-file lock itself since the apply-time handle is gone.
    pub async fn revert_verified(&self, record: &ApplicationRecord) -> RemedyResult<()> {
        let lock = self
            .locks
            .entry(record.file_path.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock_owned().await;
        self.restore_from_snapshot(record).await?;
        self.snapshots.discard(&record.id);
        info!(record_id = %record.id, file = %record.file_path.display(), "production revert restored pre-state");
        Ok(())
    }

    /// Drop a snapshot that is no longer needed for any restore path.
    pub fn discard_snapshot(&self, record_id: remedy_core::record::RecordId) {
        self.snapshots.discard(&record_id);
    }

    /// Discard a surviving snapshot after the configured grace period.
    pub fn discard_after_grace(self: &Arc<Self>, record_id: remedy_core::record::RecordId) {
        let applier = Arc::clone(self);
        let grace = self.snapshot_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            applier.snapshots.discard(&record_id);
        });
    }

    async fn restore_from_snapshot(&self, record: &ApplicationRecord) -> RemedyResult<()> {
        let snapshot = self.snapshots.get(&record.id).ok_or_else(|| {
            RemedyError::Internal(format!("no snapshot for record {}", record.id))
        })?;
        if let Err(e) = self
            .workspace
            .write(&record.file_path, &snapshot.content)
            .await
        {
            let reason = format!("snapshot restore failed: {e}");
            error!(record_id = %record.id, file = %record.file_path.display(), %reason, "quarantining file");
            self.quarantined
                .insert(record.file_path.clone(), reason.clone());
            return Err(RemedyError::Unrecoverable(reason));
        }
        Ok(())
    }

    pub fn quarantine_reason(&self, file: &PathBuf) -> Option<String> {
        self.quarantined.get(file).map(|e| e.value().clone())
    }

    /// Operator action: re-enable automatic application for a file.
    pub fn clear_quarantine(&self, file: &PathBuf) -> bool {
        self.quarantined.remove(file).is_some()
    }

    fn file_path_for(&self, fix: &Fix) -> RemedyResult<PathBuf> {
        self.store
            .get_issue(fix.issue_id)?
            .map(|issue| issue.file_path)
            .ok_or_else(|| RemedyError::NotFound(format!("issue {}", fix.issue_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::LocalWorkspace;
    use remedy_core::{FixPayload, Issue, IssueCategory, Severity, SourceSpan, StrategyKind};
    use std::path::Path;

    struct Fixture {
        _dir: tempfile::TempDir,
        applier: Arc<FixApplier>,
        workspace: Arc<LocalWorkspace>,
        fix: Fix,
        file: PathBuf,
    }

    async fn fixture(content: &str, tier: SafetyTier) -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let workspace = Arc::new(LocalWorkspace::new(dir.path()));
        let store = Arc::new(Store::in_memory().expect("store"));

        let file = PathBuf::from("app.rs");
        workspace.write(&file, content).await.expect("seed file");

        let issue = Issue::new(
            file.clone(),
            SourceSpan::single_line(1, 1, 10),
            IssueCategory::NullDereference,
            Severity::High,
            "heuristic",
        );
        store.insert_issue(&issue).expect("insert issue");

        let fix = Fix::new(
            issue.id,
            StrategyKind::Pattern,
            FixPayload {
                original: "x.unwrap()".into(),
                replacement: "x.unwrap_or_default()".into(),
                span: SourceSpan::single_line(1, 1, 10),
            },
            0.9,
        )
        .expect("fix")
        .with_tier(tier);
        store.insert_fix(&fix).expect("insert fix");

        let applier = Arc::new(FixApplier::new(
            workspace.clone(),
            Arc::new(SnapshotStore::new()),
            store,
            Duration::from_secs(60),
        ));
        Fixture {
            _dir: dir,
            applier,
            workspace,
            fix,
            file,
        }
    }

    #[tokio::test]
    async fn safe_fix_is_applied_and_file_rewritten() {
        let f = fixture("let v = x.unwrap();\n", SafetyTier::Safe).await;
        let applied = f.applier.apply(&f.fix).await.expect("apply");
        assert_eq!(applied.record.state, ApplicationState::Applied);

        let content = f.workspace.read(Path::new("app.rs")).await.expect("read");
        assert_eq!(content, "let v = x.unwrap_or_default();\n");
    }

    #[tokio::test]
    async fn risky_fix_is_rejected_on_every_path() {
        let f = fixture("let v = x.unwrap();\n", SafetyTier::Risky).await;
        assert!(matches!(
            f.applier.apply(&f.fix).await,
            Err(RemedyError::SafetyViolation { .. })
        ));
        assert!(matches!(
            f.applier.apply_approved(&f.fix).await,
            Err(RemedyError::SafetyViolation { .. })
        ));
        // File untouched
        let content = f.workspace.read(&f.file).await.expect("read");
        assert_eq!(content, "let v = x.unwrap();\n");
    }

    #[tokio::test]
    async fn medium_fix_needs_the_approval_path() {
        let f = fixture("let v = x.unwrap();\n", SafetyTier::Medium).await;
        assert!(matches!(
            f.applier.apply(&f.fix).await,
            Err(RemedyError::Validation { .. })
        ));
        let applied = f.applier.apply_approved(&f.fix).await.expect("approved");
        assert_eq!(applied.record.state, ApplicationState::Applied);
    }

    #[tokio::test]
    async fn rollback_is_idempotent() {
        let original = "let v = x.unwrap();\n";
        let f = fixture(original, SafetyTier::Safe).await;
        let mut applied = f.applier.apply(&f.fix).await.expect("apply");

        f.applier.rollback(&mut applied).await.expect("first rollback");
        let after_first = f.workspace.read(&f.file).await.expect("read");
        f.applier.rollback(&mut applied).await.expect("second rollback");
        let after_second = f.workspace.read(&f.file).await.expect("read");

        assert_eq!(after_first, original);
        assert_eq!(after_first, after_second);
        assert_eq!(applied.record.state, ApplicationState::RolledBack);
    }

    #[tokio::test]
    async fn stale_original_rolls_back_without_writing() {
        let f = fixture("completely different content\n", SafetyTier::Safe).await;
        let err = f.applier.apply(&f.fix).await.expect_err("stale");
        assert!(matches!(err, RemedyError::Validation { .. }));
        let content = f.workspace.read(&f.file).await.expect("read");
        assert_eq!(content, "completely different content\n");
    }

    #[tokio::test]
    async fn applications_to_one_file_are_serialized() {
        let f = fixture("let v = x.unwrap();\n", SafetyTier::Safe).await;
        let first = f.applier.apply(&f.fix).await.expect("first");

        // Second application must wait for the in-flight handle
        let applier = f.applier.clone();
        let fix = f.fix.clone();
        let second = tokio::spawn(async move { applier.apply(&fix).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!second.is_finished(), "second apply should be queued");

        drop(first);
        // After release the second proceeds; the original text is gone so
        // it resolves as a patch validation failure, not a deadlock.
        let result = second.await.expect("join");
        assert!(matches!(result, Err(RemedyError::Validation { .. })));
    }

    #[tokio::test]
    async fn quarantined_file_refuses_application() {
        let f = fixture("let v = x.unwrap();\n", SafetyTier::Safe).await;
        f.applier
            .quarantined
            .insert(f.file.clone(), "restore failed in a previous cycle".into());
        assert!(matches!(
            f.applier.apply(&f.fix).await,
            Err(RemedyError::Unrecoverable(_))
        ));
        assert!(f.applier.clear_quarantine(&f.file));
        assert!(f.applier.apply(&f.fix).await.is_ok());
    }
}
