use crate::applier::{AppliedFix, FixApplier};
use crate::deploy::{DeploymentTracker, ProductionMonitor};
use crate::safety::SafetyClassifier;
use crate::verifier::Verifier;
use crate::workspace::WorkspaceFiles;
use common::errors::{RemedyError, RemedyResult};
use common::events::PipelineEvent;
use common::topics;
use common::EventBus;
use genfix::{ExpertiseReader, FixGenerator, GenerationOutcome};
use infra::Store;
use remedy_core::{
    CycleOutcome, CycleStage, Deployment, DomainKey, Fix, Issue, LearningCycle, SafetyTier,
    StrategyKind,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Learning work handed off after a cycle reaches a terminal outcome.
/// Modeled as an explicit queue task so a failed update is observable and
/// retryable instead of vanishing in a background callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeTask {
    pub cycle_id: uuid::Uuid,
    pub strategy: StrategyKind,
    pub domain: String,
    pub outcome: CycleOutcome,
}

/// Hand-off point to the learning service.
pub trait OutcomeSink: Send + Sync {
    fn submit(&self, task: OutcomeTask);
}

/// How one remediation attempt ended.
#[derive(Debug)]
pub enum RemediationReport {
    /// No strategy produced an acceptable candidate; flagged for manual
    /// review, no terminal outcome recorded.
    Declined { cycle: LearningCycle },
    /// Medium-tier fix awaiting operator approval.
    Held {
        cycle: LearningCycle,
        fix_id: uuid::Uuid,
    },
    /// The cycle ran to a terminal outcome.
    Completed {
        cycle: LearningCycle,
        outcome: CycleOutcome,
    },
}

/// End-to-end wiring of one issue's remediation: generate, classify,
/// apply, verify, deploy, monitor, and hand the terminal outcome to the
/// learning service.
pub struct Pipeline {
    workspace: Arc<dyn WorkspaceFiles>,
    generator: FixGenerator,
    classifier: SafetyClassifier,
    applier: Arc<FixApplier>,
    verifier: Verifier,
    tracker: DeploymentTracker,
    monitor: ProductionMonitor,
    store: Arc<Store>,
    bus: EventBus<PipelineEvent>,
    expertise: Arc<dyn ExpertiseReader>,
    outcomes: Arc<dyn OutcomeSink>,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        workspace: Arc<dyn WorkspaceFiles>,
        generator: FixGenerator,
        classifier: SafetyClassifier,
        applier: Arc<FixApplier>,
        verifier: Verifier,
        tracker: DeploymentTracker,
        monitor: ProductionMonitor,
        store: Arc<Store>,
        bus: EventBus<PipelineEvent>,
        expertise: Arc<dyn ExpertiseReader>,
        outcomes: Arc<dyn OutcomeSink>,
    ) -> Self {
        Self {
            workspace,
            generator,
            classifier,
            applier,
            verifier,
            tracker,
            monitor,
            store,
            bus,
            expertise,
            outcomes,
        }
    }

    /// Run one remediation attempt for a detected issue.
    pub async fn remediate(
        &self,
        issue: &Issue,
        cancel: &CancellationToken,
    ) -> RemedyResult<RemediationReport> {
        let mut cycle = LearningCycle::new(issue.id);
        cycle.record_stage(CycleStage::Fix);

        let content = self.workspace.read(&issue.file_path).await?;
        let fix = match self.generator.generate(issue, &content).await? {
            GenerationOutcome::Generated(fix) => fix,
            GenerationOutcome::Declined => {
                cycle.add_metadata("disposition", serde_json::json!("manual-review"));
                self.store.save_cycle(&cycle)?;
                return Ok(RemediationReport::Declined { cycle });
            }
        };

        let weight = self
            .expertise
            .weight(&DomainKey::new(fix.strategy, issue.category.domain()));
        let fix = {
            let tier = self.classifier.classify(&fix, weight);
            fix.with_tier(tier)
        };
        cycle.attach_fix(fix.id);
        self.store.insert_fix(&fix)?;
        self.bus
            .publish(
                topics::TOPIC_FIX_GENERATED,
                PipelineEvent::FixGenerated {
                    fix_id: fix.id,
                    issue_id: issue.id,
                    strategy: fix.strategy.as_str().to_string(),
                    confidence: fix.confidence,
                    tier: fix.safety_tier,
                },
            )
            .await;

        if fix.safety_tier == SafetyTier::Medium {
            self.bus
                .publish(
                    topics::TOPIC_FIX_HELD,
                    PipelineEvent::FixHeldForApproval {
                        fix_id: fix.id,
                        file_path: issue.file_path.clone(),
                        tier: fix.safety_tier,
                    },
                )
                .await;
            cycle.add_metadata("disposition", serde_json::json!("held-for-approval"));
            self.store.save_cycle(&cycle)?;
            return Ok(RemediationReport::Held {
                fix_id: fix.id,
                cycle,
            });
        }

        let applied = match self.applier.apply(&fix).await {
            Ok(applied) => applied,
            Err(RemedyError::SafetyViolation { fix_id }) => {
                warn!(%fix_id, "risky fix refused by the apply gate");
                cycle.add_metadata("reason", serde_json::json!("SafetyViolation"));
                return self.finish(cycle, &fix, issue, CycleOutcome::Failed).await;
            }
            Err(RemedyError::Validation { stage, detail }) => {
                cycle.add_metadata(
                    "reason",
                    serde_json::json!(format!("{stage}: {detail}")),
                );
                return self.finish(cycle, &fix, issue, CycleOutcome::Failed).await;
            }
            Err(other) => return Err(other),
        };

        self.run_applied(cycle, fix, issue, applied, cancel).await
    }

    /// Resume a held medium-tier fix after operator approval.
    pub async fn remediate_approved(
        &self,
        fix: &Fix,
        cancel: &CancellationToken,
    ) -> RemedyResult<RemediationReport> {
        let issue = self
            .store
            .get_issue(fix.issue_id)?
            .ok_or_else(|| RemedyError::NotFound(format!("issue {}", fix.issue_id)))?;

        let mut cycle = LearningCycle::new(issue.id);
        cycle.attach_fix(fix.id);
        cycle.record_stage(CycleStage::Fix);
        cycle.add_metadata("disposition", serde_json::json!("operator-approved"));

        let applied = match self.applier.apply_approved(fix).await {
            Ok(applied) => applied,
            Err(RemedyError::SafetyViolation { fix_id }) => {
                warn!(%fix_id, "risky fix refused even with approval");
                cycle.add_metadata("reason", serde_json::json!("SafetyViolation"));
                return self.finish(cycle, fix, &issue, CycleOutcome::Failed).await;
            }
            Err(RemedyError::Validation { stage, detail }) => {
                cycle.add_metadata(
                    "reason",
                    serde_json::json!(format!("{stage}: {detail}")),
                );
                return self.finish(cycle, fix, &issue, CycleOutcome::Failed).await;
            }
            Err(other) => return Err(other),
        };

        self.run_applied(cycle, fix.clone(), &issue, applied, cancel)
            .await
    }

    async fn run_applied(
        &self,
        mut cycle: LearningCycle,
        fix: Fix,
        issue: &Issue,
        mut applied: AppliedFix,
        cancel: &CancellationToken,
    ) -> RemedyResult<RemediationReport> {
        cycle.record_stage(CycleStage::Test);
        let patched = self.workspace.read(&issue.file_path).await?;
        let verification = match self
            .verifier
            .verify(&issue.file_path, &patched, cancel)
            .await
        {
            Ok(verification) => verification,
            Err(e) => {
                // An aborted battery (cancellation, stage infrastructure
                // failure) leaves the patch unverified; restore the
                // pre-state and release the snapshot before surfacing it.
                warn!(record_id = %applied.record.id, error = %e, "verification aborted, restoring pre-state");
                if let Err(restore_err) = self.applier.rollback(&mut applied).await {
                    self.publish_quarantine(issue).await;
                    return Err(restore_err);
                }
                self.applier.discard_snapshot(applied.record.id);
                cycle.add_metadata(
                    "reason",
                    serde_json::json!(format!("verification aborted: {e}")),
                );
                self.store.save_cycle(&cycle)?;
                return Err(e);
            }
        };
        applied.record.record_verification(verification.clone());

        if !verification.passed {
            if let Err(e) = self.applier.rollback(&mut applied).await {
                self.publish_quarantine(issue).await;
                return Err(e);
            }
            self.bus
                .publish(
                    topics::TOPIC_FIX_ROLLED_BACK,
                    PipelineEvent::FixRolledBack {
                        fix_id: fix.id,
                        record_id: applied.record.id,
                        file_path: issue.file_path.clone(),
                        reason: verification
                            .failed_stage
                            .clone()
                            .unwrap_or_else(|| "verification".into()),
                    },
                )
                .await;
            if let Some(stage) = &verification.failed_stage {
                cycle.add_metadata("failed_stage", serde_json::json!(stage));
            }
            self.applier.discard_snapshot(applied.record.id);
            return self.finish(cycle, &fix, issue, CycleOutcome::Failed).await;
        }

        self.applier.confirm_verified(&mut applied)?;
        self.bus
            .publish(
                topics::TOPIC_FIX_APPLIED,
                PipelineEvent::FixApplied {
                    fix_id: fix.id,
                    record_id: applied.record.id,
                    file_path: issue.file_path.clone(),
                },
            )
            .await;

        cycle.record_stage(CycleStage::Deploy);
        let mut deployment = Deployment::new(fix.id, issue.file_path.clone(), cycle.id);
        self.tracker.promote(&mut deployment)?;

        // Release the per-file lock before the observation window; the
        // snapshot stays behind for a potential production revert.
        let record = applied.record.clone();
        drop(applied);

        cycle.record_stage(CycleStage::Production);
        let outcome = self.monitor.observe(&mut deployment, cancel).await?;

        if outcome == CycleOutcome::ProductionIssues {
            if let Err(e) = self.applier.revert_verified(&record).await {
                self.publish_quarantine(issue).await;
                return Err(e);
            }
            self.tracker.revert(&mut deployment)?;
        } else {
            self.tracker.save(&deployment)?;
            self.applier.discard_after_grace(record.id);
        }

        self.bus
            .publish(
                topics::TOPIC_DEPLOYMENT_OUTCOME,
                PipelineEvent::DeploymentOutcome {
                    deployment_id: deployment.id,
                    fix_id: fix.id,
                    outcome,
                },
            )
            .await;

        self.finish(cycle, &fix, issue, outcome).await
    }

    /// Surface a quarantine entry left behind by a failed restore, so
    /// operators hear about the file needing manual attention.
    async fn publish_quarantine(&self, issue: &Issue) {
        if let Some(reason) = self.applier.quarantine_reason(&issue.file_path) {
            self.bus
                .publish(
                    topics::TOPIC_FILE_QUARANTINED,
                    PipelineEvent::FileQuarantined {
                        file_path: issue.file_path.clone(),
                        reason,
                    },
                )
                .await;
        }
    }

    /// Record the terminal outcome, persist the cycle, and hand the result
    /// to the learning service.
    async fn finish(
        &self,
        mut cycle: LearningCycle,
        fix: &Fix,
        issue: &Issue,
        outcome: CycleOutcome,
    ) -> RemedyResult<RemediationReport> {
        cycle.record_outcome(outcome)?;
        self.store.save_cycle(&cycle)?;
        self.outcomes.submit(OutcomeTask {
            cycle_id: cycle.id,
            strategy: fix.strategy,
            domain: issue.category.domain().to_string(),
            outcome,
        });
        info!(cycle_id = %cycle.id, outcome = outcome.as_str(), "cycle complete");
        Ok(RemediationReport::Completed { cycle, outcome })
    }
}
