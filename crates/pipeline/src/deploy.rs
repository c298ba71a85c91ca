use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::config::{MonitorConfig, SilentWindowOutcome};
use common::errors::RemedyResult;
use infra::Store;
use remedy_core::{CycleOutcome, Deployment};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Source of production error signals attributable to a file. Backed by
/// whatever telemetry the host environment exposes.
#[async_trait]
pub trait ErrorSignalSource: Send + Sync {
    async fn error_count(&self, file_path: &Path, since: DateTime<Utc>) -> RemedyResult<u32>;
}

/// Moves deployments from pending to live after verification success and
/// persists status changes.
pub struct DeploymentTracker {
    store: Arc<Store>,
}

impl DeploymentTracker {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn promote(&self, deployment: &mut Deployment) -> RemedyResult<()> {
        deployment.go_live()?;
        self.store.save_deployment(deployment)?;
        info!(deployment_id = %deployment.id, fix_id = %deployment.fix_id, "deployment live");
        Ok(())
    }

    pub fn revert(&self, deployment: &mut Deployment) -> RemedyResult<()> {
        deployment.revert()?;
        self.store.save_deployment(deployment)?;
        warn!(deployment_id = %deployment.id, "deployment reverted");
        Ok(())
    }

    pub fn save(&self, deployment: &Deployment) -> RemedyResult<()> {
        self.store.save_deployment(deployment)
    }
}

/// Polling interval within the observation window.
const SAMPLE_INTERVAL: Duration = Duration::from_secs(10);

/// Watches a live deployment for a bounded window. A new error signal
/// attributable to the changed file resolves `production-issues`; a
/// silent window resolves to the configured default outcome.
pub struct ProductionMonitor {
    signals: Arc<dyn ErrorSignalSource>,
    config: MonitorConfig,
}

impl ProductionMonitor {
    pub fn new(signals: Arc<dyn ErrorSignalSource>, config: MonitorConfig) -> Self {
        Self { signals, config }
    }

    /// Observe until the window closes, an error signal arrives, or the
    /// token cancels. Cancellation resolves to the silent-window default.
    pub async fn observe(
        &self,
        deployment: &mut Deployment,
        cancel: &CancellationToken,
    ) -> RemedyResult<CycleOutcome> {
        let opened_at = Utc::now();
        let window = self.config.window();
        let deadline = tokio::time::Instant::now() + window;

        loop {
            if cancel.is_cancelled() || tokio::time::Instant::now() >= deadline {
                break;
            }
            let count = self
                .signals
                .error_count(&deployment.file_path, opened_at)
                .await?;
            if count > 0 {
                for _ in 0..count {
                    deployment.record_error_signal();
                }
                warn!(
                    deployment_id = %deployment.id,
                    errors = count,
                    "error signal within observation window"
                );
                return Ok(CycleOutcome::ProductionIssues);
            }
            let step = SAMPLE_INTERVAL.min(window);
            tokio::select! {
                _ = tokio::time::sleep(step) => {}
                _ = cancel.cancelled() => break,
            }
        }

        let outcome = match self.config.default_outcome {
            SilentWindowOutcome::ProductionSuccess => CycleOutcome::ProductionSuccess,
            SilentWindowOutcome::ProductionIssues => CycleOutcome::ProductionIssues,
        };
        info!(deployment_id = %deployment.id, outcome = outcome.as_str(), "observation window closed silent");
        Ok(outcome)
    }
}
