use common::config::LearningConfig;
use common::errors::RemedyResult;
use dashmap::DashMap;
use genfix::ExpertiseReader;
use infra::{run_workers, Job, JobQueue, Store};
use pipeline::{OutcomeSink, OutcomeTask};
use remedy_core::{CycleOutcome, DomainKey, ExpertiseScore};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Read-only per-domain effectiveness view for operators.
#[derive(Debug, Clone)]
pub struct DomainStats {
    pub key: DomainKey,
    pub weight: f64,
    pub sample_count: u64,
    pub success_rate: f64,
}

struct OutcomeCounters {
    successes: u64,
    failures: u64,
}

/// Owns the expertise score table. All mutation funnels through
/// [`LearningService::process`], serialized per domain key so concurrent
/// cycle completions cannot lose updates; everyone else reads through
/// [`ExpertiseReader`].
pub struct LearningService {
    store: Arc<Store>,
    queue: Arc<JobQueue<OutcomeTask>>,
    config: LearningConfig,
    scores: DashMap<DomainKey, ExpertiseScore>,
    counters: DashMap<DomainKey, OutcomeCounters>,
    key_locks: DashMap<DomainKey, Arc<Mutex<()>>>,
}

impl LearningService {
    /// Load persisted scores and wire up against the outcome queue.
    pub fn new(
        store: Arc<Store>,
        queue: Arc<JobQueue<OutcomeTask>>,
        config: LearningConfig,
    ) -> RemedyResult<Self> {
        let scores = DashMap::new();
        for score in store.load_expertise()? {
            scores.insert(score.key.clone(), score);
        }
        info!(loaded = scores.len(), "expertise scores loaded");
        Ok(Self {
            store,
            queue,
            config,
            scores,
            counters: DashMap::new(),
            key_locks: DashMap::new(),
        })
    }

    /// Apply one terminal outcome to the relevant score. The step is
    /// signed by the outcome, scaled up for production outcomes, and
    /// bounded by the smoothing fraction.
    pub async fn process(&self, task: &OutcomeTask) -> RemedyResult<()> {
        let key = DomainKey::new(task.strategy, task.domain.clone());

        let lock = self
            .key_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let mut score = self
            .scores
            .get(&key)
            .map(|s| s.clone())
            .unwrap_or_else(|| ExpertiseScore::new(key.clone()));

        let magnitude = if task.outcome.is_production() {
            self.config.base_step * self.config.production_multiplier
        } else {
            self.config.base_step
        };
        let delta = if task.outcome.is_positive() {
            magnitude
        } else {
            -magnitude
        };
        score.apply_step(delta, self.config.max_step_fraction);
        self.store.save_expertise(&score)?;
        debug!(
            strategy = key.strategy.as_str(),
            domain = %key.domain,
            outcome = task.outcome.as_str(),
            weight = score.weight,
            "expertise updated"
        );
        self.scores.insert(key.clone(), score);

        let mut counters = self.counters.entry(key).or_insert(OutcomeCounters {
            successes: 0,
            failures: 0,
        });
        if task.outcome.is_positive() {
            counters.successes += 1;
        } else {
            counters.failures += 1;
        }
        Ok(())
    }

    /// Pull outcome tasks from the queue until cancelled.
    pub async fn run(self: Arc<Self>, workers: usize, cancel: CancellationToken) {
        let queue = Arc::clone(&self.queue);
        let service = Arc::clone(&self);
        run_workers(queue, workers, cancel, move |job: Job<OutcomeTask>| {
            let service = Arc::clone(&service);
            async move { service.process(&job.task).await }
        })
        .await;
    }

    /// Snapshot of every tracked domain, for operator inspection.
    pub fn domain_stats(&self) -> Vec<DomainStats> {
        let mut stats: Vec<DomainStats> = self
            .scores
            .iter()
            .map(|entry| {
                let score = entry.value();
                let rate = self
                    .counters
                    .get(entry.key())
                    .map(|c| {
                        let total = c.successes + c.failures;
                        if total == 0 {
                            0.0
                        } else {
                            c.successes as f64 / total as f64
                        }
                    })
                    .unwrap_or(0.0);
                DomainStats {
                    key: score.key.clone(),
                    weight: score.weight,
                    sample_count: score.sample_count,
                    success_rate: rate,
                }
            })
            .collect();
        stats.sort_by(|a, b| {
            b.weight
                .partial_cmp(&a.weight)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        stats
    }

    /// Count of cycles persisted with the given terminal outcome.
    pub fn cycles_with_outcome(&self, outcome: CycleOutcome) -> RemedyResult<u64> {
        self.store.cycles_with_outcome(outcome)
    }
}

impl ExpertiseReader for LearningService {
    fn weight(&self, key: &DomainKey) -> f64 {
        self.scores
            .get(key)
            .map(|s| s.weight)
            .unwrap_or(remedy_core::INITIAL_WEIGHT)
    }
}

impl OutcomeSink for LearningService {
    fn submit(&self, task: OutcomeTask) {
        self.queue.enqueue(task);
    }
}
