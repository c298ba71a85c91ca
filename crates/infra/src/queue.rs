use common::errors::{RemedyError, RemedyResult};
use parking_lot::Mutex;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub type JobId = Uuid;

/// Exponential backoff with jitter for job retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub base: f64,
    pub jitter: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(30),
            base: 2.0,
            jitter: true,
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let millis = self.initial.as_millis() as f64 * self.base.powi(attempt as i32);
        let delay = Duration::from_millis(millis as u64).min(self.max);
        if self.jitter {
            let factor = rand::thread_rng().gen_range(0.75..=1.25);
            Duration::from_millis((delay.as_millis() as f64 * factor) as u64)
        } else {
            delay
        }
    }
}

/// One unit of work handed to the worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job<T> {
    pub id: JobId,
    pub task: T,
    pub attempts: u32,
    pub enqueued_at_ms: i64,
    /// Earliest dequeue time; pushed forward by retry backoff.
    not_before_ms: i64,
}

#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    pub pending: usize,
    pub in_flight: usize,
    pub dead_letters: usize,
    pub acked: u64,
    pub retried: u64,
    pub durable: bool,
}

struct QueueState<T> {
    pending: VecDeque<Job<T>>,
    in_flight: HashMap<JobId, Job<T>>,
    dead: Vec<Job<T>>,
    acked: u64,
    retried: u64,
}

/// At-least-once task queue with bounded retries and a dead-letter list.
///
/// Backed by a sled tree so pending and in-flight jobs survive a restart.
/// If the durable backend cannot be opened the queue degrades to a purely
/// in-process ordered list with identical delivery semantics; the
/// degradation is logged, never hidden.
pub struct JobQueue<T> {
    state: Mutex<QueueState<T>>,
    durable: Option<sled::Tree>,
    max_retries: u32,
    backoff: Backoff,
}

impl<T> JobQueue<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + 'static,
{
    /// Open a durable queue at `path`. On backend failure, fall back to
    /// in-memory with a warning.
    pub fn open(path: impl AsRef<Path>, max_retries: u32, backoff: Backoff) -> Self {
        let durable = match sled::open(path.as_ref()) {
            Ok(db) => match db.open_tree("jobs") {
                Ok(tree) => Some(tree),
                Err(e) => {
                    warn!(error = %e, "job queue tree unavailable, degrading to in-memory");
                    None
                }
            },
            Err(e) => {
                warn!(
                    error = %e,
                    path = ?path.as_ref(),
                    "durable queue backend unavailable, degrading to in-memory"
                );
                None
            }
        };

        let mut queue = Self {
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                in_flight: HashMap::new(),
                dead: Vec::new(),
                acked: 0,
                retried: 0,
            }),
            durable,
            max_retries,
            backoff,
        };
        queue.recover();
        queue
    }

    /// Purely in-memory queue, used by tests and as the degraded mode.
    pub fn in_memory(max_retries: u32, backoff: Backoff) -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                in_flight: HashMap::new(),
                dead: Vec::new(),
                acked: 0,
                retried: 0,
            }),
            durable: None,
            max_retries,
            backoff,
        }
    }

    /// Reload jobs persisted by a previous process. In-flight jobs from the
    /// crashed run come back as pending (at-least-once).
    fn recover(&mut self) {
        let Some(tree) = &self.durable else { return };
        let mut recovered = 0usize;
        let mut state = self.state.lock();
        for entry in tree.iter() {
            let Ok((_, bytes)) = entry else { continue };
            match bincode::deserialize::<Job<T>>(&bytes) {
                Ok(job) => {
                    state.pending.push_back(job);
                    recovered += 1;
                }
                Err(e) => warn!(error = %e, "dropping undecodable persisted job"),
            }
        }
        state
            .pending
            .make_contiguous()
            .sort_by_key(|j| j.enqueued_at_ms);
        if recovered > 0 {
            info!(recovered, "recovered persisted jobs");
        }
    }

    fn persist(&self, job: &Job<T>) {
        if let Some(tree) = &self.durable {
            match bincode::serialize(job) {
                Ok(bytes) => {
                    if let Err(e) = tree.insert(job.id.as_bytes(), bytes) {
                        warn!(error = %e, job_id = %job.id, "failed to persist job");
                    }
                }
                Err(e) => warn!(error = %e, job_id = %job.id, "failed to encode job"),
            }
        }
    }

    fn unpersist(&self, id: JobId) {
        if let Some(tree) = &self.durable {
            if let Err(e) = tree.remove(id.as_bytes()) {
                warn!(error = %e, job_id = %id, "failed to remove persisted job");
            }
        }
    }

    pub fn enqueue(&self, task: T) -> JobId {
        let now = chrono::Utc::now().timestamp_millis();
        let job = Job {
            id: Uuid::new_v4(),
            task,
            attempts: 0,
            enqueued_at_ms: now,
            not_before_ms: now,
        };
        self.persist(&job);
        let id = job.id;
        self.state.lock().pending.push_back(job);
        debug!(job_id = %id, "enqueued job");
        id
    }

    /// Worker-pulled dequeue. Returns the next job whose backoff delay has
    /// elapsed and marks it in-flight until acked or nacked.
    pub fn dequeue(&self) -> Option<Job<T>> {
        let now = chrono::Utc::now().timestamp_millis();
        let mut state = self.state.lock();
        let idx = state.pending.iter().position(|j| j.not_before_ms <= now)?;
        let job = state.pending.remove(idx)?;
        state.in_flight.insert(job.id, job.clone());
        Some(job)
    }

    pub fn ack(&self, id: JobId) -> RemedyResult<()> {
        let mut state = self.state.lock();
        if state.in_flight.remove(&id).is_none() {
            return Err(RemedyError::Queue(format!("ack for unknown job {id}")));
        }
        state.acked += 1;
        drop(state);
        self.unpersist(id);
        Ok(())
    }

    /// Negative acknowledgement. With `retry`, the job is rescheduled with
    /// exponential backoff until retries are exhausted, then moved to the
    /// dead-letter list and reported. Without `retry` it dead-letters
    /// immediately. Dead letters are never silently dropped.
    pub fn nack(&self, id: JobId, retry: bool) -> RemedyResult<()> {
        let mut state = self.state.lock();
        let mut job = state
            .in_flight
            .remove(&id)
            .ok_or_else(|| RemedyError::Queue(format!("nack for unknown job {id}")))?;

        job.attempts += 1;
        if retry && job.attempts <= self.max_retries {
            let delay = self.backoff.delay_for(job.attempts - 1);
            job.not_before_ms =
                chrono::Utc::now().timestamp_millis() + delay.as_millis() as i64;
            state.retried += 1;
            debug!(job_id = %id, attempt = job.attempts, delay_ms = delay.as_millis() as u64, "job rescheduled");
            self.persist(&job);
            state.pending.push_back(job);
        } else {
            error!(job_id = %id, attempts = job.attempts, "job moved to dead-letter");
            self.unpersist(id);
            state.dead.push(job);
        }
        Ok(())
    }

    pub fn dead_letters(&self) -> Vec<Job<T>> {
        self.state.lock().dead.clone()
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        QueueStats {
            pending: state.pending.len(),
            in_flight: state.in_flight.len(),
            dead_letters: state.dead.len(),
            acked: state.acked,
            retried: state.retried,
            durable: self.durable.is_some(),
        }
    }
}

/// Run `workers` async workers pulling from `queue` until cancelled. The
/// handler's `Ok` acks; `Err` nacks with retry.
pub async fn run_workers<T, F, Fut>(
    queue: std::sync::Arc<JobQueue<T>>,
    workers: usize,
    cancel: CancellationToken,
    handler: F,
) where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    F: Fn(Job<T>) -> Fut + Clone + Send + Sync + 'static,
    Fut: std::future::Future<Output = RemedyResult<()>> + Send,
{
    let mut handles = Vec::with_capacity(workers);
    for worker_id in 0..workers {
        let queue = queue.clone();
        let cancel = cancel.clone();
        let handler = handler.clone();
        handles.push(tokio::spawn(async move {
            debug!(worker_id, "queue worker started");
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                match queue.dequeue() {
                    Some(job) => {
                        let id = job.id;
                        match handler(job).await {
                            Ok(()) => {
                                let _ = queue.ack(id);
                            }
                            Err(e) => {
                                warn!(job_id = %id, error = %e, "job failed");
                                let _ = queue.nack(id, e.is_retriable());
                            }
                        }
                    }
                    None => {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(Duration::from_millis(25)) => {}
                        }
                    }
                }
            }
            debug!(worker_id, "queue worker stopped");
        }));
    }
    for handle in handles {
        let _ = handle.await;
    }
}
