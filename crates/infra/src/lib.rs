//! Infrastructure services: durable job queue, result cache, and SQLite
//! persistence.

pub mod cache;
pub mod queue;
pub mod store;

pub use cache::{CacheStats, ResultCache};
pub use queue::{run_workers, Backoff, Job, JobId, JobQueue, QueueStats};
pub use store::Store;
