//! Prioritized, concurrency-bounded defect crawl.
//!
//! The prioritizer orders the frontier by change recency, historical issue
//! density, and scan staleness; the crawler scans files independently under
//! a semaphore bound, memoizing detector output by content fingerprint.

pub mod crawler;
pub mod detector;
pub mod prioritizer;

pub use crawler::{CrawlReport, Crawler};
pub use detector::{Finding, HeuristicDetector, IssueDetector};
pub use prioritizer::{FilePrioritizer, FileSignals};
