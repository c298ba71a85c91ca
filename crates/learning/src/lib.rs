//! Continuous learning: consumes terminal cycle outcomes from the job
//! queue and maintains the smoothed per-strategy expertise scores that
//! bias generation and safety classification.

pub mod service;

pub use service::{DomainStats, LearningService};
