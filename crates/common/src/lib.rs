//! Shared infrastructure for the REMEDY workspace: error taxonomy, event
//! bus, configuration, and logging bootstrap.

pub mod config;
pub mod errors;
pub mod event_bus;
pub mod events;
pub mod logging;
pub mod topics;

pub use config::RemedyConfig;
pub use errors::{ErrorSeverity, RemedyError, RemedyResult};
pub use event_bus::{EventBus, EventEnvelope, Topic};
pub use events::PipelineEvent;
