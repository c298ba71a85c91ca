//! Fix generation: strategy dispatch, confidence scoring, and the
//! model-synthesis boundary.

pub mod context;
pub mod generator;
pub mod provider;
pub mod strategies;

pub use context::IssueContext;
pub use generator::{ExpertiseReader, FixGenerator, GenerationOutcome};
pub use provider::{FixSynthesisRequest, FixSynthesisResponse, FixTextProvider, HttpFixProvider};
pub use strategies::{
    ContextAwareStrategy, FixCandidate, FixStrategy, ModelAssistedStrategy, PatternStrategy,
};
