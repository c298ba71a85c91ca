use crate::context::IssueContext;
use async_trait::async_trait;
use common::errors::RemedyResult;
use remedy_core::{FixPayload, Issue, StrategyKind};

pub mod context_aware;
pub mod model;
pub mod pattern;

pub use context_aware::ContextAwareStrategy;
pub use model::ModelAssistedStrategy;
pub use pattern::PatternStrategy;

/// What a strategy proposes before confidence blending and safety
/// classification.
#[derive(Debug, Clone)]
pub struct FixCandidate {
    pub payload: FixPayload,
    /// The strategy's own certainty, before the domain's expertise weight
    /// is blended in.
    pub intrinsic_confidence: f64,
}

/// Uniform contract over the strategy variants. A strategy either returns
/// a candidate or declines with `Ok(None)`; errors are reserved for
/// infrastructure failures, not for "no idea".
#[async_trait]
pub trait FixStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn propose(
        &self,
        issue: &Issue,
        ctx: &IssueContext,
    ) -> RemedyResult<Option<FixCandidate>>;
}
