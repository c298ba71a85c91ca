use crate::context::IssueContext;
use crate::provider::{FixSynthesisRequest, FixTextProvider};
use crate::strategies::{FixCandidate, FixStrategy};
use async_trait::async_trait;
use common::errors::RemedyResult;
use remedy_core::{FixPayload, Issue, SourceSpan, StrategyKind};
use std::sync::Arc;
use tracing::warn;

/// Delegates synthesis to the external text-generation collaborator.
/// Provider exhaustion is not an error here: the strategy declines and
/// the generator falls through to whatever ranks next.
pub struct ModelAssistedStrategy {
    provider: Arc<dyn FixTextProvider>,
}

impl ModelAssistedStrategy {
    pub fn new(provider: Arc<dyn FixTextProvider>) -> Self {
        Self { provider }
    }

    fn request_for(issue: &Issue, ctx: &IssueContext) -> FixSynthesisRequest {
        FixSynthesisRequest {
            issue_description: format!(
                "{} at {}:{}",
                issue.category.domain(),
                issue.file_path.display(),
                ctx.line_number
            ),
            code_context: ctx.as_snippet(),
            strategy_hint: StrategyKind::ModelAssisted.as_str().to_string(),
        }
    }
}

#[async_trait]
impl FixStrategy for ModelAssistedStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ModelAssisted
    }

    async fn propose(
        &self,
        issue: &Issue,
        ctx: &IssueContext,
    ) -> RemedyResult<Option<FixCandidate>> {
        let request = Self::request_for(issue, ctx);
        let response = match self.provider.synthesize(&request).await {
            Ok(r) => r,
            Err(e) => {
                warn!(issue_id = %issue.id, error = %e, "model synthesis unavailable, declining");
                return Ok(None);
            }
        };

        let replacement = response.fix_text.trim_end().to_string();
        if replacement.is_empty() || replacement == ctx.defect_line {
            return Ok(None);
        }

        let span = SourceSpan::single_line(
            ctx.line_number,
            1,
            ctx.defect_line.chars().count().max(1) as u32,
        );
        Ok(Some(FixCandidate {
            payload: FixPayload {
                original: ctx.defect_line.clone(),
                replacement,
                span,
            },
            intrinsic_confidence: response.confidence.clamp(0.0, 1.0),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::FixSynthesisResponse;
    use common::errors::RemedyError;
    use remedy_core::{IssueCategory, Severity};

    struct CannedProvider {
        result: RemedyResult<FixSynthesisResponse>,
    }

    #[async_trait]
    impl FixTextProvider for CannedProvider {
        async fn synthesize(
            &self,
            _request: &FixSynthesisRequest,
        ) -> RemedyResult<FixSynthesisResponse> {
            match &self.result {
                Ok(r) => Ok(r.clone()),
                Err(e) => Err(RemedyError::Provider(e.to_string())),
            }
        }
    }

    fn fixture() -> (Issue, IssueContext) {
        let content = "let v = risky().unwrap();\n";
        let issue = Issue::new(
            "src/app.rs",
            SourceSpan::single_line(1, 1, 10),
            IssueCategory::NullDereference,
            Severity::High,
            "heuristic",
        );
        let ctx = IssueContext::extract(&issue, content).expect("context");
        (issue, ctx)
    }

    #[tokio::test]
    async fn synthesized_text_becomes_a_candidate() {
        let strategy = ModelAssistedStrategy::new(Arc::new(CannedProvider {
            result: Ok(FixSynthesisResponse {
                fix_text: "let v = risky().unwrap_or_default();\n".into(),
                confidence: 0.8,
            }),
        }));
        let (issue, ctx) = fixture();
        let candidate = strategy
            .propose(&issue, &ctx)
            .await
            .expect("propose")
            .expect("candidate");
        assert_eq!(candidate.intrinsic_confidence, 0.8);
        assert!(!candidate.payload.replacement.ends_with('\n'));
    }

    #[tokio::test]
    async fn provider_failure_degrades_to_decline() {
        let strategy = ModelAssistedStrategy::new(Arc::new(CannedProvider {
            result: Err(RemedyError::Provider("offline".into())),
        }));
        let (issue, ctx) = fixture();
        let candidate = strategy.propose(&issue, &ctx).await.expect("propose");
        assert!(candidate.is_none());
    }

    #[tokio::test]
    async fn echoed_input_is_not_a_fix() {
        let (issue, ctx) = fixture();
        let strategy = ModelAssistedStrategy::new(Arc::new(CannedProvider {
            result: Ok(FixSynthesisResponse {
                fix_text: ctx.defect_line.clone(),
                confidence: 0.99,
            }),
        }));
        let candidate = strategy.propose(&issue, &ctx).await.expect("propose");
        assert!(candidate.is_none());
    }
}
