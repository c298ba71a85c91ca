use crate::context::IssueContext;
use crate::strategies::{FixCandidate, FixStrategy};
use async_trait::async_trait;
use common::errors::RemedyResult;
use remedy_core::{FixPayload, Issue, IssueCategory, SourceSpan, StrategyKind};

/// Rewrites that depend on what the surrounding lines allow. When the
/// enclosing function is fallible, failures propagate with `?` instead of
/// being papered over with a default value, which is a stronger fix than
/// the mechanical template can offer.
pub struct ContextAwareStrategy;

impl ContextAwareStrategy {
    pub fn new() -> Self {
        Self
    }

    fn rewrite(category: &IssueCategory, ctx: &IssueContext) -> Option<(String, f64)> {
        if !ctx.in_fallible_context() {
            return None;
        }
        let line = ctx.defect_line.as_str();
        match category {
            IssueCategory::NullDereference if line.contains(".unwrap()") => {
                Some((line.replace(".unwrap()", "?"), 0.9))
            }
            IssueCategory::UnhandledError if line.contains(".ok();") => {
                Some((line.replace(".ok();", "?;"), 0.85))
            }
            _ => None,
        }
    }
}

impl Default for ContextAwareStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FixStrategy for ContextAwareStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ContextAware
    }

    async fn propose(
        &self,
        issue: &Issue,
        ctx: &IssueContext,
    ) -> RemedyResult<Option<FixCandidate>> {
        let Some((replacement, confidence)) = Self::rewrite(&issue.category, ctx) else {
            return Ok(None);
        };
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
            intrinsic_confidence: confidence,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remedy_core::Severity;

    fn fixture(content: &str, line: u32) -> (Issue, IssueContext) {
        let issue = Issue::new(
            "src/app.rs",
            SourceSpan::single_line(line, 1, 10),
            IssueCategory::NullDereference,
            Severity::High,
            "heuristic",
        );
        let ctx = IssueContext::extract(&issue, content).expect("context");
        (issue, ctx)
    }

    #[tokio::test]
    async fn propagates_with_question_mark_in_fallible_fn() {
        let content = "fn load() -> Result<Config, Error> {\n    let cfg = read().unwrap();\n    Ok(cfg)\n}\n";
        let (issue, ctx) = fixture(content, 2);
        let candidate = ContextAwareStrategy::new()
            .propose(&issue, &ctx)
            .await
            .expect("propose")
            .expect("candidate");
        assert!(candidate.payload.replacement.contains("read()?"));
        assert!(candidate.intrinsic_confidence > 0.85);
    }

    #[tokio::test]
    async fn declines_outside_fallible_context() {
        let content = "fn main() {\n    let cfg = read().unwrap();\n}\n";
        let (issue, ctx) = fixture(content, 2);
        let candidate = ContextAwareStrategy::new()
            .propose(&issue, &ctx)
            .await
            .expect("propose");
        assert!(candidate.is_none());
    }
}
