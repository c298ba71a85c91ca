use crate::context::IssueContext;
use crate::strategies::{FixCandidate, FixStrategy};
use async_trait::async_trait;
use common::errors::RemedyResult;
use remedy_core::{FixPayload, Issue, IssueCategory, SourceSpan, StrategyKind};
use tracing::trace;

/// Mechanical template rewrites keyed by issue category. No analysis of
/// the surrounding code, so the intrinsic confidence stays conservative.
/// Declines on categories where a blind rewrite can change semantics.
pub struct PatternStrategy;

struct Rewrite {
    replacement_line: String,
    confidence: f64,
}

impl PatternStrategy {
    pub fn new() -> Self {
        Self
    }

    fn rewrite(category: &IssueCategory, line: &str) -> Option<Rewrite> {
        match category {
            IssueCategory::NullDereference if line.contains(".unwrap()") => Some(Rewrite {
                replacement_line: line.replace(".unwrap()", ".unwrap_or_default()"),
                confidence: 0.85,
            }),
            IssueCategory::UnhandledError if line.contains(".ok();") => Some(Rewrite {
                replacement_line: line.replace(".ok();", "?;"),
                confidence: 0.7,
            }),
            IssueCategory::ResourceLeak if line.contains("mem::forget(") => Some(Rewrite {
                replacement_line: line.replace("mem::forget(", "mem::drop("),
                confidence: 0.75,
            }),
            // Dynamic code construction has no safe mechanical template
            IssueCategory::UnsafePattern => None,
            _ => None,
        }
    }
}

impl Default for PatternStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FixStrategy for PatternStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Pattern
    }

    async fn propose(
        &self,
        issue: &Issue,
        ctx: &IssueContext,
    ) -> RemedyResult<Option<FixCandidate>> {
        let Some(rewrite) = Self::rewrite(&issue.category, &ctx.defect_line) else {
            trace!(domain = issue.category.domain(), "no template for category");
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
                replacement: rewrite.replacement_line,
                span,
            },
            intrinsic_confidence: rewrite.confidence,
        }))
    }
}
