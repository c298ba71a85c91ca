use crate::context::IssueContext;
use crate::strategies::FixStrategy;
use common::config::GeneratorConfig;
use common::errors::RemedyResult;
use infra::ResultCache;
use remedy_core::{DomainKey, Fix, FixPayload, Issue, StrategyKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Read-only view of expertise weights. The learning service owns the
/// mutable scores; generation only ranks against a snapshot of them.
pub trait ExpertiseReader: Send + Sync {
    fn weight(&self, key: &DomainKey) -> f64;
}

/// What generation produced for an issue. `Declined` means no strategy
/// had a viable candidate and the issue stays flagged for manual review.
#[derive(Debug)]
pub enum GenerationOutcome {
    Generated(Fix),
    Declined,
}

/// Memoized result of a successful generation, keyed by the content
/// fingerprint so an unchanged defect skips strategy dispatch entirely.
#[derive(Debug, Serialize, Deserialize)]
struct CachedCandidate {
    strategy: StrategyKind,
    payload: FixPayload,
    confidence: f64,
}

const GENERATION_CACHE_TTL: Duration = Duration::from_secs(6 * 60 * 60);

/// Dispatches fix strategies in descending order of domain expertise and
/// blends each candidate's intrinsic certainty with the domain weight.
pub struct FixGenerator {
    strategies: Vec<Arc<dyn FixStrategy>>,
    expertise: Arc<dyn ExpertiseReader>,
    cache: Arc<ResultCache>,
    config: GeneratorConfig,
}

impl FixGenerator {
    pub fn new(
        strategies: Vec<Arc<dyn FixStrategy>>,
        expertise: Arc<dyn ExpertiseReader>,
        cache: Arc<ResultCache>,
        config: GeneratorConfig,
    ) -> Self {
        Self {
            strategies,
            expertise,
            cache,
            config,
        }
    }

    /// Generate a fix for `issue` against the file's current `content`.
    pub async fn generate(&self, issue: &Issue, content: &str) -> RemedyResult<GenerationOutcome> {
        let Some(ctx) = IssueContext::extract(issue, content) else {
            debug!(issue_id = %issue.id, "recorded location is stale, declining");
            return Ok(GenerationOutcome::Declined);
        };

        let cache_key = self.fingerprint(issue, &ctx);
        if let Some(cached) = self.cache.get_typed::<CachedCandidate>(&cache_key) {
            debug!(issue_id = %issue.id, strategy = cached.strategy.as_str(), "generation cache hit");
            let fix = Fix::new(issue.id, cached.strategy, cached.payload, cached.confidence)?;
            return Ok(GenerationOutcome::Generated(fix));
        }

        let mut best: Option<(StrategyKind, crate::strategies::FixCandidate, f64)> = None;
        for strategy in self.ranked_strategies(issue) {
            let Some(candidate) = strategy.propose(issue, &ctx).await? else {
                continue;
            };
            let blended = self.blend(issue, strategy.kind(), candidate.intrinsic_confidence);
            if blended >= self.config.acceptance_floor {
                return self.accept(issue, strategy.kind(), candidate, blended, &cache_key);
            }
            let better = best
                .as_ref()
                .map(|(_, _, b)| blended > *b)
                .unwrap_or(true);
            if better {
                best = Some((strategy.kind(), candidate, blended));
            }
        }

        match best {
            Some((kind, candidate, blended)) => {
                self.accept(issue, kind, candidate, blended, &cache_key)
            }
            None => {
                info!(issue_id = %issue.id, domain = issue.category.domain(), "no strategy produced a candidate");
                Ok(GenerationOutcome::Declined)
            }
        }
    }

    fn accept(
        &self,
        issue: &Issue,
        kind: StrategyKind,
        candidate: crate::strategies::FixCandidate,
        confidence: f64,
        cache_key: &str,
    ) -> RemedyResult<GenerationOutcome> {
        let cached = CachedCandidate {
            strategy: kind,
            payload: candidate.payload.clone(),
            confidence,
        };
        self.cache
            .set_typed(cache_key, &cached, GENERATION_CACHE_TTL);

        let fix = Fix::new(issue.id, kind, candidate.payload, confidence)?;
        info!(issue_id = %issue.id, fix_id = %fix.id, strategy = kind.as_str(), confidence, "fix candidate accepted");
        Ok(GenerationOutcome::Generated(fix))
    }

    /// Strategies ordered by the domain's current expertise weight, highest
    /// first. Ties keep registration order.
    fn ranked_strategies(&self, issue: &Issue) -> Vec<Arc<dyn FixStrategy>> {
        let mut ranked: Vec<(f64, Arc<dyn FixStrategy>)> = self
            .strategies
            .iter()
            .map(|s| {
                let key = DomainKey::new(s.kind(), issue.category.domain());
                (self.expertise.weight(&key), Arc::clone(s))
            })
            .collect();
        ranked.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        ranked.into_iter().map(|(_, s)| s).collect()
    }

    fn blend(&self, issue: &Issue, kind: StrategyKind, intrinsic: f64) -> f64 {
        let key = DomainKey::new(kind, issue.category.domain());
        let expertise = self.expertise.weight(&key).clamp(0.0, 1.0);
        let w = self.config.intrinsic_blend.clamp(0.0, 1.0);
        (intrinsic.clamp(0.0, 1.0) * w + expertise * (1.0 - w)).clamp(0.0, 1.0)
    }

    fn fingerprint(&self, issue: &Issue, ctx: &IssueContext) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(ctx.as_snippet().as_bytes());
        hasher.update(issue.category.domain().as_bytes());
        hasher.update(&issue.location.start_line.to_le_bytes());
        format!("gen:{}", hasher.finalize().to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::{ContextAwareStrategy, FixCandidate, PatternStrategy};
    use async_trait::async_trait;
    use remedy_core::{IssueCategory, Severity, SourceSpan};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedExpertise(HashMap<(StrategyKind, String), f64>);

    impl ExpertiseReader for FixedExpertise {
        fn weight(&self, key: &DomainKey) -> f64 {
            self.0
                .get(&(key.strategy, key.domain.clone()))
                .copied()
                .unwrap_or(remedy_core::INITIAL_WEIGHT)
        }
    }

    struct CountingStrategy {
        kind: StrategyKind,
        confidence: Option<f64>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FixStrategy for CountingStrategy {
        fn kind(&self) -> StrategyKind {
            self.kind
        }

        async fn propose(
            &self,
            _issue: &Issue,
            ctx: &IssueContext,
        ) -> RemedyResult<Option<FixCandidate>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.confidence.map(|c| FixCandidate {
                payload: FixPayload {
                    original: ctx.defect_line.clone(),
                    replacement: format!("{} // fixed", ctx.defect_line),
                    span: SourceSpan::single_line(ctx.line_number, 1, 10),
                },
                intrinsic_confidence: c,
            }))
        }
    }

    fn issue() -> Issue {
        Issue::new(
            "src/app.rs",
            SourceSpan::single_line(1, 1, 10),
            IssueCategory::NullDereference,
            Severity::High,
            "heuristic",
        )
    }

    fn generator_with(
        strategies: Vec<Arc<dyn FixStrategy>>,
        weights: HashMap<(StrategyKind, String), f64>,
    ) -> FixGenerator {
        FixGenerator::new(
            strategies,
            Arc::new(FixedExpertise(weights)),
            Arc::new(ResultCache::in_memory()),
            GeneratorConfig::default(),
        )
    }

    #[tokio::test]
    async fn first_candidate_over_the_floor_wins() {
        let strong = Arc::new(CountingStrategy {
            kind: StrategyKind::Pattern,
            confidence: Some(0.95),
            calls: AtomicUsize::new(0),
        });
        let never_reached = Arc::new(CountingStrategy {
            kind: StrategyKind::ContextAware,
            confidence: Some(0.9),
            calls: AtomicUsize::new(0),
        });
        let mut weights = HashMap::new();
        weights.insert((StrategyKind::Pattern, "null-dereference".to_string()), 0.9);
        weights.insert(
            (StrategyKind::ContextAware, "null-dereference".to_string()),
            0.1,
        );

        let generator = generator_with(
            vec![never_reached.clone(), strong.clone()],
            weights,
        );
        let outcome = generator
            .generate(&issue(), "x.unwrap();\n")
            .await
            .expect("generate");

        match outcome {
            GenerationOutcome::Generated(fix) => {
                assert_eq!(fix.strategy, StrategyKind::Pattern);
                // blend: 0.95 * 0.7 + 0.9 * 0.3 = 0.935
                assert!((fix.confidence - 0.935).abs() < 1e-9);
            }
            GenerationOutcome::Declined => panic!("expected a fix"),
        }
        assert_eq!(strong.calls.load(Ordering::SeqCst), 1);
        assert_eq!(never_reached.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn below_floor_falls_back_to_best_candidate() {
        let weak = Arc::new(CountingStrategy {
            kind: StrategyKind::Pattern,
            confidence: Some(0.4),
            calls: AtomicUsize::new(0),
        });
        let weaker = Arc::new(CountingStrategy {
            kind: StrategyKind::ContextAware,
            confidence: Some(0.3),
            calls: AtomicUsize::new(0),
        });
        let generator = generator_with(vec![weak, weaker], HashMap::new());
        let outcome = generator
            .generate(&issue(), "x.unwrap();\n")
            .await
            .expect("generate");

        match outcome {
            GenerationOutcome::Generated(fix) => {
                assert_eq!(fix.strategy, StrategyKind::Pattern);
                assert!(fix.confidence < GeneratorConfig::default().acceptance_floor);
            }
            GenerationOutcome::Declined => panic!("best candidate should survive"),
        }
    }

    #[tokio::test]
    async fn all_strategies_declining_declines_generation() {
        let mute = Arc::new(CountingStrategy {
            kind: StrategyKind::Pattern,
            confidence: None,
            calls: AtomicUsize::new(0),
        });
        let generator = generator_with(vec![mute], HashMap::new());
        let outcome = generator
            .generate(&issue(), "x.unwrap();\n")
            .await
            .expect("generate");
        assert!(matches!(outcome, GenerationOutcome::Declined));
    }

    #[tokio::test]
    async fn repeated_generation_hits_the_cache() {
        let strategy = Arc::new(CountingStrategy {
            kind: StrategyKind::Pattern,
            confidence: Some(0.95),
            calls: AtomicUsize::new(0),
        });
        let mut weights = HashMap::new();
        weights.insert((StrategyKind::Pattern, "null-dereference".to_string()), 0.9);
        let generator = generator_with(vec![strategy.clone()], weights);

        let first = issue();
        generator
            .generate(&first, "x.unwrap();\n")
            .await
            .expect("generate");
        generator
            .generate(&first, "x.unwrap();\n")
            .await
            .expect("generate");
        assert_eq!(strategy.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn real_strategies_cover_the_unwrap_case() {
        let generator = generator_with(
            vec![
                Arc::new(PatternStrategy::new()),
                Arc::new(ContextAwareStrategy::new()),
            ],
            HashMap::new(),
        );
        let content = "fn load() -> Result<u32, E> {\n    let v = read().unwrap();\n    Ok(v)\n}\n";
        let mut at_line_two = issue();
        at_line_two.location = SourceSpan::single_line(2, 1, 10);
        let outcome = generator
            .generate(&at_line_two, content)
            .await
            .expect("generate");
        assert!(matches!(outcome, GenerationOutcome::Generated(_)));
    }
}
