use crate::fix::StrategyKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// (strategy, issue domain) pair keying an expertise weight.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DomainKey {
    pub strategy: StrategyKind,
    pub domain: String,
}

impl DomainKey {
    pub fn new(strategy: StrategyKind, domain: impl Into<String>) -> Self {
        Self {
            strategy,
            domain: domain.into(),
        }
    }
}

/// Smoothed historical effectiveness of a strategy within a domain.
///
/// Mutated exclusively through [`ExpertiseScore::apply_step`], which bounds
/// every update so a single outlier outcome cannot swing the weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpertiseScore {
    pub key: DomainKey,
    pub weight: f64,
    pub sample_count: u64,
    pub last_updated: DateTime<Utc>,
}

/// Neutral prior for a strategy/domain pair never seen before.
pub const INITIAL_WEIGHT: f64 = 0.5;

impl ExpertiseScore {
    pub fn new(key: DomainKey) -> Self {
        Self {
            key,
            weight: INITIAL_WEIGHT,
            sample_count: 0,
            last_updated: Utc::now(),
        }
    }

    /// Apply one bounded, smoothed step. `delta` is the requested signed
    /// step; the effective step is capped at `max_fraction` of the distance
    /// to the nearest bound in the step's direction, and the result is
    /// clamped to [0, 1].
    pub fn apply_step(&mut self, delta: f64, max_fraction: f64) {
        let max_fraction = max_fraction.clamp(0.0, 1.0);
        let headroom = if delta >= 0.0 {
            1.0 - self.weight
        } else {
            self.weight
        };
        let cap = headroom * max_fraction;
        let step = delta.clamp(-cap, cap);
        self.weight = (self.weight + step).clamp(0.0, 1.0);
        self.sample_count += 1;
        self.last_updated = Utc::now();
    }
}
