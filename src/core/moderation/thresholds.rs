// Threshold classifier - turns a continuous score into a discrete verdict.

use super::moderation_models::Verdict;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ThresholdError {
    #[error("Threshold policy '{0}' has no rules")]
    Empty(&'static str),

    #[error("Threshold policy '{policy}' has a non-finite threshold")]
    NonFinite { policy: &'static str },

    #[error("Threshold policy '{policy}' declares threshold {threshold} twice")]
    Duplicate { policy: &'static str, threshold: f64 },
}

/// Associates a lower bound with the verdict it yields.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdRule {
    pub threshold: f64,
    pub verdict: Verdict,
}

impl ThresholdRule {
    pub const fn new(threshold: f64, verdict: Verdict) -> Self {
        Self { threshold, verdict }
    }
}

/// Detoxify toxicity policy:
/// [0, 0.25) -> Pass, [0.25, 0.75) -> Need_Manual, [0.75, inf) -> Failed.
pub const DETOXIFY_TOXICITY_RULES: [ThresholdRule; 3] = [
    ThresholdRule::new(0.0, Verdict::Pass),
    ThresholdRule::new(0.25, Verdict::NeedManual),
    ThresholdRule::new(0.75, Verdict::Failed),
];

/// A named, immutable set of rules, sorted descending by threshold once at
/// construction so matching is a single scan.
#[derive(Debug, Clone)]
pub struct ThresholdPolicy {
    name: &'static str,
    rules: Vec<ThresholdRule>,
}

impl ThresholdPolicy {
    pub fn new(name: &'static str, rules: &[ThresholdRule]) -> Result<Self, ThresholdError> {
        if rules.is_empty() {
            return Err(ThresholdError::Empty(name));
        }
        if rules.iter().any(|rule| !rule.threshold.is_finite()) {
            return Err(ThresholdError::NonFinite { policy: name });
        }

        let mut rules = rules.to_vec();
        rules.sort_by(|a, b| b.threshold.total_cmp(&a.threshold));

        if let Some(pair) = rules.windows(2).find(|w| w[0].threshold == w[1].threshold) {
            return Err(ThresholdError::Duplicate {
                policy: name,
                threshold: pair[0].threshold,
            });
        }

        Ok(Self { name, rules })
    }

    pub fn detoxify_toxicity() -> Result<Self, ThresholdError> {
        Self::new("detoxify_toxicity", &DETOXIFY_TOXICITY_RULES)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Verdict of the rule with the highest threshold that is <= `score`.
    ///
    /// Returns `None` when the score is below every threshold (or NaN); the
    /// caller picks the fallback.
    pub fn match_score(&self, score: f64) -> Option<Verdict> {
        self.rules
            .iter()
            .find(|rule| score >= rule.threshold)
            .map(|rule| rule.verdict)
    }
}
