// Evaluator ports - the external services a stage consults per item.
//
// Infra provides the HTTP implementations; tests provide mocks.

use async_trait::async_trait;
use thiserror::Error;

/// Faults from an external evaluator. Stages never escalate these to
/// `Failed`: they always resolve to `Need_Manual`.
#[derive(Debug, Error)]
pub enum EvaluatorError {
    #[error("Evaluator timed out")]
    Timeout,

    #[error("Evaluator request failed: {0}")]
    Request(String),

    #[error("Evaluator returned status {0}")]
    Status(u16),

    #[error("Evaluator returned malformed data: {0}")]
    Malformed(String),
}

/// Scores a plain-text string for toxicity.
#[async_trait]
pub trait ToxicityScorer: Send + Sync {
    /// Returns one toxicity score in [0, 1] per scored segment of `text`.
    /// An empty list means the service had nothing to say.
    async fn score(&self, text: &str) -> Result<Vec<f64>, EvaluatorError>;
}

// Blanket implementation so stages can hold `Box<dyn ToxicityScorer>`.
#[async_trait]
impl ToxicityScorer for Box<dyn ToxicityScorer> {
    async fn score(&self, text: &str) -> Result<Vec<f64>, EvaluatorError> {
        (**self).score(text).await
    }
}

/// What a reachability probe observed for one URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The server answered with this HTTP status (after redirects).
    Status(u16),
    /// The host name does not resolve.
    HostNotFound,
    /// The host resolves but the connection could not be made.
    ConnectionFailed,
    TimedOut,
    /// Any other request fault, e.g. an unparseable URL.
    RequestError(String),
}

/// Lightweight HEAD-style reachability check.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(&self, url: &str) -> ProbeOutcome;
}

#[async_trait]
impl ReachabilityProbe for Box<dyn ReachabilityProbe> {
    async fn probe(&self, url: &str) -> ProbeOutcome {
        (**self).probe(url).await
    }
}
