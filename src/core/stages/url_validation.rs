// URL validation stage - checks that every submitted URL is reachable.

use crate::core::moderation::{
    aggregate_verdicts, annotate_item, ContentItem, ContentType, ModerationStage, ProbeOutcome,
    ReachabilityProbe, StageType, Verdict,
};
use async_trait::async_trait;

/// Status codes at or above this are treated as a broken link.
const HTTP_SUCCESS_THRESHOLD: u16 = 400;

pub struct UrlValidationStage<P: ReachabilityProbe> {
    probe: P,
    consume_queue: String,
    queue_rkey: String,
}

impl<P: ReachabilityProbe> UrlValidationStage<P> {
    pub fn new(probe: P, consume_queue: impl Into<String>, queue_rkey: impl Into<String>) -> Self {
        Self {
            probe,
            consume_queue: consume_queue.into(),
            queue_rkey: queue_rkey.into(),
        }
    }

    /// Probe a URL and map what was observed to a verdict plus a reason.
    ///
    /// Returns `None` as the reason when the URL passes.
    pub async fn check_url_accessibility(&self, url: &str) -> (Verdict, Option<String>) {
        let outcome = self.probe.probe(url).await;
        let (verdict, reason) = classify_probe(url, &outcome);

        match verdict {
            Verdict::Pass => tracing::debug!(url, ?outcome, "URL reachable"),
            Verdict::Failed => tracing::info!(url, ?outcome, "URL rejected"),
            _ => tracing::warn!(url, ?outcome, "URL check inconclusive, setting Need_Manual"),
        }

        (verdict, reason)
    }
}

/// Pure mapping from a probe outcome to the stage's verdict.
pub fn classify_probe(url: &str, outcome: &ProbeOutcome) -> (Verdict, Option<String>) {
    match outcome {
        ProbeOutcome::Status(code) if *code < HTTP_SUCCESS_THRESHOLD => (Verdict::Pass, None),
        ProbeOutcome::Status(code) => (Verdict::Failed, Some(format!("{url} returns {code}"))),
        ProbeOutcome::HostNotFound => (
            Verdict::Failed,
            Some(format!("Could not find URL: '{url}'")),
        ),
        ProbeOutcome::ConnectionFailed => (
            Verdict::Failed,
            Some(format!("Error during connection with: '{url}'")),
        ),
        ProbeOutcome::TimedOut => (
            Verdict::NeedManual,
            Some(format!("Timeout error while checking URL: '{url}'")),
        ),
        ProbeOutcome::RequestError(_) => (
            Verdict::NeedManual,
            Some(format!("General request error while checking URL: '{url}'")),
        ),
    }
}

#[async_trait]
impl<P: ReachabilityProbe> ModerationStage for UrlValidationStage<P> {
    fn stage_type(&self) -> StageType {
        StageType::UrlValidation
    }

    fn content_type(&self) -> ContentType {
        ContentType::Url
    }

    fn consume_queue(&self) -> &str {
        &self.consume_queue
    }

    fn queue_rkey(&self) -> &str {
        &self.queue_rkey
    }

    fn name(&self) -> &'static str {
        "UrlValidationStage"
    }

    async fn analyze(&self, items: &mut [ContentItem]) -> Verdict {
        let mut verdicts = Vec::with_capacity(items.len());

        for item in items.iter_mut() {
            let (verdict, reason) = self.check_url_accessibility(&item.value).await;
            annotate_item(self.stage_type(), item, verdict, reason);
            verdicts.push(verdict);
        }

        aggregate_verdicts(verdicts)
    }
}
