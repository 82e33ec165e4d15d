// Stage module contract - one implementation per moderation category.

use super::moderation_models::{ContentItem, ContentType, ModerationMessage, StageType, Verdict};
use super::status::aggregate_verdicts;
use async_trait::async_trait;

/// A moderation stage: owns a content type, an inbound queue and the routing
/// key other stages use to reach it.
///
/// Only `analyze` varies between stages. Decoding, recording, acknowledging
/// and forwarding are shared and live in the worker layer.
#[async_trait]
pub trait ModerationStage: Send + Sync {
    fn stage_type(&self) -> StageType;

    fn content_type(&self) -> ContentType;

    /// Queue this stage consumes from.
    fn consume_queue(&self) -> &str;

    /// Routing key that delivers to `consume_queue` on the shared exchange.
    fn queue_rkey(&self) -> &str;

    /// Implementation name, used when a registration replaces another.
    fn name(&self) -> &'static str;

    /// Evaluate `items`, append rejection reasons to the ones that did not
    /// pass, and return the merged stage verdict.
    async fn analyze(&self, items: &mut [ContentItem]) -> Verdict;
}

/// Build the human-readable reason attached to an item that did not pass.
pub fn rejection_reason(stage_type: StageType, verdict: Verdict, infos: &[String]) -> String {
    let mut reason = format!(
        "[Automoderation] - {} stage evaluated this content as [{}]",
        stage_type, verdict
    );
    if !infos.is_empty() {
        reason.push_str(": ");
        reason.push_str(&infos.join("\n"));
    }
    reason
}

/// Append a rejection reason to `item` unless it passed.
pub fn annotate_item(
    stage_type: StageType,
    item: &mut ContentItem,
    verdict: Verdict,
    diagnostic: Option<String>,
) {
    if verdict == Verdict::Pass {
        return;
    }
    let infos: Vec<String> = diagnostic.into_iter().collect();
    item.rejected_reasons
        .push(rejection_reason(stage_type, verdict, &infos));
}

/// Write `verdict` into every route entry owned by `stage_type`.
///
/// A pending entry is overwritten. An entry that already carries a verdict
/// (e.g. a redelivered message) is merged so it never becomes less severe.
pub fn record_stage_verdict(message: &mut ModerationMessage, stage_type: StageType, verdict: Verdict) {
    for entry in message
        .route
        .iter_mut()
        .filter(|entry| entry.stage_type == stage_type)
    {
        if entry.verdict == Verdict::Pending {
            entry.verdict = verdict;
        } else {
            let merged = aggregate_verdicts([entry.verdict, verdict]);
            tracing::warn!(
                message_id = %message.id,
                stage = %stage_type,
                previous = %entry.verdict,
                new = %verdict,
                merged = %merged,
                "Route entry already had a verdict, merging"
            );
            entry.verdict = merged;
        }
    }
}
