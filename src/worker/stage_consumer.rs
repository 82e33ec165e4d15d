// Stage consumer - the message-handling steps every stage shares.
//
// decode -> analyze own content slice -> record verdict + history -> ack ->
// forward to the next stage, or finalize to handling when the route ends.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::core::moderation::{record_stage_verdict, ModerationMessage, ModerationStage, Verdict};
use crate::core::routing::{BrokerError, Delivery};

use super::pipeline_context::{HandleOutcome, PipelineContext, PipelineError};

/// Consume the stage's queue until cancelled or the queue closes.
///
/// One message is handled to completion before the next is fetched. A
/// message in flight when cancellation arrives is finished first.
pub async fn run_stage_consumer(
    stage: Arc<dyn ModerationStage>,
    ctx: Arc<PipelineContext>,
    cancel: CancellationToken,
) -> Result<(), BrokerError> {
    let mut deliveries = ctx.broker.consume(stage.consume_queue()).await?;
    tracing::info!(
        stage = %stage.stage_type(),
        queue = stage.consume_queue(),
        "Automoderation module listening"
    );

    loop {
        let delivery = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = deliveries.recv() => match next {
                Some(delivery) => delivery,
                None => {
                    tracing::warn!(queue = stage.consume_queue(), "Queue closed, consumer exiting");
                    break;
                }
            },
        };

        match on_message(stage.as_ref(), &ctx, delivery).await {
            Ok(HandleOutcome::Forwarded(_)) => {}
            Ok(HandleOutcome::Finalized(_) | HandleOutcome::Dropped) => ctx.admission.release(),
            Err(err) => {
                tracing::error!(stage = %stage.stage_type(), error = %err, "Failed to handle message");
                ctx.admission.release();
            }
        }
    }

    tracing::info!(stage = %stage.stage_type(), "Automoderation module stopped");
    Ok(())
}

/// Handle one delivery for `stage`.
pub async fn on_message(
    stage: &dyn ModerationStage,
    ctx: &PipelineContext,
    delivery: Delivery,
) -> Result<HandleOutcome, PipelineError> {
    let mut message: ModerationMessage = match serde_json::from_slice(&delivery.body) {
        Ok(message) => message,
        Err(err) => {
            tracing::warn!(
                delivery_tag = delivery.delivery_tag,
                error = %err,
                "Cannot apply moderation on message due to decoding error, dropping it"
            );
            delivery.reject().await?;
            return Ok(HandleOutcome::Dropped);
        }
    };

    let stage_type = stage.stage_type();
    tracing::info!(message_id = %message.id, stage = %stage_type, "Start analysing content");

    let items = message.items_mut(stage.content_type());
    let verdict = if items.is_empty() {
        tracing::debug!(message_id = %message.id, stage = %stage_type, "No content for this stage, passing");
        Verdict::Pass
    } else {
        stage.analyze(items).await
    };

    record_stage_verdict(&mut message, stage_type, verdict);
    message.history.push(format!("{stage_type}: {verdict}"));
    tracing::info!(message_id = %message.id, stage = %stage_type, %verdict, "Finished analysing content");

    delivery.ack().await?;

    let hop = ctx
        .registry
        .next_hop(&message.route, stage_type)
        .map_err(|err| {
            tracing::error!(
                message_id = %message.id,
                stage = %stage_type,
                error = %err,
                "Route references an unregistered stage, message not forwarded"
            );
            err
        })?;

    ctx.dispatch(hop, message).await
}
