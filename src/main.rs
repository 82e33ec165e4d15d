// This is the entry point of the automoderation service.
//
// **Architecture Overview:**
// - `core/` = Moderation logic (thresholds, aggregation, stages, routing ports)
// - `infra/` = Implementations of core traits (Detoxify client, HTTP probe, broker)
// - `worker/` = Consumer tasks and the supervisor that drives them
//
// This file's job is to:
// 1. Load configuration
// 2. Wire the broker, evaluators and stages together
// 3. Start the pipeline and accept messages until shutdown

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with several mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "infra/infra_layer.rs"]
mod infra;
#[path = "worker/worker_layer.rs"]
mod worker;

mod config;

use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::AutomodConfig;
use crate::core::moderation::ModerationMessage;
use crate::core::routing::{DeliveryStream, MessageBroker};
use crate::core::stages::{TextToxicityStage, UrlValidationStage};
use crate::infra::broker::InMemoryBroker;
use crate::infra::detoxify::DetoxifyClient;
use crate::infra::reachability::HttpReachabilityProbe;
use crate::worker::{PipelineError, PipelineSupervisor, RunningPipeline};

const SATURATED_RETRY_DELAY: Duration = Duration::from_millis(50);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging so we can see what's happening
    tracing_subscriber::fmt::init();

    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    let config = AutomodConfig::from_env()?;
    let topology = &config.topology;

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================

    let broker = Arc::new(InMemoryBroker::new(&topology.exchange));
    broker.bind_queue(&topology.text_toxicity_queue, &topology.text_toxicity_rkey);
    broker.bind_queue(&topology.url_validation_queue, &topology.url_validation_rkey);
    broker.bind_queue(&topology.handling_queue, &topology.handling_rkey);

    let detoxify = DetoxifyClient::new(&config.detoxify_service_url, config.detoxify_timeout)?;
    let probe = HttpReachabilityProbe::new(config.url_check_timeout)?;

    let text_stage = TextToxicityStage::new(
        detoxify,
        &topology.text_toxicity_queue,
        &topology.text_toxicity_rkey,
    )?;
    let url_stage = UrlValidationStage::new(
        probe,
        &topology.url_validation_queue,
        &topology.url_validation_rkey,
    );

    let mut supervisor = PipelineSupervisor::new(
        broker.clone() as Arc<dyn MessageBroker>,
        &topology.exchange,
        &topology.handling_rkey,
    )
    .with_max_in_flight(config.max_in_flight);
    supervisor.add_stage(Arc::new(text_stage));
    supervisor.add_stage(Arc::new(url_stage));

    // Handling is downstream of this service; log what would reach it.
    let handled = broker.consume(&topology.handling_queue).await?;
    let drain = tokio::spawn(drain_handling(handled));

    let pipeline = supervisor.start();
    let mut submissions = spawn_stdin_reader();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown requested");
                break;
            }
            line = submissions.recv() => match line {
                Some(line) => submit_line(&pipeline, &line).await,
                // Stdin closed; keep consuming until shutdown.
                None => {
                    tokio::signal::ctrl_c().await?;
                    tracing::info!("Shutdown requested");
                    break;
                }
            },
        }
    }

    pipeline.stop().await;
    drain.abort();

    Ok(())
}

/// Read stdin on its own thread so a pending read never holds up shutdown.
/// Each non-empty line is one JSON-encoded message.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(64);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
        tracing::info!("Stdin closed, no more submissions");
    });
    rx
}

async fn submit_line(pipeline: &RunningPipeline, line: &str) {
    let message: ModerationMessage = match serde_json::from_str(line) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!("Skipping undecodable submission: {}", e);
            return;
        }
    };

    // Stdin has no way to push back, so wait for room instead of dropping.
    loop {
        match pipeline.submit(message.clone()).await {
            Ok(outcome) => {
                tracing::debug!(message_id = %message.id, ?outcome, "Submitted");
                return;
            }
            Err(PipelineError::Saturated { limit }) => {
                tracing::debug!(message_id = %message.id, limit, "Pipeline full, waiting");
                tokio::time::sleep(SATURATED_RETRY_DELAY).await;
            }
            Err(e) => {
                tracing::error!(message_id = %message.id, error = %e, "Failed to submit message");
                return;
            }
        }
    }
}

async fn drain_handling(mut handled: DeliveryStream) {
    while let Some(delivery) = handled.recv().await {
        match serde_json::from_slice::<ModerationMessage>(&delivery.body) {
            Ok(message) => tracing::info!(
                message_id = %message.id,
                disposition = %message.disposition,
                history = ?message.history,
                "Automoderation finished"
            ),
            Err(e) => tracing::warn!("Undecodable message on handling queue: {}", e),
        }
        if let Err(e) = delivery.ack().await {
            tracing::error!("Failed to ack handled message: {}", e);
        }
    }
}
