// Pipeline supervisor - registers stages during init, then runs one consumer
// task per stage until shutdown.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::moderation::{ModerationMessage, ModerationStage, StageType};
use crate::core::routing::{MessageBroker, StageRegistry};

use super::pipeline_context::{Admission, HandleOutcome, PipelineContext, PipelineError};
use super::stage_consumer::run_stage_consumer;

/// Init-phase builder. The registry can only change before `start`.
pub struct PipelineSupervisor {
    registry: StageRegistry,
    broker: Arc<dyn MessageBroker>,
    exchange: String,
    handling_rkey: String,
    admission: Admission,
}

impl PipelineSupervisor {
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        exchange: impl Into<String>,
        handling_rkey: impl Into<String>,
    ) -> Self {
        Self {
            registry: StageRegistry::new(),
            broker,
            exchange: exchange.into(),
            handling_rkey: handling_rkey.into(),
            admission: Admission::unlimited(),
        }
    }

    /// Refuse new submissions while `limit` messages are already in flight.
    pub fn with_max_in_flight(mut self, limit: usize) -> Self {
        self.admission = Admission::new(limit);
        self
    }

    /// Register a stage. A second stage of the same type replaces the first.
    pub fn add_stage(&mut self, stage: Arc<dyn ModerationStage>) {
        self.registry.register(stage);
    }

    /// Freeze the registry and spawn every stage's consumer concurrently.
    pub fn start(self) -> RunningPipeline {
        let ctx = Arc::new(PipelineContext {
            registry: self.registry,
            broker: self.broker,
            exchange: self.exchange,
            handling_rkey: self.handling_rkey,
            admission: self.admission,
        });
        let cancel = CancellationToken::new();

        let tasks: Vec<_> = ctx
            .registry
            .stages()
            .map(|stage| {
                let stage_type = stage.stage_type();
                let stage = Arc::clone(stage);
                let task_ctx = Arc::clone(&ctx);
                let token = cancel.child_token();
                let handle = tokio::spawn(async move {
                    if let Err(err) = run_stage_consumer(stage, task_ctx, token).await {
                        tracing::error!(stage = %stage_type, error = %err, "Consumer could not start");
                    }
                });
                (stage_type, handle)
            })
            .collect();

        tracing::info!(stages = tasks.len(), "All automoderation modules started");

        RunningPipeline { ctx, cancel, tasks }
    }
}

/// Handle on a started pipeline.
pub struct RunningPipeline {
    ctx: Arc<PipelineContext>,
    cancel: CancellationToken,
    tasks: Vec<(StageType, JoinHandle<()>)>,
}

impl RunningPipeline {
    /// Send a new message to the first stage of its route. A message with an
    /// empty route is finalized straight to handling.
    ///
    /// Fails with `Saturated` instead of waiting when the in-flight limit is
    /// reached; the caller decides whether to retry.
    pub async fn submit(&self, message: ModerationMessage) -> Result<HandleOutcome, PipelineError> {
        let admission = &self.ctx.admission;
        if !admission.try_admit() {
            return Err(PipelineError::Saturated {
                limit: admission.limit(),
            });
        }

        let result = match self.ctx.registry.first_hop(&message.route) {
            Ok(hop) => self.ctx.dispatch(hop, message).await,
            Err(err) => Err(err.into()),
        };
        if !matches!(result, Ok(HandleOutcome::Forwarded(_))) {
            admission.release();
        }
        result
    }

    #[cfg(test)]
    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.ctx
    }

    /// Cancel every consumer and wait for them to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        for (stage_type, handle) in self.tasks {
            if let Err(err) = handle.await {
                tracing::warn!(stage = %stage_type, error = %err, "Consumer task ended abnormally");
            }
        }
        tracing::debug!("All automoderation modules stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::{ContentType, Disposition, ProbeOutcome, Verdict};
    use crate::core::routing::NextHop;
    use crate::worker::test_support::*;

    fn text_message(id: &str, text: &str) -> ModerationMessage {
        ModerationMessage::new(id, &[StageType::TextToxicity]).with_content(ContentType::Text, &[text])
    }

    #[tokio::test]
    async fn test_clean_text_is_accepted() {
        let harness = Harness::new(&[("This is fine.", vec![0.1])], &[]);
        let pipeline = harness.supervisor().start();

        pipeline
            .submit(text_message("e2e-1", "This is fine."))
            .await
            .unwrap();
        let handled = harness.next_message(HANDLING_QUEUE).await;

        assert_eq!(handled.disposition, Disposition::Accepted);
        assert_eq!(handled.verdict_of(StageType::TextToxicity), Some(Verdict::Pass));
        assert_eq!(handled.history, vec!["Text_Toxicity: Pass".to_string()]);
        pipeline.stop().await;
    }

    #[tokio::test]
    async fn test_toxic_text_rejects_regardless_of_later_stages() {
        let harness = Harness::new(
            &[("Get lost", vec![0.9])],
            &[("https://ok.test", ProbeOutcome::Status(200))],
        );
        let pipeline = harness.supervisor().start();
        let message = ModerationMessage::new("e2e-2", &[StageType::TextToxicity, StageType::UrlValidation])
            .with_content(ContentType::Text, &["Get lost"])
            .with_content(ContentType::Url, &["https://ok.test"]);

        pipeline.submit(message).await.unwrap();
        let handled = harness.next_message(HANDLING_QUEUE).await;

        assert_eq!(handled.disposition, Disposition::Rejected);
        assert_eq!(handled.verdict_of(StageType::UrlValidation), Some(Verdict::Pass));
        let text_failures = handled
            .history
            .iter()
            .filter(|line| *line == "Text_Toxicity: Failed")
            .count();
        assert_eq!(text_failures, 1);
        assert_eq!(handled.items(ContentType::Text)[0].rejected_reasons.len(), 1);
        pipeline.stop().await;
    }

    #[tokio::test]
    async fn test_unknown_host_rejects() {
        let harness = Harness::new(&[], &[("https://nowhere.invalid", ProbeOutcome::HostNotFound)]);
        let pipeline = harness.supervisor().start();
        let message = ModerationMessage::new("e2e-3", &[StageType::UrlValidation])
            .with_content(ContentType::Url, &["https://nowhere.invalid"]);

        pipeline.submit(message).await.unwrap();
        let handled = harness.next_message(HANDLING_QUEUE).await;

        assert_eq!(handled.disposition, Disposition::Rejected);
        let reasons = &handled.items(ContentType::Url)[0].rejected_reasons;
        assert_eq!(reasons.len(), 1);
        assert!(reasons[0].contains("Could not find URL"));
        pipeline.stop().await;
    }

    #[tokio::test]
    async fn test_url_timeout_goes_to_manual_review() {
        let harness = Harness::new(
            &[("Nice post", vec![0.0])],
            &[("https://slow.test", ProbeOutcome::TimedOut)],
        );
        let pipeline = harness.supervisor().start();
        let message = ModerationMessage::new("e2e-4", &[StageType::TextToxicity, StageType::UrlValidation])
            .with_content(ContentType::Text, &["Nice post"])
            .with_content(ContentType::Url, &["https://slow.test"]);

        pipeline.submit(message).await.unwrap();
        let handled = harness.next_message(HANDLING_QUEUE).await;

        assert_eq!(handled.disposition, Disposition::ManualPending);
        assert_eq!(
            handled.history,
            vec![
                "Text_Toxicity: Pass".to_string(),
                "Url_Validation: Need_Manual".to_string()
            ]
        );
        pipeline.stop().await;
    }

    #[tokio::test]
    async fn test_route_order_is_followed() {
        let harness = Harness::new(&[("hi", vec![0.0])], &[]);
        let pipeline = harness.supervisor().start();
        let message = ModerationMessage::new("e2e-5", &[StageType::UrlValidation, StageType::TextToxicity])
            .with_content(ContentType::Text, &["hi"])
            .with_content(ContentType::Url, &["https://ok.test"]);

        pipeline.submit(message).await.unwrap();
        let handled = harness.next_message(HANDLING_QUEUE).await;

        assert_eq!(
            handled.history,
            vec![
                "Url_Validation: Pass".to_string(),
                "Text_Toxicity: Pass".to_string()
            ]
        );
        assert_eq!(handled.disposition, Disposition::Accepted);
        pipeline.stop().await;
    }

    #[tokio::test]
    async fn test_empty_route_is_finalized_on_submit() {
        let harness = Harness::new(&[], &[]);
        let pipeline = harness.supervisor().start();

        let outcome = pipeline
            .submit(ModerationMessage::new("e2e-6", &[]))
            .await
            .unwrap();

        assert_eq!(outcome, HandleOutcome::Finalized(Disposition::Accepted));
        assert_eq!(
            harness.next_message(HANDLING_QUEUE).await.disposition,
            Disposition::Accepted
        );
        pipeline.stop().await;
    }

    #[tokio::test]
    async fn test_registry_is_shared_with_consumers() {
        let harness = Harness::new(&[], &[]);
        let pipeline = harness.supervisor().start();

        let route = ModerationMessage::new("m", &[StageType::TextToxicity, StageType::UrlValidation]).route;
        assert_eq!(
            pipeline.context().registry.next_hop(&route, StageType::TextToxicity),
            Ok(NextHop::Stage(URL_RKEY.to_string()))
        );
        pipeline.stop().await;
    }

    #[tokio::test]
    async fn test_stop_ends_all_consumers() {
        let harness = Harness::new(&[], &[]);
        let pipeline = harness.supervisor().start();

        tokio::time::timeout(std::time::Duration::from_secs(5), pipeline.stop())
            .await
            .expect("consumers should stop promptly after cancellation");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_opposite_routes_do_not_stall_each_other() {
        let harness = Harness::new(&[], &[]);
        let pipeline = harness.supervisor().with_max_in_flight(2).start();
        let total = 40;

        for i in 0..total {
            let route = if i % 2 == 0 {
                [StageType::TextToxicity, StageType::UrlValidation]
            } else {
                [StageType::UrlValidation, StageType::TextToxicity]
            };
            let message = ModerationMessage::new(format!("load-{i}"), &route)
                .with_content(ContentType::Text, &["hello"])
                .with_content(ContentType::Url, &["https://ok.test"]);

            loop {
                match pipeline.submit(message.clone()).await {
                    Ok(_) => break,
                    Err(PipelineError::Saturated { limit }) => {
                        assert_eq!(limit, 2);
                        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                    }
                    Err(err) => panic!("unexpected submit error: {err}"),
                }
            }
        }

        for _ in 0..total {
            let handled = harness.next_message(HANDLING_QUEUE).await;
            assert_eq!(handled.history.len(), 2);
        }

        let admission = &pipeline.context().admission;
        for _ in 0..100 {
            if admission.in_flight() == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(admission.in_flight(), 0);
        pipeline.stop().await;
    }

    #[tokio::test]
    async fn test_submit_refuses_when_saturated() {
        let harness = Harness::new(&[("hello", vec![0.0])], &[]);
        // Hold the text queue so the text consumer never sees the message.
        assert!(harness.try_next_message(TEXT_QUEUE).await.is_none());
        let pipeline = harness.supervisor().with_max_in_flight(1).start();

        let first = pipeline.submit(text_message("held", "hello")).await.unwrap();
        assert_eq!(first, HandleOutcome::Forwarded(TEXT_RKEY.to_string()));

        let second = pipeline.submit(text_message("refused", "hello")).await;
        assert!(matches!(second, Err(PipelineError::Saturated { limit: 1 })));
        assert_eq!(harness.next_message(TEXT_QUEUE).await.id, "held");
        pipeline.stop().await;
    }

    #[tokio::test]
    async fn test_failed_submit_gives_its_slot_back() {
        let harness = Harness::new(&[], &[]);
        let mut supervisor = PipelineSupervisor::new(harness.broker.clone(), EXCHANGE, HANDLING_RKEY)
            .with_max_in_flight(1);
        supervisor.add_stage(Arc::clone(&harness.text_stage));
        let pipeline = supervisor.start();

        let unregistered = ModerationMessage::new("no-url-stage", &[StageType::UrlValidation]);
        assert!(matches!(
            pipeline.submit(unregistered).await,
            Err(PipelineError::Routing(_))
        ));
        assert_eq!(pipeline.context().admission.in_flight(), 0);

        let finalized = pipeline.submit(ModerationMessage::new("empty", &[])).await;
        assert_eq!(finalized.unwrap(), HandleOutcome::Finalized(Disposition::Accepted));
        assert_eq!(pipeline.context().admission.in_flight(), 0);
        pipeline.stop().await;
    }
}
