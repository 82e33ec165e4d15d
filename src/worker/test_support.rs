// Shared fixtures for the worker tests: scripted evaluators and a broker
// wired with the standard topology.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::core::moderation::{
    EvaluatorError, ModerationMessage, ModerationStage, ProbeOutcome, ReachabilityProbe,
    ToxicityScorer,
};
use crate::core::routing::{Delivery, DeliveryStream, MessageBroker, StageRegistry};
use crate::core::stages::{TextToxicityStage, UrlValidationStage};
use crate::infra::broker::InMemoryBroker;

use super::pipeline_context::{Admission, PipelineContext};
use super::supervisor::PipelineSupervisor;

pub const EXCHANGE: &str = "moderation";
pub const TEXT_QUEUE: &str = "q-text";
pub const TEXT_RKEY: &str = "to.text";
pub const URL_QUEUE: &str = "q-url";
pub const URL_RKEY: &str = "to.url";
pub const HANDLING_QUEUE: &str = "q-handling";
pub const HANDLING_RKEY: &str = "to.handling";

/// Answers from a fixed table; unknown texts are a scorer fault.
pub struct ScriptedScorer {
    scores: HashMap<String, Vec<f64>>,
}

#[async_trait]
impl ToxicityScorer for ScriptedScorer {
    async fn score(&self, text: &str) -> Result<Vec<f64>, EvaluatorError> {
        self.scores
            .get(text)
            .cloned()
            .ok_or_else(|| EvaluatorError::Request(format!("unscripted text '{text}'")))
    }
}

/// Answers from a fixed table; unknown URLs answer 200.
pub struct ScriptedProbe {
    outcomes: HashMap<String, ProbeOutcome>,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ReachabilityProbe for ScriptedProbe {
    async fn probe(&self, url: &str) -> ProbeOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcomes
            .get(url)
            .cloned()
            .unwrap_or(ProbeOutcome::Status(200))
    }
}

pub struct Harness {
    pub broker: Arc<InMemoryBroker>,
    pub text_stage: Arc<dyn ModerationStage>,
    pub url_stage: Arc<dyn ModerationStage>,
    probe_calls: Arc<AtomicUsize>,
    streams: Mutex<HashMap<String, DeliveryStream>>,
}

impl Harness {
    pub fn new(scores: &[(&str, Vec<f64>)], outcomes: &[(&str, ProbeOutcome)]) -> Self {
        let broker = Arc::new(InMemoryBroker::new(EXCHANGE));
        broker.bind_queue(TEXT_QUEUE, TEXT_RKEY);
        broker.bind_queue(URL_QUEUE, URL_RKEY);
        broker.bind_queue(HANDLING_QUEUE, HANDLING_RKEY);

        let scorer = ScriptedScorer {
            scores: scores
                .iter()
                .map(|(text, s)| (text.to_string(), s.clone()))
                .collect(),
        };
        let probe_calls = Arc::new(AtomicUsize::new(0));
        let probe = ScriptedProbe {
            outcomes: outcomes
                .iter()
                .map(|(url, o)| (url.to_string(), o.clone()))
                .collect(),
            calls: Arc::clone(&probe_calls),
        };

        Self {
            broker,
            text_stage: Arc::new(TextToxicityStage::new(scorer, TEXT_QUEUE, TEXT_RKEY).unwrap()),
            url_stage: Arc::new(UrlValidationStage::new(probe, URL_QUEUE, URL_RKEY)),
            probe_calls,
            streams: Mutex::new(HashMap::new()),
        }
    }

    fn broker_port(&self) -> Arc<dyn MessageBroker> {
        self.broker.clone()
    }

    fn context_for(&self, stages: &[&Arc<dyn ModerationStage>]) -> PipelineContext {
        let mut registry = StageRegistry::new();
        for stage in stages {
            registry.register(Arc::clone(stage));
        }
        PipelineContext {
            registry,
            broker: self.broker_port(),
            exchange: EXCHANGE.to_string(),
            handling_rkey: HANDLING_RKEY.to_string(),
            admission: Admission::unlimited(),
        }
    }

    pub fn context(&self) -> PipelineContext {
        self.context_for(&[&self.text_stage, &self.url_stage])
    }

    pub fn context_with_only_text_stage(&self) -> PipelineContext {
        self.context_for(&[&self.text_stage])
    }

    pub fn supervisor(&self) -> PipelineSupervisor {
        let mut supervisor = PipelineSupervisor::new(self.broker_port(), EXCHANGE, HANDLING_RKEY);
        supervisor.add_stage(Arc::clone(&self.text_stage));
        supervisor.add_stage(Arc::clone(&self.url_stage));
        supervisor
    }

    pub fn probe_calls(&self) -> usize {
        self.probe_calls.load(Ordering::SeqCst)
    }

    async fn recv(&self, queue: &str, wait: Duration) -> Option<Delivery> {
        let mut streams = self.streams.lock().await;
        if !streams.contains_key(queue) {
            let stream = self.broker.consume(queue).await.ok()?;
            streams.insert(queue.to_string(), stream);
        }
        let stream = streams.get_mut(queue)?;
        tokio::time::timeout(wait, stream.recv()).await.ok().flatten()
    }

    /// Publish raw bytes to `rkey` and take the resulting delivery off `queue`.
    pub async fn deliver_raw(&self, queue: &str, rkey: &str, body: Vec<u8>) -> Delivery {
        self.broker.publish(EXCHANGE, rkey, body).await.unwrap();
        self.recv(queue, Duration::from_secs(2))
            .await
            .expect("published delivery should arrive")
    }

    pub async fn deliver(&self, queue: &str, rkey: &str, message: &ModerationMessage) -> Delivery {
        self.deliver_raw(queue, rkey, serde_json::to_vec(message).unwrap())
            .await
    }

    /// Next message on `queue`, failing the test after a few seconds.
    pub async fn next_message(&self, queue: &str) -> ModerationMessage {
        let delivery = self
            .recv(queue, Duration::from_secs(5))
            .await
            .expect("expected a message on the queue");
        serde_json::from_slice(&delivery.body).unwrap()
    }

    /// Next message on `queue` if one shows up quickly.
    pub async fn try_next_message(&self, queue: &str) -> Option<ModerationMessage> {
        self.recv(queue, Duration::from_millis(200))
            .await
            .map(|delivery| serde_json::from_slice(&delivery.body).unwrap())
    }
}
