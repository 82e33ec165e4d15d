// Broker port - the queue consumer / message producer the pipeline runs on.
//
// Connection handling, exchanges and redelivery belong to the broker. The
// pipeline only consumes deliveries, settles them and publishes new bodies.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("No queue bound to routing key '{0}'")]
    Unroutable(String),

    #[error("Queue '{0}' does not exist")]
    QueueNotFound(String),

    #[error("Queue '{0}' already has a consumer")]
    AlreadyConsumed(String),

    #[error("Queue '{0}' is closed")]
    Closed(String),

    #[error("Unknown delivery tag {0}")]
    UnknownDelivery(u64),
}

/// Settles deliveries on behalf of the broker that produced them.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Mark the delivery as processed; it will not be redelivered.
    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError>;

    /// Drop the delivery without requeueing it.
    async fn reject(&self, delivery_tag: u64) -> Result<(), BrokerError>;
}

/// One message handed to a consumer.
pub struct Delivery {
    pub delivery_tag: u64,
    pub routing_key: String,
    pub body: Vec<u8>,
    acker: Arc<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(
        delivery_tag: u64,
        routing_key: String,
        body: Vec<u8>,
        acker: Arc<dyn Acknowledger>,
    ) -> Self {
        Self {
            delivery_tag,
            routing_key,
            body,
            acker,
        }
    }

    pub async fn ack(&self) -> Result<(), BrokerError> {
        self.acker.ack(self.delivery_tag).await
    }

    pub async fn reject(&self) -> Result<(), BrokerError> {
        self.acker.reject(self.delivery_tag).await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("routing_key", &self.routing_key)
            .field("body_len", &self.body.len())
            .finish()
    }
}

/// Deliveries for one queue, in arrival order. `None` once the queue closes.
pub type DeliveryStream = mpsc::UnboundedReceiver<Delivery>;

#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Start consuming `queue`.
    async fn consume(&self, queue: &str) -> Result<DeliveryStream, BrokerError>;

    /// Publish `body` on `exchange`, routed by `routing_key`.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Vec<u8>,
    ) -> Result<(), BrokerError>;
}
