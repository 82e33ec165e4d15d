// In-process implementation of the MessageBroker port.
//
// One exchange, routing-key -> queue bindings, an unbounded channel per queue
// and a single consumer per queue. Publishing never waits on a consumer, so
// stages that forward to each other cannot stall one another. Deliveries
// stay "unacked" until the consumer settles them.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::core::routing::{Acknowledger, BrokerError, Delivery, DeliveryStream, MessageBroker};

/// How a delivery was settled by its consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Acked,
    Rejected,
}

struct QueueSlot {
    sender: mpsc::UnboundedSender<Delivery>,
    /// Taken by the first (and only) consumer.
    receiver: Option<mpsc::UnboundedReceiver<Delivery>>,
}

/// Tracks outstanding deliveries across all queues. Settled deliveries are
/// only counted, so the ledger stays bounded by what is in flight.
#[derive(Default)]
struct DeliveryLedger {
    /// delivery tag -> queue name
    unacked: DashMap<u64, String>,
    acked: AtomicU64,
    rejected: AtomicU64,
}

impl DeliveryLedger {
    fn settle(&self, delivery_tag: u64, settlement: Settlement) -> Result<(), BrokerError> {
        let (_, queue) = self
            .unacked
            .remove(&delivery_tag)
            .ok_or(BrokerError::UnknownDelivery(delivery_tag))?;

        let counter = match settlement {
            Settlement::Acked => &self.acked,
            Settlement::Rejected => &self.rejected,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(delivery_tag, %queue, ?settlement, "Delivery settled");
        Ok(())
    }
}

#[async_trait]
impl Acknowledger for DeliveryLedger {
    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        self.settle(delivery_tag, Settlement::Acked)
    }

    async fn reject(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        self.settle(delivery_tag, Settlement::Rejected)
    }
}

pub struct InMemoryBroker {
    exchange: String,
    /// routing key -> queue name
    bindings: DashMap<String, String>,
    queues: DashMap<String, QueueSlot>,
    ledger: Arc<DeliveryLedger>,
    next_tag: AtomicU64,
}

impl InMemoryBroker {
    /// Create a broker with a single exchange.
    pub fn new(exchange: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            bindings: DashMap::new(),
            queues: DashMap::new(),
            ledger: Arc::new(DeliveryLedger::default()),
            next_tag: AtomicU64::new(1),
        }
    }

    /// Declare `queue` (if needed) and bind `routing_key` to it.
    pub fn bind_queue(&self, queue: &str, routing_key: &str) {
        self.queues.entry(queue.to_string()).or_insert_with(|| {
            let (sender, receiver) = mpsc::unbounded_channel();
            QueueSlot {
                sender,
                receiver: Some(receiver),
            }
        });
        if let Some(previous) = self
            .bindings
            .insert(routing_key.to_string(), queue.to_string())
        {
            if previous != queue {
                tracing::warn!(
                    routing_key,
                    %previous,
                    queue,
                    "Routing key rebound to another queue"
                );
            }
        }
    }

    #[cfg(test)]
    pub fn unacked_count(&self) -> usize {
        self.ledger.unacked.len()
    }

    #[cfg(test)]
    pub fn is_unacked(&self, delivery_tag: u64) -> bool {
        self.ledger.unacked.contains_key(&delivery_tag)
    }

    #[cfg(test)]
    pub fn settled_count(&self, settlement: Settlement) -> u64 {
        match settlement {
            Settlement::Acked => self.ledger.acked.load(Ordering::Relaxed),
            Settlement::Rejected => self.ledger.rejected.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn consume(&self, queue: &str) -> Result<DeliveryStream, BrokerError> {
        let mut slot = self
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?;
        slot.receiver
            .take()
            .ok_or_else(|| BrokerError::AlreadyConsumed(queue.to_string()))
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Vec<u8>,
    ) -> Result<(), BrokerError> {
        if exchange != self.exchange {
            return Err(BrokerError::Unroutable(format!("{exchange}/{routing_key}")));
        }

        let queue = self
            .bindings
            .get(routing_key)
            .map(|q| q.value().clone())
            .ok_or_else(|| BrokerError::Unroutable(routing_key.to_string()))?;

        let sender = self
            .queues
            .get(&queue)
            .map(|slot| slot.sender.clone())
            .ok_or_else(|| BrokerError::QueueNotFound(queue.clone()))?;

        let tag = self.next_tag.fetch_add(1, Ordering::Relaxed);
        self.ledger.unacked.insert(tag, queue.clone());

        let acker: Arc<dyn Acknowledger> = self.ledger.clone();
        let delivery = Delivery::new(tag, routing_key.to_string(), body, acker);

        if sender.send(delivery).is_err() {
            self.ledger.unacked.remove(&tag);
            return Err(BrokerError::Closed(queue));
        }

        tracing::debug!(exchange, routing_key, %queue, delivery_tag = tag, "Published message");
        Ok(())
    }
}
