// Shared, read-only state every consumer task sees once the pipeline runs,
// plus the single place that publishes a message to its next hop.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::core::moderation::{final_disposition, Disposition, ModerationMessage};
use crate::core::routing::{BrokerError, MessageBroker, NextHop, RoutingError, StageRegistry};

/// Faults that abort handling of the current message.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),

    #[error("Failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Pipeline is at its limit of {limit} messages in flight")]
    Saturated { limit: usize },
}

/// What happened to one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    /// Published to the next stage with this routing key.
    Forwarded(String),
    /// Route exhausted; published to handling with this disposition.
    Finalized(Disposition),
    /// Undecodable; rejected and not forwarded.
    Dropped,
}

/// Caps how many submitted messages may be inside the pipeline at once.
///
/// Only `submit` admits. A message leaves when it reaches handling or is
/// dropped on the way, so stage-to-stage hops never wait on this.
pub struct Admission {
    limit: usize,
    in_flight: AtomicUsize,
}

impl Admission {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(usize::MAX)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Take a slot if one is free.
    pub fn try_admit(&self) -> bool {
        self.in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.limit).then_some(n + 1)
            })
            .is_ok()
    }

    /// Give a slot back. Messages that entered without `submit` (published
    /// by another producer) leave too, so the count saturates at zero.
    pub fn release(&self) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }
}

pub struct PipelineContext {
    pub registry: StageRegistry,
    pub broker: Arc<dyn MessageBroker>,
    pub exchange: String,
    pub handling_rkey: String,
    pub admission: Admission,
}

impl PipelineContext {
    /// Publish `message` to `hop`. An exhausted route first gets its final
    /// disposition and then goes to the shared handling routing key.
    pub async fn dispatch(
        &self,
        hop: NextHop,
        mut message: ModerationMessage,
    ) -> Result<HandleOutcome, PipelineError> {
        let (routing_key, outcome) = match hop {
            NextHop::Stage(rkey) => (rkey.clone(), HandleOutcome::Forwarded(rkey)),
            NextHop::Exhausted => {
                let disposition = final_disposition(&message.id, &message.route_verdicts());
                message.disposition = disposition;
                tracing::debug!(message_id = %message.id, %disposition, "Last stage done, sending to handling");
                (
                    self.handling_rkey.clone(),
                    HandleOutcome::Finalized(disposition),
                )
            }
        };

        let body = serde_json::to_vec(&message).map_err(PipelineError::Encode)?;
        tracing::info!(
            message_id = %message.id,
            exchange = %self.exchange,
            routing_key = %routing_key,
            "Send to next queue"
        );
        self.broker
            .publish(&self.exchange, &routing_key, body)
            .await?;

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admission_stops_at_limit() {
        let admission = Admission::new(2);

        assert!(admission.try_admit());
        assert!(admission.try_admit());
        assert!(!admission.try_admit());
        assert_eq!(admission.in_flight(), 2);

        admission.release();
        assert!(admission.try_admit());
    }

    #[test]
    fn test_release_saturates_at_zero() {
        let admission = Admission::new(1);

        admission.release();
        assert_eq!(admission.in_flight(), 0);
        assert!(admission.try_admit());
        assert!(!admission.try_admit());
    }

    #[test]
    fn test_zero_limit_still_admits_one() {
        assert_eq!(Admission::new(0).limit(), 1);
        assert!(Admission::unlimited().try_admit());
    }
}
