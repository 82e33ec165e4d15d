// Stage registry and routing resolver.
//
// The registry is filled during init and only read once consumers run, so it
// is a plain map behind an `Arc` with no locking.

use crate::core::moderation::{ModerationStage, RouteEntry, StageType};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// A route names a stage nobody registered: a deployment mismatch.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoutingError {
    #[error("Stage {0} is in the route but no module is registered for it")]
    UnregisteredStage(StageType),
}

/// Where a message goes after the current stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextHop {
    /// Publish with this routing key to reach the next stage.
    Stage(String),
    /// No stage left: compute the disposition and send to handling.
    Exhausted,
}

/// One registered module per stage type. Last registration wins.
#[derive(Default, Clone)]
pub struct StageRegistry {
    stages: HashMap<StageType, Arc<dyn ModerationStage>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `stage`, replacing (with a warning) any module of the same type.
    pub fn register(&mut self, stage: Arc<dyn ModerationStage>) {
        let stage_type = stage.stage_type();
        if let Some(old) = self.stages.insert(stage_type, Arc::clone(&stage)) {
            tracing::warn!(
                stage = %stage_type,
                new = stage.name(),
                old = old.name(),
                "Replacing previously registered moderation module"
            );
        }
    }

    /// Routing key of the module registered for `stage_type`.
    pub fn queue_rkey(&self, stage_type: StageType) -> Option<&str> {
        self.stages.get(&stage_type).map(|stage| stage.queue_rkey())
    }

    pub fn stages(&self) -> impl Iterator<Item = &Arc<dyn ModerationStage>> {
        self.stages.values()
    }

    /// Find the hop after `current` in `route`.
    ///
    /// The first entry matching `current` decides. If it is the last entry,
    /// or `current` is not in the route at all, the route is exhausted.
    pub fn next_hop(&self, route: &[RouteEntry], current: StageType) -> Result<NextHop, RoutingError> {
        let Some(position) = route.iter().position(|entry| entry.stage_type == current) else {
            return Ok(NextHop::Exhausted);
        };

        match route.get(position + 1) {
            None => Ok(NextHop::Exhausted),
            Some(next) => self
                .queue_rkey(next.stage_type)
                .map(|rkey| NextHop::Stage(rkey.to_string()))
                .ok_or(RoutingError::UnregisteredStage(next.stage_type)),
        }
    }

    /// Hop that starts a fresh route: its first stage, or handling if empty.
    pub fn first_hop(&self, route: &[RouteEntry]) -> Result<NextHop, RoutingError> {
        match route.first() {
            None => Ok(NextHop::Exhausted),
            Some(first) => self
                .queue_rkey(first.stage_type)
                .map(|rkey| NextHop::Stage(rkey.to_string()))
                .ok_or(RoutingError::UnregisteredStage(first.stage_type)),
        }
    }
}
