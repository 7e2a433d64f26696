//! The bus trait boundary.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::envelope::MessageEnvelope;
use crate::error::Result;

/// Opaque handle to a scheduled (delayed) message.
///
/// Saga timeouts hold one of these while a follow-up event is outstanding
/// and use it to cancel the timer when the event arrives first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScheduleToken(Uuid);

impl ScheduleToken {
    /// Creates a new random schedule token.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Reconstructs a token from its persisted UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ScheduleToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ScheduleToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Core trait for message transports.
///
/// The broker is assumed to provide durable queues and at-least-once
/// delivery; scheduling survives process restarts, which is why saga
/// timeouts go through the bus instead of in-process timers.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publishes a message to a queue.
    async fn publish(&self, queue: &str, envelope: MessageEnvelope) -> Result<()>;

    /// Schedules a message for delayed delivery, returning a token that
    /// can cancel it while it is still pending.
    async fn schedule(
        &self,
        queue: &str,
        envelope: MessageEnvelope,
        delay: Duration,
    ) -> Result<ScheduleToken>;

    /// Cancels a scheduled message.
    ///
    /// Cancelling a token that already fired (or was already cancelled) is
    /// not an error; the race between a timer firing and the expected
    /// event arriving is resolved by the saga transition table instead.
    async fn cancel_scheduled(&self, token: ScheduleToken) -> Result<()>;
}
