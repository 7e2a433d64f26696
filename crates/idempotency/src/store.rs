//! Ledger records and the claim protocol.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::EventId;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A committed ledger row.
///
/// Existence of a row is the sole proof that the side effect for this
/// `(event_id, event_type)` pair has already been applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedEvent {
    pub event_id: EventId,
    pub event_type: String,
    pub processed_at: DateTime<Utc>,
    /// Cached handler result replayed to duplicate deliveries.
    pub result: Option<serde_json::Value>,
}

/// Outcome of claiming a deduplication key.
pub enum Claim {
    /// The key is already committed; the handler body must be skipped.
    AlreadyProcessed { result: Option<serde_json::Value> },

    /// The key was acquired. The handler body runs while the guard is
    /// held; [`ClaimGuard::commit`] records the row, dropping or aborting
    /// releases the key for a later redelivery.
    Acquired(Box<dyn ClaimGuard>),
}

/// Guard bracketing a handler body.
///
/// For the PostgreSQL store this holds the open transaction, so a
/// concurrent duplicate blocks on the unique key until the first delivery
/// commits or rolls back.
#[async_trait]
pub trait ClaimGuard: Send {
    /// Commits the ledger row, optionally caching the handler's result.
    async fn commit(self: Box<Self>, result: Option<serde_json::Value>) -> Result<()>;

    /// Releases the claim without recording it.
    async fn abort(self: Box<Self>) -> Result<()>;
}

/// Durable set of `(event id, event type)` pairs already applied.
#[async_trait]
pub trait ProcessedEventStore: Send + Sync {
    /// Claims a key, serializing against concurrent claims of the same key.
    async fn claim(&self, event_id: EventId, event_type: &str) -> Result<Claim>;

    /// Looks up a committed row.
    async fn get(&self, event_id: EventId, event_type: &str) -> Result<Option<ProcessedEvent>>;
}
