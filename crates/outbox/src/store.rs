//! Outbox store trait.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::EventId;

use crate::error::Result;
use crate::message::OutboxMessage;

/// Age after which a `Processing` claim is considered abandoned and the
/// row becomes claimable again. Reclaiming can duplicate a publish when
/// the original claimant is merely slow; that is the accepted
/// at-least-once trade-off.
pub const STALE_CLAIM: Duration = Duration::from_secs(300);

/// Durable staging table for outgoing events.
///
/// Shared by every replica of a service; all mutation goes through the
/// atomic check-then-write sequences below.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Inserts a staged row.
    ///
    /// The PostgreSQL implementation additionally exposes a variant that
    /// runs inside a caller-owned transaction, which is what makes the
    /// business write and the staged event atomic.
    async fn stage(&self, message: OutboxMessage) -> Result<()>;

    /// Claims a batch of publishable rows, oldest first, marking them
    /// `Processing`.
    ///
    /// Publishable means `Pending` with `retry_count` below the cap and no
    /// future `next_retry_at`, or `Processing` with a claim older than
    /// [`STALE_CLAIM`]. `now` is passed in so tests can exercise stale
    /// reclaims deterministically.
    async fn claim_batch(
        &self,
        batch_size: usize,
        max_retries: i32,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxMessage>>;

    /// Marks a claimed row `Processed`.
    async fn mark_processed(&self, id: EventId) -> Result<()>;

    /// Records a failed publish attempt: increments `retry_count`, stores
    /// the error, and either re-queues the row as `Pending` with a
    /// `next_retry_at`, or parks it as `Failed` once the count reaches
    /// `max_retries`.
    async fn record_failure(&self, id: EventId, error: &str, max_retries: i32) -> Result<()>;

    /// Fetches a single row.
    async fn get(&self, id: EventId) -> Result<Option<OutboxMessage>>;

    /// Returns the row count per status.
    async fn status_counts(&self) -> Result<BTreeMap<&'static str, i64>>;

    /// Lists `Failed` rows, oldest first.
    async fn list_failed(&self) -> Result<Vec<OutboxMessage>>;

    /// Operator retry: `Failed → Pending` with `retry_count` reset to 0.
    async fn retry(&self, id: EventId) -> Result<()>;

    /// Operator cancel: `Pending | Failed → Cancelled`.
    async fn cancel(&self, id: EventId) -> Result<()>;

    /// Retries every `Failed` row, returning how many were re-queued.
    async fn retry_all_failed(&self) -> Result<u64>;

    /// Deletes `Processed` rows older than `cutoff`. `Pending` and
    /// `Failed` rows are never deleted.
    async fn prune_processed_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// Delay before the next automatic retry of a failed publish.
pub(crate) fn retry_backoff(retry_count: i32) -> chrono::Duration {
    chrono::Duration::seconds(5 * i64::from(retry_count.max(1)))
}
