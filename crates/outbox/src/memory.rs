//! In-memory outbox store for testing.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::EventId;

use crate::error::{OutboxError, Result};
use crate::message::{OutboxMessage, OutboxStatus};
use crate::store::{OutboxStore, STALE_CLAIM, retry_backoff};

/// In-memory outbox implementation with the same semantics as the
/// PostgreSQL store.
#[derive(Clone, Default)]
pub struct InMemoryOutboxStore {
    rows: Arc<Mutex<HashMap<EventId, OutboxMessage>>>,
}

impl InMemoryOutboxStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of rows, any status.
    pub fn row_count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    /// Every row, oldest first.
    pub fn rows(&self) -> Vec<OutboxMessage> {
        let mut rows: Vec<OutboxMessage> = self.rows.lock().unwrap().values().cloned().collect();
        rows.sort_by_key(|row| row.created_at);
        rows
    }

    /// Backdates a row's claim, letting tests exercise stale reclaims.
    pub fn backdate_claim(&self, id: EventId, claimed_at: DateTime<Utc>) {
        if let Some(row) = self.rows.lock().unwrap().get_mut(&id) {
            row.claimed_at = Some(claimed_at);
        }
    }

    fn with_row<T>(
        &self,
        id: EventId,
        f: impl FnOnce(&mut OutboxMessage) -> Result<T>,
    ) -> Result<T> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows.get_mut(&id).ok_or(OutboxError::NotFound(id))?;
        f(row)
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn stage(&self, message: OutboxMessage) -> Result<()> {
        self.rows.lock().unwrap().insert(message.id, message);
        Ok(())
    }

    async fn claim_batch(
        &self,
        batch_size: usize,
        max_retries: i32,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxMessage>> {
        let stale_cutoff = now - chrono::Duration::from_std(STALE_CLAIM).unwrap_or_default();
        let mut rows = self.rows.lock().unwrap();

        let mut claimable: Vec<EventId> = rows
            .values()
            .filter(|row| match row.status {
                OutboxStatus::Pending => {
                    row.retry_count < max_retries
                        && row.next_retry_at.is_none_or(|at| at <= now)
                }
                OutboxStatus::Processing => {
                    row.claimed_at.is_some_and(|at| at < stale_cutoff)
                }
                _ => false,
            })
            .map(|row| row.id)
            .collect();
        claimable.sort_by_key(|id| rows[id].created_at);
        claimable.truncate(batch_size);

        let mut claimed = Vec::with_capacity(claimable.len());
        for id in claimable {
            let row = rows.get_mut(&id).expect("row exists");
            row.status = OutboxStatus::Processing;
            row.claimed_at = Some(now);
            claimed.push(row.clone());
        }
        Ok(claimed)
    }

    async fn mark_processed(&self, id: EventId) -> Result<()> {
        self.with_row(id, |row| {
            row.status = OutboxStatus::Processed;
            row.processed_at = Some(Utc::now());
            row.claimed_at = None;
            Ok(())
        })
    }

    async fn record_failure(&self, id: EventId, error: &str, max_retries: i32) -> Result<()> {
        self.with_row(id, |row| {
            row.retry_count += 1;
            row.last_error = Some(error.to_string());
            row.claimed_at = None;
            if row.retry_count >= max_retries {
                row.status = OutboxStatus::Failed;
                row.next_retry_at = None;
            } else {
                row.status = OutboxStatus::Pending;
                row.next_retry_at = Some(Utc::now() + retry_backoff(row.retry_count));
            }
            Ok(())
        })
    }

    async fn get(&self, id: EventId) -> Result<Option<OutboxMessage>> {
        Ok(self.rows.lock().unwrap().get(&id).cloned())
    }

    async fn status_counts(&self) -> Result<BTreeMap<&'static str, i64>> {
        let rows = self.rows.lock().unwrap();
        let mut counts: BTreeMap<&'static str, i64> =
            OutboxStatus::ALL.iter().map(|s| (s.as_str(), 0)).collect();
        for row in rows.values() {
            *counts.entry(row.status.as_str()).or_default() += 1;
        }
        Ok(counts)
    }

    async fn list_failed(&self) -> Result<Vec<OutboxMessage>> {
        let rows = self.rows.lock().unwrap();
        let mut failed: Vec<OutboxMessage> = rows
            .values()
            .filter(|row| row.status == OutboxStatus::Failed)
            .cloned()
            .collect();
        failed.sort_by_key(|row| row.created_at);
        Ok(failed)
    }

    async fn retry(&self, id: EventId) -> Result<()> {
        self.with_row(id, |row| {
            if row.status != OutboxStatus::Failed {
                return Err(OutboxError::InvalidTransition {
                    id,
                    actual: row.status,
                    requested: "retry",
                });
            }
            row.status = OutboxStatus::Pending;
            row.retry_count = 0;
            row.next_retry_at = None;
            Ok(())
        })
    }

    async fn cancel(&self, id: EventId) -> Result<()> {
        self.with_row(id, |row| {
            if !matches!(row.status, OutboxStatus::Pending | OutboxStatus::Failed) {
                return Err(OutboxError::InvalidTransition {
                    id,
                    actual: row.status,
                    requested: "cancel",
                });
            }
            row.status = OutboxStatus::Cancelled;
            Ok(())
        })
    }

    async fn retry_all_failed(&self) -> Result<u64> {
        let mut rows = self.rows.lock().unwrap();
        let mut requeued = 0;
        for row in rows.values_mut() {
            if row.status == OutboxStatus::Failed {
                row.status = OutboxStatus::Pending;
                row.retry_count = 0;
                row.next_retry_at = None;
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    async fn prune_processed_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|_, row| {
            !(row.status == OutboxStatus::Processed
                && row.processed_at.is_some_and(|at| at < cutoff))
        });
        Ok((before - rows.len()) as u64)
    }
}
