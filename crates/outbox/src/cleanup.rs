//! Retention sweep for processed outbox rows.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::error::Result;
use crate::store::OutboxStore;

/// Cleanup tuning knobs.
#[derive(Debug, Clone)]
pub struct CleanupConfig {
    /// How often the sweep runs.
    pub interval: Duration,
    /// How long `Processed` rows are kept for audit before deletion.
    pub retention: Duration,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(24 * 60 * 60),
            retention: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// Periodically deletes `Processed` rows past the retention window.
///
/// `Pending` and `Failed` rows are never touched; a parked row stays
/// visible until an operator retries or cancels it.
pub struct OutboxCleanup {
    store: Arc<dyn OutboxStore>,
    config: CleanupConfig,
}

impl OutboxCleanup {
    /// Creates a cleanup job over a store.
    pub fn new(store: Arc<dyn OutboxStore>, config: CleanupConfig) -> Self {
        Self { store, config }
    }

    /// Runs the sweep loop until the task is dropped.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.sweep_once().await {
                Ok(removed) if removed > 0 => {
                    tracing::info!(removed, "outbox retention sweep removed rows");
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "outbox retention sweep failed"),
            }
        }
    }

    /// Deletes rows past retention, returning how many were removed.
    pub async fn sweep_once(&self) -> Result<u64> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.retention).unwrap_or_default();
        let removed = self.store.prune_processed_before(cutoff).await?;
        metrics::counter!("outbox_pruned_total").increment(removed);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use bus::MessageEnvelope;
    use common::CorrelationId;

    use super::*;
    use crate::memory::InMemoryOutboxStore;
    use crate::message::OutboxMessage;

    #[tokio::test]
    async fn sweep_respects_retention_window() {
        let store = Arc::new(InMemoryOutboxStore::new());
        let envelope = MessageEnvelope::new(
            "RoomCreated",
            CorrelationId::new(),
            &serde_json::json!({}),
        )
        .unwrap();
        let row = OutboxMessage::stage("chat-events", &envelope);
        let id = row.id;
        store.stage(row).await.unwrap();
        store.mark_processed(id).await.unwrap();

        // Freshly processed row is inside the 7-day window.
        let cleanup = OutboxCleanup::new(store.clone(), CleanupConfig::default());
        assert_eq!(cleanup.sweep_once().await.unwrap(), 0);

        // A zero-retention config removes it.
        let aggressive = OutboxCleanup::new(
            store.clone(),
            CleanupConfig {
                interval: Duration::from_secs(1),
                retention: Duration::ZERO,
            },
        );
        // processed_at is strictly before the cutoff once a moment passes
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(aggressive.sweep_once().await.unwrap(), 1);
        assert!(store.get(id).await.unwrap().is_none());
    }
}
