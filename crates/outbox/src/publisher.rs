//! Background publisher draining the outbox to the bus.

use std::sync::Arc;
use std::time::Duration;

use bus::MessageBus;
use chrono::Utc;

use crate::error::Result;
use crate::store::OutboxStore;

/// Publisher tuning knobs.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// How often the outbox is polled.
    pub poll_interval: Duration,
    /// Maximum rows claimed per poll.
    pub batch_size: usize,
    /// Automatic retry cap before a row is parked as `Failed`.
    pub max_retries: i32,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 50,
            max_retries: 5,
        }
    }
}

/// Counts from a single drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub published: usize,
    pub failed: usize,
}

/// Polls the outbox and publishes claimed rows.
///
/// Marking a row `Processed` happens after the publish succeeds, so a
/// crash in between duplicates the publish on the next poll. Several
/// replicas may run publishers concurrently; overlapping claims are the
/// same accepted duplicate-publish scenario.
pub struct OutboxPublisher {
    store: Arc<dyn OutboxStore>,
    publisher_bus: Arc<dyn MessageBus>,
    config: PublisherConfig,
}

impl OutboxPublisher {
    /// Creates a publisher over a store and a bus.
    pub fn new(
        store: Arc<dyn OutboxStore>,
        publisher_bus: Arc<dyn MessageBus>,
        config: PublisherConfig,
    ) -> Self {
        Self {
            store,
            publisher_bus,
            config,
        }
    }

    /// Runs the polling loop until the task is dropped.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.drain_once().await {
                tracing::error!(error = %e, "outbox drain pass failed");
            }
        }
    }

    /// Claims one batch and attempts to publish each row.
    #[tracing::instrument(skip(self))]
    pub async fn drain_once(&self) -> Result<DrainStats> {
        let batch = self
            .store
            .claim_batch(self.config.batch_size, self.config.max_retries, Utc::now())
            .await?;

        let mut stats = DrainStats::default();
        for row in batch {
            let envelope = row.to_envelope();
            match self.publisher_bus.publish(&row.destination, envelope).await {
                Ok(()) => {
                    self.store.mark_processed(row.id).await?;
                    metrics::counter!("outbox_published_total").increment(1);
                    stats.published += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        id = %row.id,
                        event_type = %row.event_type,
                        retry_count = row.retry_count,
                        error = %e,
                        "outbox publish failed"
                    );
                    self.store
                        .record_failure(row.id, &e.to_string(), self.config.max_retries)
                        .await?;
                    metrics::counter!("outbox_publish_failures_total").increment(1);
                    stats.failed += 1;
                }
            }
        }

        if stats.published > 0 || stats.failed > 0 {
            tracing::debug!(
                published = stats.published,
                failed = stats.failed,
                "outbox drain pass complete"
            );
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use bus::{BusError, InMemoryBus, MessageEnvelope, ScheduleToken};
    use common::CorrelationId;

    use super::*;
    use crate::memory::InMemoryOutboxStore;
    use crate::message::{OutboxMessage, OutboxStatus};

    /// Bus wrapper whose publishes can be made to fail.
    #[derive(Clone, Default)]
    struct FlakyBus {
        inner: InMemoryBus,
        fail: Arc<AtomicBool>,
        errors: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl MessageBus for FlakyBus {
        async fn publish(&self, queue: &str, envelope: MessageEnvelope) -> bus::Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                self.errors.lock().unwrap().push(queue.to_string());
                return Err(BusError::Publish("broker unreachable".to_string()));
            }
            self.inner.publish(queue, envelope).await
        }

        async fn schedule(
            &self,
            queue: &str,
            envelope: MessageEnvelope,
            delay: Duration,
        ) -> bus::Result<ScheduleToken> {
            self.inner.schedule(queue, envelope, delay).await
        }

        async fn cancel_scheduled(&self, token: ScheduleToken) -> bus::Result<()> {
            self.inner.cancel_scheduled(token).await
        }
    }

    fn setup(fail: bool) -> (OutboxPublisher, Arc<InMemoryOutboxStore>, FlakyBus) {
        let store = Arc::new(InMemoryOutboxStore::new());
        let flaky = FlakyBus::default();
        flaky.fail.store(fail, Ordering::SeqCst);
        let publisher = OutboxPublisher::new(
            store.clone(),
            Arc::new(flaky.clone()),
            PublisherConfig::default(),
        );
        (publisher, store, flaky)
    }

    async fn stage(store: &InMemoryOutboxStore) -> common::EventId {
        let envelope = MessageEnvelope::new(
            "RoomCreated",
            CorrelationId::new(),
            &serde_json::json!({"chat_room_id": 5}),
        )
        .unwrap();
        let row = OutboxMessage::stage("chat-events", &envelope);
        let id = row.id;
        store.stage(row).await.unwrap();
        id
    }

    #[tokio::test]
    async fn drain_publishes_and_marks_processed() {
        let (publisher, store, flaky) = setup(false);
        let id = stage(&store).await;

        let stats = publisher.drain_once().await.unwrap();
        assert_eq!(stats, DrainStats { published: 1, failed: 0 });

        let row = store.get(id).await.unwrap().unwrap();
        assert_eq!(row.status, OutboxStatus::Processed);
        assert!(row.processed_at.is_some());
        assert_eq!(flaky.inner.published_of_type("RoomCreated").len(), 1);
    }

    #[tokio::test]
    async fn failed_publish_requeues_with_error() {
        let (publisher, store, _flaky) = setup(true);
        let id = stage(&store).await;

        let stats = publisher.drain_once().await.unwrap();
        assert_eq!(stats, DrainStats { published: 0, failed: 1 });

        let row = store.get(id).await.unwrap().unwrap();
        assert_eq!(row.status, OutboxStatus::Pending);
        assert_eq!(row.retry_count, 1);
        assert!(row.last_error.as_deref().unwrap().contains("unreachable"));
    }

    #[tokio::test]
    async fn exhausted_retries_park_the_row_as_failed() {
        let (publisher, store, _flaky) = setup(true);
        let id = stage(&store).await;

        // First attempt through the publisher, the rest recorded directly
        // so the test does not have to wait out the backoff windows. Five
        // failed attempts in total exhaust a cap of 5.
        publisher.drain_once().await.unwrap();
        for _ in 0..4 {
            store
                .record_failure(id, "broker unreachable", 5)
                .await
                .unwrap();
        }

        let row = store.get(id).await.unwrap().unwrap();
        assert_eq!(row.status, OutboxStatus::Failed);
        assert_eq!(row.retry_count, 5);
        assert_eq!(store.list_failed().await.unwrap().len(), 1);

        // Parked rows are invisible to later drains.
        let stats = publisher.drain_once().await.unwrap();
        assert_eq!(stats, DrainStats::default());
    }

    #[tokio::test]
    async fn duplicate_claim_duplicates_the_publish_with_same_message_id() {
        let (publisher, store, flaky) = setup(false);
        let id = stage(&store).await;

        publisher.drain_once().await.unwrap();

        // Simulate a crashed replica that published but never marked the
        // row: reset it to a stale Processing claim and drain again.
        {
            let row = store.get(id).await.unwrap().unwrap();
            let mut reset = row.clone();
            reset.status = OutboxStatus::Processing;
            reset.processed_at = None;
            store.stage(reset).await.unwrap();
        }
        store.backdate_claim(id, Utc::now() - chrono::Duration::minutes(10));

        let stats = publisher.drain_once().await.unwrap();
        assert_eq!(stats.published, 1);

        let published = flaky.inner.published_of_type("RoomCreated");
        assert_eq!(published.len(), 2);
        // Both publishes carry the same deduplication key.
        assert_eq!(published[0].message_id, published[1].message_id);
    }
}
