//! Idempotent consumer wrapper.

use std::sync::Arc;

use async_trait::async_trait;
use bus::{HandlerResult, MessageEnvelope, MessageHandler};

use crate::store::{Claim, ProcessedEventStore};

/// Wraps a handler so a delivered message is applied at most once.
///
/// On receipt the ledger key `(message_id, message_type)` is claimed. If
/// it is already committed, the handler body is skipped and the cached
/// result (if any) is returned, so the broker can acknowledge without
/// reprocessing. Otherwise the body runs under the claim; success commits
/// the row, failure releases the claim so the redelivery retries the body.
pub struct IdempotentConsumer<H> {
    name: &'static str,
    store: Arc<dyn ProcessedEventStore>,
    inner: H,
}

impl<H> IdempotentConsumer<H> {
    /// Wraps a handler. `name` identifies the consumer in logs and metrics.
    pub fn new(name: &'static str, store: Arc<dyn ProcessedEventStore>, inner: H) -> Self {
        Self { name, store, inner }
    }
}

#[async_trait]
impl<H: MessageHandler> MessageHandler for IdempotentConsumer<H> {
    #[tracing::instrument(
        skip(self, envelope),
        fields(consumer = self.name, message_type = %envelope.message_type)
    )]
    async fn handle(&self, envelope: &MessageEnvelope) -> HandlerResult {
        let claim = self
            .store
            .claim(envelope.message_id, &envelope.message_type)
            .await?;

        let guard = match claim {
            Claim::AlreadyProcessed { result } => {
                metrics::counter!("consumer_duplicates_skipped_total").increment(1);
                tracing::debug!(
                    message_id = %envelope.message_id,
                    "duplicate delivery, skipping handler body"
                );
                return Ok(result);
            }
            Claim::Acquired(guard) => guard,
        };

        match self.inner.handle(envelope).await {
            Ok(result) => {
                guard.commit(result.clone()).await?;
                Ok(result)
            }
            Err(e) => {
                if let Err(abort_err) = guard.abort().await {
                    tracing::warn!(error = %abort_err, "failed to release ledger claim");
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use common::CorrelationId;

    use super::*;
    use crate::memory::InMemoryProcessedEventStore;

    struct SideEffect {
        applied: AtomicUsize,
        fail_next: AtomicBool,
    }

    impl SideEffect {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                applied: AtomicUsize::new(0),
                fail_next: AtomicBool::new(false),
            })
        }
    }

    struct SideEffectHandler(Arc<SideEffect>);

    #[async_trait]
    impl MessageHandler for SideEffectHandler {
        async fn handle(&self, _envelope: &MessageEnvelope) -> HandlerResult {
            if self.0.fail_next.swap(false, Ordering::SeqCst) {
                return Err("storage unavailable".into());
            }
            let n = self.0.applied.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Some(serde_json::json!({ "applied": n })))
        }
    }

    fn envelope() -> MessageEnvelope {
        MessageEnvelope::new(
            "DeleteChatMessages",
            CorrelationId::new(),
            &serde_json::json!({"chat_room_id": 5}),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn duplicate_delivery_applies_effect_once() {
        let store = Arc::new(InMemoryProcessedEventStore::new());
        let effect = SideEffect::new();
        let consumer = IdempotentConsumer::new("test", store.clone(), SideEffectHandler(effect.clone()));

        let envelope = envelope();
        let first = consumer.handle(&envelope).await.unwrap();
        let second = consumer.handle(&envelope).await.unwrap();

        assert_eq!(effect.applied.load(Ordering::SeqCst), 1);
        // The duplicate sees the cached result of the first application.
        assert_eq!(first, second);
        assert_eq!(store.committed_count(), 1);
    }

    #[tokio::test]
    async fn failed_body_is_retried_on_redelivery() {
        let store = Arc::new(InMemoryProcessedEventStore::new());
        let effect = SideEffect::new();
        effect.fail_next.store(true, Ordering::SeqCst);
        let consumer = IdempotentConsumer::new("test", store.clone(), SideEffectHandler(effect.clone()));

        let envelope = envelope();
        assert!(consumer.handle(&envelope).await.is_err());
        assert_eq!(store.committed_count(), 0);

        consumer.handle(&envelope).await.unwrap();
        assert_eq!(effect.applied.load(Ordering::SeqCst), 1);
        assert_eq!(store.committed_count(), 1);
    }

    #[tokio::test]
    async fn concurrent_duplicates_apply_effect_once() {
        let store = Arc::new(InMemoryProcessedEventStore::new());
        let effect = SideEffect::new();
        let consumer = Arc::new(IdempotentConsumer::new("test", store, SideEffectHandler(effect.clone())));

        let envelope = envelope();
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let consumer = consumer.clone();
            let envelope = envelope.clone();
            tasks.push(tokio::spawn(async move {
                consumer.handle(&envelope).await.unwrap()
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(effect.applied.load(Ordering::SeqCst), 1);
    }
}
