//! In-memory bus implementation for testing.
//!
//! Provides the same interface as the external broker, with deterministic
//! pumping: published messages queue up until [`InMemoryBus::run_until_idle`]
//! drains them through the registered handlers, and scheduled messages sit
//! until a test fires them explicitly. Backoff delays from the retry
//! policies are not simulated; only the attempt budget is honored.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use crate::bus::{MessageBus, ScheduleToken};
use crate::envelope::MessageEnvelope;
use crate::error::Result;
use crate::handler::HandlerRegistry;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
struct Delivery {
    queue: String,
    envelope: MessageEnvelope,
}

#[derive(Default)]
struct InMemoryBusState {
    pending: VecDeque<Delivery>,
    scheduled: HashMap<ScheduleToken, Delivery>,
    published: Vec<Delivery>,
    dead_letters: Vec<(Delivery, String)>,
}

/// In-memory message bus used by every test suite.
#[derive(Clone, Default)]
pub struct InMemoryBus {
    state: Arc<Mutex<InMemoryBusState>>,
    registry: Arc<RwLock<HandlerRegistry>>,
    queue_registries: Arc<RwLock<HashMap<String, HandlerRegistry>>>,
    policies: Arc<RwLock<HashMap<String, RetryPolicy>>>,
}

impl InMemoryBus {
    /// Creates a new empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the fallback handler registry consulted during dispatch.
    pub fn set_registry(&self, registry: HandlerRegistry) {
        *self.registry.write().unwrap() = registry;
    }

    /// Installs the registry for one queue.
    ///
    /// Each queue belongs to one consuming service; two services may
    /// consume the same message type on different queues (both saga
    /// engines handle failure events, for instance), so dispatch resolves
    /// the queue's registry before the fallback one.
    pub fn set_queue_registry(&self, queue: impl Into<String>, registry: HandlerRegistry) {
        self.queue_registries
            .write()
            .unwrap()
            .insert(queue.into(), registry);
    }

    /// Sets the retry policy for a queue. Queues without an explicit
    /// policy use [`RetryPolicy::default`].
    pub fn set_retry_policy(&self, queue: impl Into<String>, policy: RetryPolicy) {
        self.policies.write().unwrap().insert(queue.into(), policy);
    }

    /// Drains the pending queue, dispatching each delivery through the
    /// registry until no messages remain.
    ///
    /// Handlers may publish further messages while running; those are
    /// drained too. Deliveries without a registered handler are dropped
    /// with a log line, matching how unroutable bus traffic behaves.
    pub async fn run_until_idle(&self) {
        loop {
            let delivery = {
                let mut state = self.state.lock().unwrap();
                state.pending.pop_front()
            };
            let Some(delivery) = delivery else {
                break;
            };
            self.dispatch(delivery).await;
        }
    }

    async fn dispatch(&self, delivery: Delivery) {
        let handler = self
            .queue_registries
            .read()
            .unwrap()
            .get(&delivery.queue)
            .and_then(|registry| registry.get(&delivery.envelope.message_type))
            .or_else(|| {
                self.registry
                    .read()
                    .unwrap()
                    .get(&delivery.envelope.message_type)
            });
        let Some(handler) = handler else {
            tracing::debug!(
                queue = %delivery.queue,
                message_type = %delivery.envelope.message_type,
                "no handler registered, dropping delivery"
            );
            return;
        };

        let policy = self
            .policies
            .read()
            .unwrap()
            .get(&delivery.queue)
            .cloned()
            .unwrap_or_default();

        let mut last_error = String::new();
        for attempt in 1..=policy.max_attempts() {
            match handler.handle(&delivery.envelope).await {
                Ok(_) => return,
                Err(e) => {
                    last_error = e.to_string();
                    tracing::warn!(
                        queue = %delivery.queue,
                        message_type = %delivery.envelope.message_type,
                        attempt,
                        error = %last_error,
                        "delivery attempt failed"
                    );
                }
            }
        }

        metrics::counter!("bus_dead_letters_total").increment(1);
        tracing::error!(
            queue = %delivery.queue,
            message_type = %delivery.envelope.message_type,
            error = %last_error,
            "retry policy exhausted, routing to dead-letter path"
        );
        self.state
            .lock()
            .unwrap()
            .dead_letters
            .push((delivery, last_error));
    }

    /// Fires one scheduled message now, enqueuing it as a normal delivery.
    /// Returns false if the token was already cancelled or fired.
    pub fn fire_scheduled(&self, token: ScheduleToken) -> bool {
        let mut state = self.state.lock().unwrap();
        match state.scheduled.remove(&token) {
            Some(delivery) => {
                state.pending.push_back(delivery);
                true
            }
            None => false,
        }
    }

    /// Fires every scheduled message.
    pub fn fire_all_scheduled(&self) {
        let mut state = self.state.lock().unwrap();
        let due: Vec<Delivery> = state.scheduled.drain().map(|(_, d)| d).collect();
        state.pending.extend(due);
    }

    /// Re-enqueues an envelope as-is, simulating the broker redelivering
    /// the same message a second time.
    pub fn redeliver(&self, queue: impl Into<String>, envelope: MessageEnvelope) {
        self.state.lock().unwrap().pending.push_back(Delivery {
            queue: queue.into(),
            envelope,
        });
    }

    /// Returns every envelope published so far, in publish order.
    pub fn published(&self) -> Vec<MessageEnvelope> {
        self.state
            .lock()
            .unwrap()
            .published
            .iter()
            .map(|d| d.envelope.clone())
            .collect()
    }

    /// Returns the published envelopes of one message type.
    pub fn published_of_type(&self, message_type: &str) -> Vec<MessageEnvelope> {
        self.published()
            .into_iter()
            .filter(|e| e.message_type == message_type)
            .collect()
    }

    /// Number of deliveries parked on the dead-letter path.
    pub fn dead_letter_count(&self) -> usize {
        self.state.lock().unwrap().dead_letters.len()
    }

    /// Number of scheduled messages still pending.
    pub fn scheduled_count(&self) -> usize {
        self.state.lock().unwrap().scheduled.len()
    }

    /// Returns true if the token still refers to a pending scheduled
    /// message.
    pub fn has_scheduled(&self, token: ScheduleToken) -> bool {
        self.state.lock().unwrap().scheduled.contains_key(&token)
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, queue: &str, envelope: MessageEnvelope) -> Result<()> {
        let delivery = Delivery {
            queue: queue.to_string(),
            envelope,
        };
        let mut state = self.state.lock().unwrap();
        state.published.push(delivery.clone());
        state.pending.push_back(delivery);
        Ok(())
    }

    async fn schedule(
        &self,
        queue: &str,
        envelope: MessageEnvelope,
        _delay: Duration,
    ) -> Result<ScheduleToken> {
        let token = ScheduleToken::new();
        self.state.lock().unwrap().scheduled.insert(
            token,
            Delivery {
                queue: queue.to_string(),
                envelope,
            },
        );
        Ok(token)
    }

    async fn cancel_scheduled(&self, token: ScheduleToken) -> Result<()> {
        let removed = self.state.lock().unwrap().scheduled.remove(&token);
        if removed.is_none() {
            tracing::debug!(%token, "cancel for a token that already fired or was cancelled");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use common::CorrelationId;

    use super::*;
    use crate::handler::{HandlerResult, MessageHandler};

    struct Recorder {
        calls: AtomicUsize,
        fail_first: AtomicUsize,
    }

    impl Recorder {
        fn new(fail_first: usize) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_first: AtomicUsize::new(fail_first),
            })
        }
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        async fn handle(&self, _envelope: &MessageEnvelope) -> HandlerResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_first.load(Ordering::SeqCst) > 0 {
                self.fail_first.fetch_sub(1, Ordering::SeqCst);
                return Err("induced failure".into());
            }
            Ok(None)
        }
    }

    fn envelope(message_type: &str) -> MessageEnvelope {
        MessageEnvelope::new(message_type, CorrelationId::new(), &serde_json::json!({}))
            .unwrap()
    }

    #[tokio::test]
    async fn publish_then_pump_delivers_to_handler() {
        let bus = InMemoryBus::new();
        let handler = Recorder::new(0);
        let mut registry = HandlerRegistry::new();
        registry.register("Ping", handler.clone());
        bus.set_registry(registry);

        bus.publish("commands", envelope("Ping")).await.unwrap();
        bus.run_until_idle().await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(bus.dead_letter_count(), 0);
    }

    #[tokio::test]
    async fn transient_failure_is_retried_within_policy() {
        let bus = InMemoryBus::new();
        let handler = Recorder::new(2);
        let mut registry = HandlerRegistry::new();
        registry.register("Ping", handler.clone());
        bus.set_registry(registry);
        bus.set_retry_policy("commands", RetryPolicy::fast_command());

        bus.publish("commands", envelope("Ping")).await.unwrap();
        bus.run_until_idle().await;

        // 2 failures + 1 success, within the 4-attempt budget
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert_eq!(bus.dead_letter_count(), 0);
    }

    #[tokio::test]
    async fn exhausted_policy_routes_to_dead_letters() {
        let bus = InMemoryBus::new();
        let handler = Recorder::new(usize::MAX);
        let mut registry = HandlerRegistry::new();
        registry.register("Ping", handler.clone());
        bus.set_registry(registry);
        bus.set_retry_policy("commands", RetryPolicy::none());

        bus.publish("commands", envelope("Ping")).await.unwrap();
        bus.run_until_idle().await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(bus.dead_letter_count(), 1);
    }

    #[tokio::test]
    async fn unroutable_delivery_is_dropped() {
        let bus = InMemoryBus::new();
        bus.set_registry(HandlerRegistry::new());

        bus.publish("commands", envelope("Unknown")).await.unwrap();
        bus.run_until_idle().await;

        assert_eq!(bus.dead_letter_count(), 0);
    }

    #[tokio::test]
    async fn queue_registry_wins_over_fallback_for_same_type() {
        let bus = InMemoryBus::new();
        let queue_handler = Recorder::new(0);
        let fallback_handler = Recorder::new(0);

        let mut queue_registry = HandlerRegistry::new();
        queue_registry.register("FailureOccurred", queue_handler.clone());
        bus.set_queue_registry("chat-creation-saga", queue_registry);

        let mut fallback = HandlerRegistry::new();
        fallback.register("FailureOccurred", fallback_handler.clone());
        bus.set_registry(fallback);

        bus.publish("chat-creation-saga", envelope("FailureOccurred"))
            .await
            .unwrap();
        bus.publish("elsewhere", envelope("FailureOccurred"))
            .await
            .unwrap();
        bus.run_until_idle().await;

        assert_eq!(queue_handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fallback_handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn scheduled_message_waits_until_fired() {
        let bus = InMemoryBus::new();
        let handler = Recorder::new(0);
        let mut registry = HandlerRegistry::new();
        registry.register("TimeoutFired", handler.clone());
        bus.set_registry(registry);

        let token = bus
            .schedule(
                "sagas",
                envelope("TimeoutFired"),
                Duration::from_secs(30),
            )
            .await
            .unwrap();
        bus.run_until_idle().await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        assert!(bus.has_scheduled(token));

        assert!(bus.fire_scheduled(token));
        bus.run_until_idle().await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_schedule_never_fires() {
        let bus = InMemoryBus::new();
        let token = bus
            .schedule(
                "sagas",
                envelope("TimeoutFired"),
                Duration::from_secs(30),
            )
            .await
            .unwrap();

        bus.cancel_scheduled(token).await.unwrap();
        assert!(!bus.fire_scheduled(token));
        assert_eq!(bus.scheduled_count(), 0);

        // Cancelling again is a no-op, not an error.
        bus.cancel_scheduled(token).await.unwrap();
    }
}
