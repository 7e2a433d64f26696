//! The generic saga engine.
//!
//! Hosts one saga kind: correlates inbound envelopes to persisted
//! instances, evaluates the transition table, runs the saga's action, and
//! persists the next state. Outgoing messages are staged through the
//! outbox; timeouts are bus-scheduled delayed messages addressed back to
//! the engine's own queue.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bus::{HandlerResult, MessageBus, MessageEnvelope, MessageHandler, ScheduleToken};
use common::CorrelationId;
use outbox::{OutboxMessage, OutboxStore};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Result, SagaError};
use crate::machine::{TIMEOUT_FIRED, TransitionTable};
use crate::store::{SagaRow, SagaStore};

/// Attempts before giving up on an optimistic-lock race. Two deliveries
/// for the same correlation id contending is normal; more than a couple
/// of rounds means something is wrong.
const MAX_TRANSITION_ATTEMPTS: usize = 3;

/// Effect collector handed to a saga action.
///
/// Actions never touch the bus or outbox directly; they record intent
/// here and the engine applies it after the transition wins its version
/// check.
pub struct SagaContext {
    correlation_id: CorrelationId,
    publishes: Vec<(String, MessageEnvelope)>,
    schedule_timeout: Option<Duration>,
    cancel_timeout: bool,
}

impl SagaContext {
    fn new(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            publishes: Vec::new(),
            schedule_timeout: None,
            cancel_timeout: false,
        }
    }

    /// Correlation id of the instance being driven.
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Stages a command/event for publication to `queue` via the outbox.
    pub fn publish<T: Serialize>(
        &mut self,
        queue: &str,
        message_type: &str,
        payload: &T,
    ) -> Result<()> {
        let envelope = MessageEnvelope::new(message_type, self.correlation_id, payload)?;
        self.publishes.push((queue.to_string(), envelope));
        Ok(())
    }

    /// Schedules a `TimeoutFired` delivery back to this saga after
    /// `delay`, replacing any outstanding timeout.
    pub fn schedule_timeout(&mut self, delay: Duration) {
        self.schedule_timeout = Some(delay);
    }

    /// Cancels the outstanding timeout, if any. Entering a terminal state
    /// cancels it implicitly.
    pub fn cancel_timeout(&mut self) {
        self.cancel_timeout = true;
    }
}

/// One saga kind: a typed state, a snapshot record, a transition table,
/// and the action run on each transition.
#[async_trait]
pub trait Saga: Send + Sync + 'static {
    /// Enumerated state, persisted as JSON.
    type State: Copy
        + Eq
        + std::hash::Hash
        + std::fmt::Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync;

    /// Business snapshot needed to resume, persisted as JSON.
    type Data: Default + Serialize + DeserializeOwned + Send + Sync;

    /// Stable name, stored on the instance row.
    fn saga_type(&self) -> &'static str;

    /// The transition table evaluated by the engine.
    fn table(&self) -> &TransitionTable<Self::State>;

    /// Executes the action for one transition.
    ///
    /// `current` is `None` when an initial event creates the instance.
    /// Returning `Some(state)` overrides the table's `next` state, for
    /// transitions whose destination depends on the payload.
    async fn apply(
        &self,
        ctx: &mut SagaContext,
        current: Option<Self::State>,
        next: Self::State,
        data: &mut Self::Data,
        envelope: &MessageEnvelope,
    ) -> Result<Option<Self::State>>;
}

enum Applied {
    Transitioned,
    Discarded,
}

/// Drives one saga kind from bus deliveries.
///
/// Implements [`MessageHandler`] so it can sit in the handler registry;
/// deployments wrap it in an idempotent consumer so redelivered events
/// are absorbed before they reach the table.
pub struct SagaEngine<G: Saga> {
    saga: G,
    store: Arc<dyn SagaStore>,
    outbox: Arc<dyn OutboxStore>,
    bus: Arc<dyn MessageBus>,
    /// Inbound queue of this engine; timeouts are addressed back to it.
    queue: String,
}

impl<G: Saga> SagaEngine<G> {
    /// Creates an engine for one saga kind.
    pub fn new(
        saga: G,
        store: Arc<dyn SagaStore>,
        outbox: Arc<dyn OutboxStore>,
        bus: Arc<dyn MessageBus>,
        queue: impl Into<String>,
    ) -> Self {
        Self {
            saga,
            store,
            outbox,
            bus,
            queue: queue.into(),
        }
    }

    /// Routes one delivery through the transition table.
    ///
    /// Events with no defined transition (stale timeouts, duplicates that
    /// slipped past the ledger, out-of-order arrivals) are logged and
    /// discarded; that is expected traffic, not an error.
    #[tracing::instrument(
        skip(self, envelope),
        fields(
            saga_type = self.saga.saga_type(),
            correlation_id = %envelope.correlation_id,
            event_type = %envelope.message_type,
        )
    )]
    pub async fn handle_event(&self, envelope: &MessageEnvelope) -> Result<()> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_transition(envelope).await {
                Ok(Applied::Transitioned) => {
                    metrics::counter!("saga_transitions_total", "saga_type" => self.saga.saga_type())
                        .increment(1);
                    return Ok(());
                }
                Ok(Applied::Discarded) => {
                    metrics::counter!("saga_events_discarded_total", "saga_type" => self.saga.saga_type())
                        .increment(1);
                    return Ok(());
                }
                Err(SagaError::VersionConflict(id)) if attempt < MAX_TRANSITION_ATTEMPTS => {
                    tracing::debug!(%id, attempt, "lost version check, reloading and retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_transition(&self, envelope: &MessageEnvelope) -> Result<Applied> {
        let correlation_id = envelope.correlation_id;
        let event_type = envelope.message_type.as_str();
        let table = self.saga.table();

        let existing = self.store.get(correlation_id).await?;
        let (current, next) = match &existing {
            None => match table.initial_state(event_type) {
                Some(next) => (None, next),
                None => {
                    tracing::debug!("event for unknown saga instance, discarding");
                    return Ok(Applied::Discarded);
                }
            },
            Some(row) => {
                if row.saga_type != self.saga.saga_type() {
                    tracing::warn!(
                        instance_type = %row.saga_type,
                        "correlation id belongs to a different saga kind, discarding"
                    );
                    return Ok(Applied::Discarded);
                }
                if row.finished {
                    tracing::debug!("event for finished saga instance, discarding");
                    return Ok(Applied::Discarded);
                }
                let current: G::State = serde_json::from_value(row.state.clone())?;
                match table.next_state(current, event_type) {
                    Some(next) => (Some(current), next),
                    None => {
                        tracing::debug!(state = ?current, "no transition for event, discarding");
                        return Ok(Applied::Discarded);
                    }
                }
            }
        };

        let mut data: G::Data = match &existing {
            Some(row) => serde_json::from_value(row.data.clone())?,
            None => G::Data::default(),
        };

        let mut ctx = SagaContext::new(correlation_id);
        let override_state = self
            .saga
            .apply(&mut ctx, current, next, &mut data, envelope)
            .await?;
        let final_state = override_state.unwrap_or(next);
        let finished = table.is_terminal(final_state);

        // Timeout plan: a new schedule replaces the outstanding token;
        // a terminal state or explicit cancel drops it.
        let prior_token = existing.as_ref().and_then(|row| row.timeout_token);
        let supersede_prior = finished || ctx.cancel_timeout || ctx.schedule_timeout.is_some();
        let new_token = match ctx.schedule_timeout {
            Some(delay) if !finished => Some(self.schedule_timeout(correlation_id, delay).await?),
            _ => {
                if supersede_prior {
                    None
                } else {
                    prior_token
                }
            }
        };

        // The version check decides the winner before any effect lands.
        let state_json = serde_json::to_value(final_state)?;
        let data_json = serde_json::to_value(&data)?;
        let persisted = match existing {
            None => {
                let mut row = SagaRow::new(correlation_id, self.saga.saga_type(), state_json, data_json);
                row.timeout_token = new_token;
                row.finished = finished;
                self.store.insert(row).await
            }
            Some(mut row) => {
                row.state = state_json;
                row.data = data_json;
                row.timeout_token = new_token;
                row.finished = finished;
                self.store.update(row).await
            }
        };
        if let Err(e) = persisted {
            // The losing transition must not leave its timer behind.
            if let Some(token) = new_token {
                if new_token != prior_token {
                    let _ = self.bus.cancel_scheduled(token).await;
                }
            }
            return Err(e);
        }

        if supersede_prior {
            if let Some(token) = prior_token {
                self.bus.cancel_scheduled(token).await?;
            }
        }

        for (queue, outgoing) in ctx.publishes {
            self.outbox
                .stage(OutboxMessage::stage(queue, &outgoing))
                .await?;
        }

        tracing::info!(from = ?current, to = ?final_state, "saga transition applied");
        if finished {
            metrics::counter!(
                "saga_finished_total",
                "saga_type" => self.saga.saga_type(),
                "state" => format!("{final_state:?}"),
            )
            .increment(1);
        }
        Ok(Applied::Transitioned)
    }

    async fn schedule_timeout(
        &self,
        correlation_id: CorrelationId,
        delay: Duration,
    ) -> Result<ScheduleToken> {
        let envelope =
            MessageEnvelope::new(TIMEOUT_FIRED, correlation_id, &serde_json::json!({}))?;
        Ok(self.bus.schedule(&self.queue, envelope, delay).await?)
    }
}

#[async_trait]
impl<G: Saga> MessageHandler for SagaEngine<G> {
    async fn handle(&self, envelope: &MessageEnvelope) -> HandlerResult {
        self.handle_event(envelope).await?;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use bus::InMemoryBus;
    use outbox::InMemoryOutboxStore;
    use serde::Deserialize;

    use super::*;
    use crate::memory::InMemorySagaStore;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    enum HandshakeState {
        AwaitingAck,
        Completed,
        Failed,
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct HandshakeData {
        peer: Option<String>,
        acks: Vec<i64>,
        error: Option<String>,
    }

    #[derive(Debug, Deserialize, Serialize)]
    struct Begin {
        peer: String,
    }

    #[derive(Debug, Deserialize, Serialize)]
    struct PartialAck {
        member: i64,
        complete: bool,
    }

    /// Two-step fixture: ping a peer, wait for acknowledgement with a
    /// timeout, with a payload-dependent self-loop on partial acks.
    struct HandshakeSaga {
        table: TransitionTable<HandshakeState>,
    }

    impl HandshakeSaga {
        fn new() -> Self {
            let table = TransitionTable::new()
                .start("Begin", HandshakeState::AwaitingAck)
                .on(HandshakeState::AwaitingAck, "Ack", HandshakeState::Completed)
                .on(
                    HandshakeState::AwaitingAck,
                    "PartialAck",
                    HandshakeState::Completed,
                )
                .on(HandshakeState::AwaitingAck, "Nack", HandshakeState::Failed)
                .on(
                    HandshakeState::AwaitingAck,
                    TIMEOUT_FIRED,
                    HandshakeState::Failed,
                )
                .terminal(HandshakeState::Completed)
                .terminal(HandshakeState::Failed);
            Self { table }
        }
    }

    #[async_trait]
    impl Saga for HandshakeSaga {
        type State = HandshakeState;
        type Data = HandshakeData;

        fn saga_type(&self) -> &'static str {
            "Handshake"
        }

        fn table(&self) -> &TransitionTable<HandshakeState> {
            &self.table
        }

        async fn apply(
            &self,
            ctx: &mut SagaContext,
            current: Option<HandshakeState>,
            _next: HandshakeState,
            data: &mut HandshakeData,
            envelope: &MessageEnvelope,
        ) -> Result<Option<HandshakeState>> {
            match envelope.message_type.as_str() {
                "Begin" => {
                    assert!(current.is_none());
                    let begin: Begin = envelope.payload_as()?;
                    data.peer = Some(begin.peer.clone());
                    ctx.publish("peer-commands", "Ping", &begin)?;
                    ctx.schedule_timeout(Duration::from_secs(30));
                    Ok(None)
                }
                "PartialAck" => {
                    let ack: PartialAck = envelope.payload_as()?;
                    data.acks.push(ack.member);
                    if ack.complete {
                        Ok(None)
                    } else {
                        // Not everyone has answered; stay put.
                        Ok(Some(HandshakeState::AwaitingAck))
                    }
                }
                "Nack" | TIMEOUT_FIRED => {
                    data.error = Some(envelope.message_type.clone());
                    Ok(None)
                }
                _ => Ok(None),
            }
        }
    }

    struct Fixture {
        engine: SagaEngine<HandshakeSaga>,
        store: Arc<InMemorySagaStore>,
        outbox: Arc<InMemoryOutboxStore>,
        bus: Arc<InMemoryBus>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemorySagaStore::new());
        let outbox = Arc::new(InMemoryOutboxStore::new());
        let bus = Arc::new(InMemoryBus::new());
        let engine = SagaEngine::new(
            HandshakeSaga::new(),
            store.clone(),
            outbox.clone(),
            bus.clone(),
            "handshake-saga",
        );
        Fixture {
            engine,
            store,
            outbox,
            bus,
        }
    }

    fn event<T: Serialize>(message_type: &str, correlation_id: CorrelationId, payload: &T) -> MessageEnvelope {
        MessageEnvelope::new(message_type, correlation_id, payload).unwrap()
    }

    async fn begin(f: &Fixture) -> CorrelationId {
        let id = CorrelationId::new();
        f.engine
            .handle_event(&event("Begin", id, &Begin { peer: "p".into() }))
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn initial_event_creates_instance_with_effects() {
        let f = fixture();
        let id = begin(&f).await;

        let row = f.store.get(id).await.unwrap().unwrap();
        assert_eq!(row.saga_type, "Handshake");
        assert_eq!(row.state, serde_json::json!("AwaitingAck"));
        assert!(!row.finished);
        assert_eq!(row.version, 1);
        assert!(row.timeout_token.is_some());
        assert!(f.bus.has_scheduled(row.timeout_token.unwrap()));

        // The ping went through the outbox, not straight to the bus.
        assert_eq!(f.outbox.row_count(), 1);
        assert!(f.bus.published().is_empty());
    }

    #[tokio::test]
    async fn completing_transition_cancels_the_timeout() {
        let f = fixture();
        let id = begin(&f).await;

        f.engine
            .handle_event(&event("Ack", id, &serde_json::json!({})))
            .await
            .unwrap();

        let row = f.store.get(id).await.unwrap().unwrap();
        assert_eq!(row.state, serde_json::json!("Completed"));
        assert!(row.finished);
        assert_eq!(row.version, 2);
        assert!(row.timeout_token.is_none());
        assert_eq!(f.bus.scheduled_count(), 0);
    }

    #[tokio::test]
    async fn timeout_routes_like_a_failure_event() {
        let f = fixture();
        let id = begin(&f).await;

        f.engine
            .handle_event(&event(TIMEOUT_FIRED, id, &serde_json::json!({})))
            .await
            .unwrap();

        let row = f.store.get(id).await.unwrap().unwrap();
        assert_eq!(row.state, serde_json::json!("Failed"));
        assert!(row.finished);
        let data: HandshakeData = serde_json::from_value(row.data).unwrap();
        assert_eq!(data.error.as_deref(), Some(TIMEOUT_FIRED));
    }

    #[tokio::test]
    async fn unroutable_event_leaves_instance_untouched() {
        let f = fixture();
        let id = begin(&f).await;
        let before = f.store.get(id).await.unwrap().unwrap();

        // "Nonsense" has no row anywhere in the table.
        f.engine
            .handle_event(&event("Nonsense", id, &serde_json::json!({})))
            .await
            .unwrap();

        let after = f.store.get(id).await.unwrap().unwrap();
        assert_eq!(after.state, before.state);
        assert_eq!(after.version, before.version);
    }

    #[tokio::test]
    async fn non_initial_event_for_unknown_correlation_is_discarded() {
        let f = fixture();
        f.engine
            .handle_event(&event("Ack", CorrelationId::new(), &serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(f.store.row_count(), 0);
    }

    #[tokio::test]
    async fn finished_instance_rejects_further_events() {
        let f = fixture();
        let id = begin(&f).await;
        f.engine
            .handle_event(&event("Ack", id, &serde_json::json!({})))
            .await
            .unwrap();

        f.engine
            .handle_event(&event("Nack", id, &serde_json::json!({})))
            .await
            .unwrap();

        let row = f.store.get(id).await.unwrap().unwrap();
        assert_eq!(row.state, serde_json::json!("Completed"));
        assert_eq!(row.version, 2);
    }

    #[tokio::test]
    async fn action_can_override_the_table_destination() {
        let f = fixture();
        let id = begin(&f).await;

        f.engine
            .handle_event(&event(
                "PartialAck",
                id,
                &PartialAck {
                    member: 2,
                    complete: false,
                },
            ))
            .await
            .unwrap();

        let row = f.store.get(id).await.unwrap().unwrap();
        assert_eq!(row.state, serde_json::json!("AwaitingAck"));
        assert!(!row.finished);
        let data: HandshakeData = serde_json::from_value(row.data.clone()).unwrap();
        assert_eq!(data.acks, vec![2]);

        f.engine
            .handle_event(&event(
                "PartialAck",
                id,
                &PartialAck {
                    member: 3,
                    complete: true,
                },
            ))
            .await
            .unwrap();

        let row = f.store.get(id).await.unwrap().unwrap();
        assert_eq!(row.state, serde_json::json!("Completed"));
        let data: HandshakeData = serde_json::from_value(row.data).unwrap();
        assert_eq!(data.acks, vec![2, 3]);
    }

    #[tokio::test]
    async fn snapshot_data_survives_across_transitions() {
        let f = fixture();
        let id = begin(&f).await;

        let row = f.store.get(id).await.unwrap().unwrap();
        let data: HandshakeData = serde_json::from_value(row.data).unwrap();
        assert_eq!(data.peer.as_deref(), Some("p"));

        f.engine
            .handle_event(&event(
                "PartialAck",
                id,
                &PartialAck {
                    member: 7,
                    complete: false,
                },
            ))
            .await
            .unwrap();
        let row = f.store.get(id).await.unwrap().unwrap();
        let data: HandshakeData = serde_json::from_value(row.data).unwrap();
        assert_eq!(data.peer.as_deref(), Some("p"));
        assert_eq!(data.acks, vec![7]);
    }
}
