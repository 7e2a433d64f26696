//! The message-delivery saga and its command workers.
//!
//! Delivering a message is save, fan-out, then an open-ended wait for
//! per-recipient confirmations. The waiting state is an accumulator, not
//! a single-event wait: every `DeliveredToUser` appends to the delivered
//! set and triggers a status check against the room's participant list.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bus::{HandlerResult, MessageEnvelope, MessageHandler};
use common::{ChatRoomId, MessageId, UserId};
use operations::{OperationTracker, OperationType, StartOperation};
use orchestrator::{Result, Saga, SagaContext, SagaError, TIMEOUT_FIRED, TransitionTable};
use outbox::OutboxStore;
use serde::{Deserialize, Serialize};

use crate::contracts::{
    CheckDeliveryStatus, DELIVERY_COMMANDS_QUEUE, DeliveredToUser, DeliveryStatusChecked,
    FailureOccurred, MESSAGE_COMMANDS_QUEUE, MESSAGE_DELIVERY_SAGA_QUEUE, MessagePublished,
    MessageSaved, MessageSendRequested, PublishMessage, SaveMessage,
};
use crate::services::{DeliveryService, MessageStoreService, RoomService};
use crate::staging::stage_reply;

/// Bound on the save and fan-out steps. The confirmation wait has no
/// timeout; recipients may be offline for days.
const STEP_TIMEOUT: Duration = Duration::from_secs(30);

/// States of the message-delivery saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageDeliveryState {
    Saving,
    Publishing,
    AwaitingDeliveryConfirmation,
    Completed,
    Failed,
}

/// Snapshot needed to resume a delivery in flight.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageDeliveryData {
    pub chat_room_id: Option<ChatRoomId>,
    pub sender_user_id: Option<UserId>,
    pub content: String,
    pub message_id: Option<MessageId>,
    /// Recipients who confirmed receipt, deduplicated.
    pub delivered: Vec<UserId>,
    pub error: Option<String>,
}

/// Orchestrated save / fan-out / confirm flow for one message.
pub struct MessageDeliverySaga {
    table: TransitionTable<MessageDeliveryState>,
    tracker: Arc<OperationTracker>,
}

impl MessageDeliverySaga {
    /// Creates the saga definition.
    pub fn new(tracker: Arc<OperationTracker>) -> Self {
        use MessageDeliveryState::*;
        let table = TransitionTable::new()
            .start("MessageSendRequested", Saving)
            .on(Saving, "MessageSaved", Publishing)
            .on(Saving, "FailureOccurred", Failed)
            .on(Saving, TIMEOUT_FIRED, Failed)
            .on(Publishing, "MessagePublished", AwaitingDeliveryConfirmation)
            .on(Publishing, "FailureOccurred", Failed)
            .on(Publishing, TIMEOUT_FIRED, Failed)
            .on(
                AwaitingDeliveryConfirmation,
                "DeliveredToUser",
                AwaitingDeliveryConfirmation,
            )
            .on(
                AwaitingDeliveryConfirmation,
                "DeliveryStatusChecked",
                Completed,
            )
            .on(AwaitingDeliveryConfirmation, "FailureOccurred", Failed)
            .terminal(Completed)
            .terminal(Failed);
        Self { table, tracker }
    }

    fn snapshot(data: &MessageDeliveryData) -> Result<(ChatRoomId, UserId)> {
        match (data.chat_room_id, data.sender_user_id) {
            (Some(room), Some(sender)) => Ok((room, sender)),
            _ => Err(SagaError::Action("missing delivery snapshot".to_string())),
        }
    }
}

#[async_trait]
impl Saga for MessageDeliverySaga {
    type State = MessageDeliveryState;
    type Data = MessageDeliveryData;

    fn saga_type(&self) -> &'static str {
        "MessageDelivery"
    }

    fn table(&self) -> &TransitionTable<MessageDeliveryState> {
        &self.table
    }

    async fn apply(
        &self,
        ctx: &mut SagaContext,
        _current: Option<MessageDeliveryState>,
        _next: MessageDeliveryState,
        data: &mut MessageDeliveryData,
        envelope: &MessageEnvelope,
    ) -> Result<Option<MessageDeliveryState>> {
        let correlation_id = ctx.correlation_id();
        match envelope.message_type.as_str() {
            "MessageSendRequested" => {
                let requested: MessageSendRequested = envelope.payload_as()?;
                data.chat_room_id = Some(requested.chat_room_id);
                data.sender_user_id = Some(requested.sender_user_id);
                data.content = requested.content.clone();

                self.tracker
                    .start(StartOperation {
                        correlation_id,
                        operation_type: OperationType::SendMessage,
                        chat_room_id: Some(requested.chat_room_id),
                        message_id: None,
                        initiator_user_id: requested.sender_user_id,
                        operation_data: None,
                    })
                    .await
                    .map_err(|e| SagaError::Action(e.to_string()))?;

                ctx.publish(
                    MESSAGE_COMMANDS_QUEUE,
                    "SaveMessage",
                    &SaveMessage {
                        chat_room_id: requested.chat_room_id,
                        sender_user_id: requested.sender_user_id,
                        content: requested.content,
                    },
                )?;
                ctx.schedule_timeout(STEP_TIMEOUT);
            }
            "MessageSaved" => {
                let saved: MessageSaved = envelope.payload_as()?;
                data.message_id = Some(saved.message_id);
                let (chat_room_id, sender_user_id) = Self::snapshot(data)?;

                self.tracker
                    .update_progress(correlation_id, 40, "message saved")
                    .await
                    .map_err(|e| SagaError::Action(e.to_string()))?;

                ctx.publish(
                    DELIVERY_COMMANDS_QUEUE,
                    "PublishMessage",
                    &PublishMessage {
                        message_id: saved.message_id,
                        chat_room_id,
                        sender_user_id,
                    },
                )?;
                ctx.schedule_timeout(STEP_TIMEOUT);
            }
            "MessagePublished" => {
                self.tracker
                    .update_progress(correlation_id, 70, "message published")
                    .await
                    .map_err(|e| SagaError::Action(e.to_string()))?;
                // Confirmations depend on user activity; no timeout here.
                ctx.cancel_timeout();
            }
            "DeliveredToUser" => {
                let delivered: DeliveredToUser = envelope.payload_as()?;
                if !data.delivered.contains(&delivered.user_id) {
                    data.delivered.push(delivered.user_id);
                }
                let (chat_room_id, sender_user_id) = Self::snapshot(data)?;
                ctx.publish(
                    DELIVERY_COMMANDS_QUEUE,
                    "CheckDeliveryStatus",
                    &CheckDeliveryStatus {
                        chat_room_id,
                        sender_user_id,
                        delivered_user_ids: data.delivered.clone(),
                    },
                )?;
            }
            "DeliveryStatusChecked" => {
                let checked: DeliveryStatusChecked = envelope.payload_as()?;
                if !checked.is_delivered_to_all {
                    // Someone is still missing; keep accumulating.
                    return Ok(Some(MessageDeliveryState::AwaitingDeliveryConfirmation));
                }
                self.tracker
                    .complete(
                        correlation_id,
                        data.message_id
                            .map(|id| serde_json::json!({ "message_id": id })),
                    )
                    .await
                    .map_err(|e| SagaError::Action(e.to_string()))?;
            }
            "FailureOccurred" | TIMEOUT_FIRED => {
                let reason = if envelope.message_type == TIMEOUT_FIRED {
                    "step timed out".to_string()
                } else {
                    let failure: FailureOccurred = envelope.payload_as()?;
                    failure.reason
                };
                data.error = Some(reason.clone());
                ctx.cancel_timeout();
                self.tracker
                    .fail(correlation_id, reason, None)
                    .await
                    .map_err(|e| SagaError::Action(e.to_string()))?;
            }
            other => {
                return Err(SagaError::Action(format!("unexpected event {other}")));
            }
        }
        Ok(None)
    }
}

/// Services `SaveMessage` commands for the message-store side.
pub struct SaveMessageWorker {
    messages: Arc<dyn MessageStoreService>,
    outbox: Arc<dyn OutboxStore>,
}

impl SaveMessageWorker {
    pub fn new(messages: Arc<dyn MessageStoreService>, outbox: Arc<dyn OutboxStore>) -> Self {
        Self { messages, outbox }
    }
}

#[async_trait]
impl MessageHandler for SaveMessageWorker {
    async fn handle(&self, envelope: &MessageEnvelope) -> HandlerResult {
        let cmd: SaveMessage = envelope.payload_as()?;
        match self
            .messages
            .save_message(cmd.chat_room_id, cmd.sender_user_id, &cmd.content)
            .await
        {
            Ok(message_id) => {
                stage_reply(
                    self.outbox.as_ref(),
                    envelope.correlation_id,
                    MESSAGE_DELIVERY_SAGA_QUEUE,
                    "MessageSaved",
                    &MessageSaved {
                        message_id,
                        chat_room_id: cmd.chat_room_id,
                    },
                )
                .await?;
            }
            Err(e) => {
                tracing::warn!(chat_room_id = %cmd.chat_room_id, error = %e, "message save failed");
                stage_reply(
                    self.outbox.as_ref(),
                    envelope.correlation_id,
                    MESSAGE_DELIVERY_SAGA_QUEUE,
                    "FailureOccurred",
                    &FailureOccurred {
                        reason: e.to_string(),
                    },
                )
                .await?;
            }
        }
        Ok(None)
    }
}

/// Services `PublishMessage` commands for the push-transport side.
pub struct PublishMessageWorker {
    delivery: Arc<dyn DeliveryService>,
    outbox: Arc<dyn OutboxStore>,
}

impl PublishMessageWorker {
    pub fn new(delivery: Arc<dyn DeliveryService>, outbox: Arc<dyn OutboxStore>) -> Self {
        Self { delivery, outbox }
    }
}

#[async_trait]
impl MessageHandler for PublishMessageWorker {
    async fn handle(&self, envelope: &MessageEnvelope) -> HandlerResult {
        let cmd: PublishMessage = envelope.payload_as()?;
        match self
            .delivery
            .publish_message(cmd.chat_room_id, cmd.message_id, cmd.sender_user_id)
            .await
        {
            Ok(()) => {
                stage_reply(
                    self.outbox.as_ref(),
                    envelope.correlation_id,
                    MESSAGE_DELIVERY_SAGA_QUEUE,
                    "MessagePublished",
                    &MessagePublished {
                        message_id: cmd.message_id,
                    },
                )
                .await?;
            }
            Err(e) => {
                tracing::warn!(message_id = %cmd.message_id, error = %e, "message fan-out failed");
                stage_reply(
                    self.outbox.as_ref(),
                    envelope.correlation_id,
                    MESSAGE_DELIVERY_SAGA_QUEUE,
                    "FailureOccurred",
                    &FailureOccurred {
                        reason: e.to_string(),
                    },
                )
                .await?;
            }
        }
        Ok(None)
    }
}

/// Services `CheckDeliveryStatus` commands.
///
/// Compares the saga's delivered set against the room's participant list
/// minus the sender. A transport error during the lookup reports
/// delivered-to-all rather than blocking the saga on a directory outage;
/// availability is preferred over a strictly correct receipt count.
pub struct CheckDeliveryStatusWorker {
    rooms: Arc<dyn RoomService>,
    outbox: Arc<dyn OutboxStore>,
}

impl CheckDeliveryStatusWorker {
    pub fn new(rooms: Arc<dyn RoomService>, outbox: Arc<dyn OutboxStore>) -> Self {
        Self { rooms, outbox }
    }
}

#[async_trait]
impl MessageHandler for CheckDeliveryStatusWorker {
    async fn handle(&self, envelope: &MessageEnvelope) -> HandlerResult {
        let cmd: CheckDeliveryStatus = envelope.payload_as()?;
        let is_delivered_to_all = match self.rooms.participants(cmd.chat_room_id).await {
            Ok(participants) => participants
                .into_iter()
                .filter(|user| *user != cmd.sender_user_id)
                .all(|user| cmd.delivered_user_ids.contains(&user)),
            Err(e) => {
                tracing::warn!(
                    chat_room_id = %cmd.chat_room_id,
                    error = %e,
                    "participant lookup failed, reporting delivered"
                );
                true
            }
        };

        stage_reply(
            self.outbox.as_ref(),
            envelope.correlation_id,
            MESSAGE_DELIVERY_SAGA_QUEUE,
            "DeliveryStatusChecked",
            &DeliveryStatusChecked {
                is_delivered_to_all,
            },
        )
        .await?;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use common::CorrelationId;
    use operations::{InMemoryOperationStore, OperationStatus, OperationStore};
    use orchestrator::{InMemorySagaStore, SagaEngine, SagaStore};
    use outbox::InMemoryOutboxStore;

    use super::*;
    use crate::services::InMemoryRoomService;

    struct Fixture {
        engine: SagaEngine<MessageDeliverySaga>,
        saga_store: Arc<InMemorySagaStore>,
        outbox: Arc<InMemoryOutboxStore>,
        operations: Arc<InMemoryOperationStore>,
        bus: Arc<bus::InMemoryBus>,
    }

    fn fixture() -> Fixture {
        let saga_store = Arc::new(InMemorySagaStore::new());
        let outbox = Arc::new(InMemoryOutboxStore::new());
        let operations = Arc::new(InMemoryOperationStore::new());
        let bus = Arc::new(bus::InMemoryBus::new());
        let tracker = Arc::new(OperationTracker::new(operations.clone(), outbox.clone()));
        let engine = SagaEngine::new(
            MessageDeliverySaga::new(tracker),
            saga_store.clone(),
            outbox.clone(),
            bus.clone(),
            MESSAGE_DELIVERY_SAGA_QUEUE,
        );
        Fixture {
            engine,
            saga_store,
            outbox,
            operations,
            bus,
        }
    }

    fn event<T: Serialize>(
        message_type: &str,
        correlation_id: CorrelationId,
        payload: &T,
    ) -> MessageEnvelope {
        MessageEnvelope::new(message_type, correlation_id, payload).unwrap()
    }

    async fn to_awaiting(f: &Fixture) -> CorrelationId {
        let id = CorrelationId::new();
        f.engine
            .handle_event(&event(
                "MessageSendRequested",
                id,
                &MessageSendRequested {
                    chat_room_id: ChatRoomId::new(5),
                    sender_user_id: UserId::new(1),
                    content: "hi".to_string(),
                },
            ))
            .await
            .unwrap();
        f.engine
            .handle_event(&event(
                "MessageSaved",
                id,
                &MessageSaved {
                    message_id: MessageId::new(9),
                    chat_room_id: ChatRoomId::new(5),
                },
            ))
            .await
            .unwrap();
        f.engine
            .handle_event(&event(
                "MessagePublished",
                id,
                &MessagePublished {
                    message_id: MessageId::new(9),
                },
            ))
            .await
            .unwrap();
        id
    }

    async fn data_of(f: &Fixture, id: CorrelationId) -> MessageDeliveryData {
        let row = f.saga_store.get(id).await.unwrap().unwrap();
        serde_json::from_value(row.data).unwrap()
    }

    #[tokio::test]
    async fn walks_to_awaiting_with_progress_and_no_timer() {
        let f = fixture();
        let id = to_awaiting(&f).await;

        let row = f.saga_store.get(id).await.unwrap().unwrap();
        assert_eq!(
            row.state,
            serde_json::json!("AwaitingDeliveryConfirmation")
        );
        // The open-ended wait holds no timeout.
        assert_eq!(f.bus.scheduled_count(), 0);
        assert!(row.timeout_token.is_none());

        let operation = f.operations.get(id).await.unwrap().unwrap();
        assert_eq!(operation.progress, 70);
        assert_eq!(operation.status, OperationStatus::InProgress);
    }

    #[tokio::test]
    async fn confirmations_accumulate_deduplicated() {
        let f = fixture();
        let id = to_awaiting(&f).await;

        for user in [2, 2, 3] {
            f.engine
                .handle_event(&event(
                    "DeliveredToUser",
                    id,
                    &DeliveredToUser {
                        message_id: MessageId::new(9),
                        user_id: UserId::new(user),
                    },
                ))
                .await
                .unwrap();
        }

        let data = data_of(&f, id).await;
        assert_eq!(data.delivered, vec![UserId::new(2), UserId::new(3)]);

        // Each confirmation issued a status check with the set so far.
        let checks: Vec<_> = f
            .outbox
            .rows()
            .into_iter()
            .filter(|m| m.event_type == "CheckDeliveryStatus")
            .collect();
        assert_eq!(checks.len(), 3);
    }

    #[tokio::test]
    async fn partial_check_keeps_waiting_full_check_completes() {
        let f = fixture();
        let id = to_awaiting(&f).await;

        f.engine
            .handle_event(&event(
                "DeliveryStatusChecked",
                id,
                &DeliveryStatusChecked {
                    is_delivered_to_all: false,
                },
            ))
            .await
            .unwrap();
        let row = f.saga_store.get(id).await.unwrap().unwrap();
        assert_eq!(
            row.state,
            serde_json::json!("AwaitingDeliveryConfirmation")
        );
        assert!(!row.finished);

        f.engine
            .handle_event(&event(
                "DeliveryStatusChecked",
                id,
                &DeliveryStatusChecked {
                    is_delivered_to_all: true,
                },
            ))
            .await
            .unwrap();
        let row = f.saga_store.get(id).await.unwrap().unwrap();
        assert_eq!(row.state, serde_json::json!("Completed"));

        let operation = f.operations.get(id).await.unwrap().unwrap();
        assert_eq!(operation.status, OperationStatus::Completed);
    }

    #[tokio::test]
    async fn save_failure_fails_saga_and_operation() {
        let f = fixture();
        let id = CorrelationId::new();
        f.engine
            .handle_event(&event(
                "MessageSendRequested",
                id,
                &MessageSendRequested {
                    chat_room_id: ChatRoomId::new(5),
                    sender_user_id: UserId::new(1),
                    content: "hi".to_string(),
                },
            ))
            .await
            .unwrap();

        f.engine
            .handle_event(&event(
                "FailureOccurred",
                id,
                &FailureOccurred {
                    reason: "message store down".to_string(),
                },
            ))
            .await
            .unwrap();

        let row = f.saga_store.get(id).await.unwrap().unwrap();
        assert_eq!(row.state, serde_json::json!("Failed"));
        assert_eq!(f.bus.scheduled_count(), 0);

        let operation = f.operations.get(id).await.unwrap().unwrap();
        assert_eq!(operation.status, OperationStatus::Failed);
        assert_eq!(
            operation.error_message.as_deref(),
            Some("message store down")
        );
    }

    #[tokio::test]
    async fn check_worker_compares_against_participants_minus_sender() {
        let rooms = Arc::new(InMemoryRoomService::new());
        rooms
            .create_room(
                ChatRoomId::new(5),
                UserId::new(1),
                &[UserId::new(2), UserId::new(3)],
            )
            .await
            .unwrap();
        let outbox = Arc::new(InMemoryOutboxStore::new());
        let worker = CheckDeliveryStatusWorker::new(rooms.clone(), outbox.clone());
        let id = CorrelationId::new();

        let check = |delivered: Vec<UserId>| CheckDeliveryStatus {
            chat_room_id: ChatRoomId::new(5),
            sender_user_id: UserId::new(1),
            delivered_user_ids: delivered,
        };

        worker
            .handle(&event("CheckDeliveryStatus", id, &check(vec![UserId::new(2)])))
            .await
            .unwrap();
        worker
            .handle(&event(
                "CheckDeliveryStatus",
                id,
                &check(vec![UserId::new(2), UserId::new(3)]),
            ))
            .await
            .unwrap();

        let replies: Vec<DeliveryStatusChecked> = outbox
            .rows()
            .into_iter()
            .filter(|m| m.event_type == "DeliveryStatusChecked")
            .map(|m| serde_json::from_value(m.payload).unwrap())
            .collect();
        let mut flags: Vec<bool> = replies.iter().map(|r| r.is_delivered_to_all).collect();
        flags.sort();
        assert_eq!(flags, vec![false, true]);
    }

    #[tokio::test]
    async fn check_worker_reports_delivered_on_lookup_failure() {
        let rooms = Arc::new(InMemoryRoomService::new());
        rooms
            .create_room(ChatRoomId::new(5), UserId::new(1), &[UserId::new(2)])
            .await
            .unwrap();
        rooms.set_fail_on_participants(true);
        let outbox = Arc::new(InMemoryOutboxStore::new());
        let worker = CheckDeliveryStatusWorker::new(rooms, outbox.clone());

        worker
            .handle(&event(
                "CheckDeliveryStatus",
                CorrelationId::new(),
                &CheckDeliveryStatus {
                    chat_room_id: ChatRoomId::new(5),
                    sender_user_id: UserId::new(1),
                    delivered_user_ids: vec![],
                },
            ))
            .await
            .unwrap();

        let reply: DeliveryStatusChecked = outbox
            .rows()
            .into_iter()
            .find(|m| m.event_type == "DeliveryStatusChecked")
            .map(|m| serde_json::from_value(m.payload).unwrap())
            .unwrap();
        assert!(reply.is_delivered_to_all);
    }
}
