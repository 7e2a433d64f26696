//! The chat-creation saga and its command workers.
//!
//! Creating a room spans the room-storage and downstream-indexing
//! services. The saga drives both steps, keeps the tracked operation's
//! progress moving, and compensates by deleting the room when either
//! step fails or times out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bus::{HandlerResult, MessageEnvelope, MessageHandler};
use common::{ChatRoomId, UserId};
use operations::{OperationTracker, OperationType, StartOperation};
use orchestrator::{Result, Saga, SagaContext, SagaError, TIMEOUT_FIRED, TransitionTable};
use outbox::OutboxStore;
use serde::{Deserialize, Serialize};

use crate::contracts::{
    CHAT_CREATION_SAGA_QUEUE, CHAT_EVENTS_QUEUE, ChatCreationStarted, CompensateCreation,
    Compensated, CompleteCreation, CreateRoom, DOWNSTREAM_COMMANDS_QUEUE, DownstreamNotified,
    FailureOccurred, NotifyDownstream, ROOM_COMMANDS_QUEUE, RoomCreated,
};
use crate::services::{DeliveryService, RoomService};
use crate::staging::stage_reply;

/// How long each step may run before the timeout fires into the
/// compensation path.
const STEP_TIMEOUT: Duration = Duration::from_secs(30);

/// States of the chat-creation saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChatCreationState {
    CreatingRoom,
    NotifyingDownstream,
    Compensating,
    Completed,
    Failed,
}

/// Snapshot needed to resume a creation in flight.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatCreationData {
    pub chat_room_id: Option<ChatRoomId>,
    pub creator_user_id: Option<UserId>,
    pub member_ids: Vec<UserId>,
    pub error: Option<String>,
}

/// Orchestrated two-step room creation with compensation.
pub struct ChatCreationSaga {
    table: TransitionTable<ChatCreationState>,
    tracker: Arc<OperationTracker>,
}

impl ChatCreationSaga {
    /// Creates the saga definition.
    pub fn new(tracker: Arc<OperationTracker>) -> Self {
        use ChatCreationState::*;
        let table = TransitionTable::new()
            .start("ChatCreationStarted", CreatingRoom)
            .on(CreatingRoom, "RoomCreated", NotifyingDownstream)
            .on(CreatingRoom, "FailureOccurred", Compensating)
            .on(CreatingRoom, TIMEOUT_FIRED, Compensating)
            .on(NotifyingDownstream, "DownstreamNotified", Completed)
            .on(NotifyingDownstream, "FailureOccurred", Compensating)
            .on(NotifyingDownstream, TIMEOUT_FIRED, Compensating)
            .on(Compensating, "Compensated", Failed)
            .terminal(Completed)
            .terminal(Failed);
        Self { table, tracker }
    }

    fn room_id(data: &ChatCreationData) -> Result<ChatRoomId> {
        data.chat_room_id
            .ok_or_else(|| SagaError::Action("missing room snapshot".to_string()))
    }
}

#[async_trait]
impl Saga for ChatCreationSaga {
    type State = ChatCreationState;
    type Data = ChatCreationData;

    fn saga_type(&self) -> &'static str {
        "ChatCreation"
    }

    fn table(&self) -> &TransitionTable<ChatCreationState> {
        &self.table
    }

    async fn apply(
        &self,
        ctx: &mut SagaContext,
        _current: Option<ChatCreationState>,
        _next: ChatCreationState,
        data: &mut ChatCreationData,
        envelope: &MessageEnvelope,
    ) -> Result<Option<ChatCreationState>> {
        let correlation_id = ctx.correlation_id();
        match envelope.message_type.as_str() {
            "ChatCreationStarted" => {
                let started: ChatCreationStarted = envelope.payload_as()?;
                data.chat_room_id = Some(started.chat_room_id);
                data.creator_user_id = Some(started.creator_user_id);
                data.member_ids = started.member_ids.clone();

                self.tracker
                    .start(StartOperation {
                        correlation_id,
                        operation_type: OperationType::CreateChat,
                        chat_room_id: Some(started.chat_room_id),
                        message_id: None,
                        initiator_user_id: started.creator_user_id,
                        operation_data: None,
                    })
                    .await
                    .map_err(|e| SagaError::Action(e.to_string()))?;

                ctx.publish(
                    ROOM_COMMANDS_QUEUE,
                    "CreateRoom",
                    &CreateRoom {
                        chat_room_id: started.chat_room_id,
                        creator_user_id: started.creator_user_id,
                        member_ids: started.member_ids,
                    },
                )?;
                ctx.schedule_timeout(STEP_TIMEOUT);
            }
            "RoomCreated" => {
                let chat_room_id = Self::room_id(data)?;
                self.tracker
                    .update_progress(correlation_id, 50, "room created")
                    .await
                    .map_err(|e| SagaError::Action(e.to_string()))?;

                ctx.publish(
                    DOWNSTREAM_COMMANDS_QUEUE,
                    "NotifyDownstream",
                    &NotifyDownstream { chat_room_id },
                )?;
                ctx.schedule_timeout(STEP_TIMEOUT);
            }
            "DownstreamNotified" => {
                let chat_room_id = Self::room_id(data)?;
                self.tracker
                    .complete(
                        correlation_id,
                        Some(serde_json::json!({ "chat_room_id": chat_room_id })),
                    )
                    .await
                    .map_err(|e| SagaError::Action(e.to_string()))?;

                ctx.publish(
                    CHAT_EVENTS_QUEUE,
                    "CompleteCreation",
                    &CompleteCreation { chat_room_id },
                )?;
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

                ctx.publish(
                    ROOM_COMMANDS_QUEUE,
                    "CompensateCreation",
                    &CompensateCreation {
                        chat_room_id: Self::room_id(data)?,
                        reason,
                    },
                )?;
            }
            "Compensated" => {
                let compensated: Compensated = envelope.payload_as()?;
                self.tracker
                    .compensate(correlation_id, compensated.reason)
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

/// Services `CreateRoom` commands for the room-storage side.
pub struct CreateRoomWorker {
    rooms: Arc<dyn RoomService>,
    outbox: Arc<dyn OutboxStore>,
}

impl CreateRoomWorker {
    pub fn new(rooms: Arc<dyn RoomService>, outbox: Arc<dyn OutboxStore>) -> Self {
        Self { rooms, outbox }
    }
}

#[async_trait]
impl MessageHandler for CreateRoomWorker {
    async fn handle(&self, envelope: &MessageEnvelope) -> HandlerResult {
        let cmd: CreateRoom = envelope.payload_as()?;
        match self
            .rooms
            .create_room(cmd.chat_room_id, cmd.creator_user_id, &cmd.member_ids)
            .await
        {
            Ok(()) => {
                stage_reply(
                    self.outbox.as_ref(),
                    envelope.correlation_id,
                    CHAT_CREATION_SAGA_QUEUE,
                    "RoomCreated",
                    &RoomCreated {
                        chat_room_id: cmd.chat_room_id,
                    },
                )
                .await?;
            }
            Err(e) => {
                tracing::warn!(chat_room_id = %cmd.chat_room_id, error = %e, "room creation failed");
                stage_reply(
                    self.outbox.as_ref(),
                    envelope.correlation_id,
                    CHAT_CREATION_SAGA_QUEUE,
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

/// Services `NotifyDownstream` commands for the indexing side.
pub struct NotifyDownstreamWorker {
    delivery: Arc<dyn DeliveryService>,
    outbox: Arc<dyn OutboxStore>,
}

impl NotifyDownstreamWorker {
    pub fn new(delivery: Arc<dyn DeliveryService>, outbox: Arc<dyn OutboxStore>) -> Self {
        Self { delivery, outbox }
    }
}

#[async_trait]
impl MessageHandler for NotifyDownstreamWorker {
    async fn handle(&self, envelope: &MessageEnvelope) -> HandlerResult {
        let cmd: NotifyDownstream = envelope.payload_as()?;
        match self.delivery.notify_downstream(cmd.chat_room_id).await {
            Ok(()) => {
                stage_reply(
                    self.outbox.as_ref(),
                    envelope.correlation_id,
                    CHAT_CREATION_SAGA_QUEUE,
                    "DownstreamNotified",
                    &DownstreamNotified {
                        chat_room_id: cmd.chat_room_id,
                    },
                )
                .await?;
            }
            Err(e) => {
                tracing::warn!(chat_room_id = %cmd.chat_room_id, error = %e, "downstream notification failed");
                stage_reply(
                    self.outbox.as_ref(),
                    envelope.correlation_id,
                    CHAT_CREATION_SAGA_QUEUE,
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

/// Services `CompensateCreation` commands.
///
/// Deleting a room that was never created is a verified no-op. A failed
/// deletion is logged with the original failure reason but still reports
/// `Compensated`; leaving a saga stuck mid-compensation is worse than an
/// incompletely-compensated one.
pub struct CompensateCreationWorker {
    rooms: Arc<dyn RoomService>,
    outbox: Arc<dyn OutboxStore>,
}

impl CompensateCreationWorker {
    pub fn new(rooms: Arc<dyn RoomService>, outbox: Arc<dyn OutboxStore>) -> Self {
        Self { rooms, outbox }
    }
}

#[async_trait]
impl MessageHandler for CompensateCreationWorker {
    async fn handle(&self, envelope: &MessageEnvelope) -> HandlerResult {
        let cmd: CompensateCreation = envelope.payload_as()?;
        match self.rooms.delete_room(cmd.chat_room_id).await {
            Ok(existed) => {
                tracing::info!(
                    chat_room_id = %cmd.chat_room_id,
                    existed,
                    reason = %cmd.reason,
                    "room creation compensated"
                );
            }
            Err(e) => {
                tracing::error!(
                    chat_room_id = %cmd.chat_room_id,
                    compensation_error = %e,
                    original_failure = %cmd.reason,
                    "compensation failed, advancing the saga anyway"
                );
            }
        }
        stage_reply(
            self.outbox.as_ref(),
            envelope.correlation_id,
            CHAT_CREATION_SAGA_QUEUE,
            "Compensated",
            &Compensated {
                chat_room_id: cmd.chat_room_id,
                reason: cmd.reason,
            },
        )
        .await?;
        Ok(None)
    }
}
