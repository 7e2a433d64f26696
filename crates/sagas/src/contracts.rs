//! Wire contracts exchanged over the bus.
//!
//! The correlation id rides on the envelope, not in the payload; these
//! structs are the payload side of the contract. Message type strings
//! match the struct names.

use common::{ChatRoomId, MessageId, UserId};
use serde::{Deserialize, Serialize};

// ---- queues ----

/// Inbound queue of the chat-creation saga engine.
pub const CHAT_CREATION_SAGA_QUEUE: &str = "chat-creation-saga";
/// Inbound queue of the message-delivery saga engine.
pub const MESSAGE_DELIVERY_SAGA_QUEUE: &str = "message-delivery-saga";
/// Commands consumed by the room-storage service.
pub const ROOM_COMMANDS_QUEUE: &str = "room-commands";
/// Commands consumed by the downstream-indexing service.
pub const DOWNSTREAM_COMMANDS_QUEUE: &str = "downstream-commands";
/// Commands consumed by the message-store service.
pub const MESSAGE_COMMANDS_QUEUE: &str = "message-commands";
/// Commands consumed by the delivery/notification service.
pub const DELIVERY_COMMANDS_QUEUE: &str = "delivery-commands";
/// Public events observed by anyone interested in outcomes.
pub const CHAT_EVENTS_QUEUE: &str = "chat-events";
/// Events published around the started operations.
pub const OPERATION_EVENTS_QUEUE: &str = "operation-events";

// ---- chat creation ----

/// Initial event of the chat-creation saga.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCreationStarted {
    pub chat_room_id: ChatRoomId,
    pub creator_user_id: UserId,
    pub member_ids: Vec<UserId>,
}

/// Command to the room-storage service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRoom {
    pub chat_room_id: ChatRoomId,
    pub creator_user_id: UserId,
    pub member_ids: Vec<UserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomCreated {
    pub chat_room_id: ChatRoomId,
}

/// Command to the downstream-indexing service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyDownstream {
    pub chat_room_id: ChatRoomId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownstreamNotified {
    pub chat_room_id: ChatRoomId,
}

/// Public event marking a finished creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteCreation {
    pub chat_room_id: ChatRoomId,
}

/// Explicit failure reported by any collaborating service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureOccurred {
    pub reason: String,
}

/// Command to undo a partially-created room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensateCreation {
    pub chat_room_id: ChatRoomId,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Compensated {
    pub chat_room_id: ChatRoomId,
    pub reason: String,
}

// ---- message delivery ----

/// Initial event of the message-delivery saga.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSendRequested {
    pub chat_room_id: ChatRoomId,
    pub sender_user_id: UserId,
    pub content: String,
}

/// Command to the message-store service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveMessage {
    pub chat_room_id: ChatRoomId,
    pub sender_user_id: UserId,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSaved {
    pub message_id: MessageId,
    pub chat_room_id: ChatRoomId,
}

/// Command to fan the saved message out to connected clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishMessage {
    pub message_id: MessageId,
    pub chat_room_id: ChatRoomId,
    pub sender_user_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePublished {
    pub message_id: MessageId,
}

/// One recipient confirmed receipt. Repeats per recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveredToUser {
    pub message_id: MessageId,
    pub user_id: UserId,
}

/// Command asking whether every participant has confirmed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckDeliveryStatus {
    pub chat_room_id: ChatRoomId,
    pub sender_user_id: UserId,
    pub delivered_user_ids: Vec<UserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryStatusChecked {
    pub is_delivered_to_all: bool,
}

// ---- bulk message deletion (choreography) ----

/// Command to clear every message in a room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteChatMessages {
    pub chat_room_id: ChatRoomId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesDeleted {
    pub chat_room_id: ChatRoomId,
    pub count: u64,
}

/// Command to tell remaining participants about the purge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendChatNotification {
    pub chat_room_id: ChatRoomId,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsSent {
    pub recipient_count: u64,
}
