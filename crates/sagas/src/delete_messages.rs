//! Choreographed bulk message deletion.
//!
//! Two steps with no branching and nothing to compensate, so there is no
//! persisted state machine: each step is an idempotent consumer keyed off
//! the processed-event ledger. The deleted-count is cached on the ledger
//! row; a redelivered `DeleteChatMessages` replays the recorded count
//! instead of re-deleting and reporting zero.

use std::sync::Arc;

use async_trait::async_trait;
use bus::{HandlerResult, MessageEnvelope, MessageHandler};
use outbox::OutboxStore;

use crate::contracts::{
    CHAT_EVENTS_QUEUE, DELIVERY_COMMANDS_QUEUE, DeleteChatMessages, MessagesDeleted,
    NotificationsSent, SendChatNotification,
};
use crate::services::{DeliveryService, MessageStoreService};
use crate::staging::stage_reply;

/// Notification text broadcast after a purge.
const PURGE_NOTICE: &str = "All messages in this chat were deleted";

/// Services `DeleteChatMessages` commands.
///
/// Returns the `MessagesDeleted` payload as its handler result so the
/// ledger caches it for duplicate deliveries.
pub struct DeleteChatMessagesWorker {
    messages: Arc<dyn MessageStoreService>,
    outbox: Arc<dyn OutboxStore>,
}

impl DeleteChatMessagesWorker {
    pub fn new(messages: Arc<dyn MessageStoreService>, outbox: Arc<dyn OutboxStore>) -> Self {
        Self { messages, outbox }
    }
}

#[async_trait]
impl MessageHandler for DeleteChatMessagesWorker {
    async fn handle(&self, envelope: &MessageEnvelope) -> HandlerResult {
        let cmd: DeleteChatMessages = envelope.payload_as()?;
        let count = self.messages.delete_all(cmd.chat_room_id).await?;
        tracing::info!(chat_room_id = %cmd.chat_room_id, count, "chat messages deleted");
        metrics::counter!("messages_deleted_total").increment(count);

        let deleted = MessagesDeleted {
            chat_room_id: cmd.chat_room_id,
            count,
        };
        stage_reply(
            self.outbox.as_ref(),
            envelope.correlation_id,
            CHAT_EVENTS_QUEUE,
            "MessagesDeleted",
            &deleted,
        )
        .await?;
        stage_reply(
            self.outbox.as_ref(),
            envelope.correlation_id,
            DELIVERY_COMMANDS_QUEUE,
            "SendChatNotification",
            &SendChatNotification {
                chat_room_id: cmd.chat_room_id,
                message: PURGE_NOTICE.to_string(),
            },
        )
        .await?;

        Ok(Some(serde_json::to_value(&deleted)?))
    }
}

/// Services `SendChatNotification` commands.
pub struct SendChatNotificationWorker {
    delivery: Arc<dyn DeliveryService>,
    outbox: Arc<dyn OutboxStore>,
}

impl SendChatNotificationWorker {
    pub fn new(delivery: Arc<dyn DeliveryService>, outbox: Arc<dyn OutboxStore>) -> Self {
        Self { delivery, outbox }
    }
}

#[async_trait]
impl MessageHandler for SendChatNotificationWorker {
    async fn handle(&self, envelope: &MessageEnvelope) -> HandlerResult {
        let cmd: SendChatNotification = envelope.payload_as()?;
        let recipient_count = self
            .delivery
            .notify_room(cmd.chat_room_id, &cmd.message)
            .await?;

        let sent = NotificationsSent { recipient_count };
        stage_reply(
            self.outbox.as_ref(),
            envelope.correlation_id,
            CHAT_EVENTS_QUEUE,
            "NotificationsSent",
            &sent,
        )
        .await?;
        Ok(Some(serde_json::to_value(&sent)?))
    }
}
