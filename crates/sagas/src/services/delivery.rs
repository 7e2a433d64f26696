//! Delivery/notification service trait and in-memory implementation.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::{ChatRoomId, MessageId, UserId};

use crate::services::ServiceError;

/// Push-delivery collaborator: fan-out of published messages and
/// broadcast notifications to a room's participants.
#[async_trait]
pub trait DeliveryService: Send + Sync {
    /// Fans a saved message out to connected clients.
    async fn publish_message(
        &self,
        chat_room_id: ChatRoomId,
        message_id: MessageId,
        sender_user_id: UserId,
    ) -> Result<(), ServiceError>;

    /// Notifies the downstream indexer that a room exists.
    async fn notify_downstream(&self, chat_room_id: ChatRoomId) -> Result<(), ServiceError>;

    /// Broadcasts a notification to the room, returning how many
    /// recipients were reached.
    async fn notify_room(
        &self,
        chat_room_id: ChatRoomId,
        message: &str,
    ) -> Result<u64, ServiceError>;
}

#[derive(Debug, Default)]
struct InMemoryDeliveryState {
    published: Vec<(ChatRoomId, MessageId, UserId)>,
    notified_rooms: Vec<(ChatRoomId, String)>,
    downstream_notifications: usize,
    recipients_per_room: u64,
    fail_on_publish: bool,
    fail_on_downstream: bool,
}

/// In-memory delivery service for testing.
#[derive(Debug, Clone)]
pub struct InMemoryDeliveryService {
    state: Arc<RwLock<InMemoryDeliveryState>>,
}

impl Default for InMemoryDeliveryService {
    fn default() -> Self {
        Self {
            state: Arc::new(RwLock::new(InMemoryDeliveryState {
                recipients_per_room: 2,
                ..Default::default()
            })),
        }
    }
}

impl InMemoryDeliveryService {
    /// Creates a new in-memory delivery service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the service to fail message fan-out.
    pub fn set_fail_on_publish(&self, fail: bool) {
        self.state.write().unwrap().fail_on_publish = fail;
    }

    /// Configures the service to fail downstream notifications.
    pub fn set_fail_on_downstream(&self, fail: bool) {
        self.state.write().unwrap().fail_on_downstream = fail;
    }

    /// Sets how many recipients a room broadcast reports.
    pub fn set_recipients_per_room(&self, count: u64) {
        self.state.write().unwrap().recipients_per_room = count;
    }

    /// Number of messages fanned out.
    pub fn published_count(&self) -> usize {
        self.state.read().unwrap().published.len()
    }

    /// Number of downstream notifications sent.
    pub fn downstream_notifications(&self) -> usize {
        self.state.read().unwrap().downstream_notifications
    }

    /// Room broadcasts sent so far.
    pub fn room_notifications(&self) -> Vec<(ChatRoomId, String)> {
        self.state.read().unwrap().notified_rooms.clone()
    }
}

#[async_trait]
impl DeliveryService for InMemoryDeliveryService {
    async fn publish_message(
        &self,
        chat_room_id: ChatRoomId,
        message_id: MessageId,
        sender_user_id: UserId,
    ) -> Result<(), ServiceError> {
        let mut state = self.state.write().unwrap();
        if state.fail_on_publish {
            return Err(ServiceError::Unavailable("push transport down".to_string()));
        }
        state.published.push((chat_room_id, message_id, sender_user_id));
        Ok(())
    }

    async fn notify_downstream(&self, _chat_room_id: ChatRoomId) -> Result<(), ServiceError> {
        let mut state = self.state.write().unwrap();
        if state.fail_on_downstream {
            return Err(ServiceError::Unavailable("indexer down".to_string()));
        }
        state.downstream_notifications += 1;
        Ok(())
    }

    async fn notify_room(
        &self,
        chat_room_id: ChatRoomId,
        message: &str,
    ) -> Result<u64, ServiceError> {
        let mut state = self.state.write().unwrap();
        state.notified_rooms.push((chat_room_id, message.to_string()));
        Ok(state.recipients_per_room)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_and_notify() {
        let service = InMemoryDeliveryService::new();
        service
            .publish_message(ChatRoomId::new(5), MessageId::new(9), UserId::new(1))
            .await
            .unwrap();
        assert_eq!(service.published_count(), 1);

        service.notify_downstream(ChatRoomId::new(5)).await.unwrap();
        assert_eq!(service.downstream_notifications(), 1);

        let reached = service
            .notify_room(ChatRoomId::new(5), "messages purged")
            .await
            .unwrap();
        assert_eq!(reached, 2);
        assert_eq!(service.room_notifications().len(), 1);
    }

    #[tokio::test]
    async fn fail_toggles() {
        let service = InMemoryDeliveryService::new();
        service.set_fail_on_publish(true);
        assert!(
            service
                .publish_message(ChatRoomId::new(5), MessageId::new(9), UserId::new(1))
                .await
                .is_err()
        );

        service.set_fail_on_downstream(true);
        assert!(service.notify_downstream(ChatRoomId::new(5)).await.is_err());
    }
}
