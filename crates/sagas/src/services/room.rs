//! Room-storage service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::{ChatRoomId, UserId};

use crate::services::ServiceError;

/// Room persistence collaborator (`CreateRoom`, `DeleteRoom`,
/// `GetParticipants`).
#[async_trait]
pub trait RoomService: Send + Sync {
    /// Creates a room with its initial members.
    async fn create_room(
        &self,
        chat_room_id: ChatRoomId,
        creator_user_id: UserId,
        member_ids: &[UserId],
    ) -> Result<(), ServiceError>;

    /// Deletes a room. Returns true if the room existed; deleting a
    /// never-created room is a verified no-op, which is what compensation
    /// relies on.
    async fn delete_room(&self, chat_room_id: ChatRoomId) -> Result<bool, ServiceError>;

    /// Fetches the full participant list, creator included.
    async fn participants(&self, chat_room_id: ChatRoomId) -> Result<Vec<UserId>, ServiceError>;
}

#[derive(Debug, Default)]
struct InMemoryRoomState {
    rooms: HashMap<ChatRoomId, Vec<UserId>>,
    fail_on_create: bool,
    fail_on_participants: bool,
    delete_calls: usize,
}

/// In-memory room service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRoomService {
    state: Arc<RwLock<InMemoryRoomState>>,
}

impl InMemoryRoomService {
    /// Creates a new in-memory room service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the service to fail room creation.
    pub fn set_fail_on_create(&self, fail: bool) {
        self.state.write().unwrap().fail_on_create = fail;
    }

    /// Configures the service to fail participant lookups.
    pub fn set_fail_on_participants(&self, fail: bool) {
        self.state.write().unwrap().fail_on_participants = fail;
    }

    /// Returns the number of rooms currently stored.
    pub fn room_count(&self) -> usize {
        self.state.read().unwrap().rooms.len()
    }

    /// Returns true if the room exists.
    pub fn has_room(&self, chat_room_id: ChatRoomId) -> bool {
        self.state.read().unwrap().rooms.contains_key(&chat_room_id)
    }

    /// Number of delete calls received, including no-op ones.
    pub fn delete_calls(&self) -> usize {
        self.state.read().unwrap().delete_calls
    }
}

#[async_trait]
impl RoomService for InMemoryRoomService {
    async fn create_room(
        &self,
        chat_room_id: ChatRoomId,
        creator_user_id: UserId,
        member_ids: &[UserId],
    ) -> Result<(), ServiceError> {
        let mut state = self.state.write().unwrap();
        if state.fail_on_create {
            return Err(ServiceError::Unavailable("room storage down".to_string()));
        }
        let mut participants = vec![creator_user_id];
        participants.extend_from_slice(member_ids);
        state.rooms.insert(chat_room_id, participants);
        Ok(())
    }

    async fn delete_room(&self, chat_room_id: ChatRoomId) -> Result<bool, ServiceError> {
        let mut state = self.state.write().unwrap();
        state.delete_calls += 1;
        Ok(state.rooms.remove(&chat_room_id).is_some())
    }

    async fn participants(&self, chat_room_id: ChatRoomId) -> Result<Vec<UserId>, ServiceError> {
        let state = self.state.read().unwrap();
        if state.fail_on_participants {
            return Err(ServiceError::Unavailable(
                "participant directory down".to_string(),
            ));
        }
        state
            .rooms
            .get(&chat_room_id)
            .cloned()
            .ok_or(ServiceError::RoomNotFound(chat_room_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_delete_roundtrip() {
        let service = InMemoryRoomService::new();
        let room = ChatRoomId::new(5);
        service
            .create_room(room, UserId::new(1), &[UserId::new(2), UserId::new(3)])
            .await
            .unwrap();
        assert!(service.has_room(room));
        assert_eq!(
            service.participants(room).await.unwrap(),
            vec![UserId::new(1), UserId::new(2), UserId::new(3)]
        );

        assert!(service.delete_room(room).await.unwrap());
        assert!(!service.has_room(room));
        // Deleting again is a verified no-op.
        assert!(!service.delete_room(room).await.unwrap());
        assert_eq!(service.delete_calls(), 2);
    }

    #[tokio::test]
    async fn fail_toggle_rejects_creation() {
        let service = InMemoryRoomService::new();
        service.set_fail_on_create(true);
        let result = service
            .create_room(ChatRoomId::new(5), UserId::new(1), &[])
            .await;
        assert!(matches!(result, Err(ServiceError::Unavailable(_))));
        assert_eq!(service.room_count(), 0);
    }
}
