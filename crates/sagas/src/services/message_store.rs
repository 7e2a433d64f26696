//! Message-store service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::{ChatRoomId, MessageId, UserId};

use crate::services::ServiceError;

/// Message persistence collaborator.
#[async_trait]
pub trait MessageStoreService: Send + Sync {
    /// Persists a message and returns its assigned id.
    async fn save_message(
        &self,
        chat_room_id: ChatRoomId,
        sender_user_id: UserId,
        content: &str,
    ) -> Result<MessageId, ServiceError>;

    /// Deletes every message in a room, returning how many were removed.
    async fn delete_all(&self, chat_room_id: ChatRoomId) -> Result<u64, ServiceError>;
}

#[derive(Debug, Default)]
struct InMemoryMessageStoreState {
    messages: HashMap<ChatRoomId, Vec<(MessageId, UserId, String)>>,
    next_id: i64,
    fail_on_save: bool,
    delete_calls: usize,
}

/// In-memory message store for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMessageStoreService {
    state: Arc<RwLock<InMemoryMessageStoreState>>,
}

impl InMemoryMessageStoreService {
    /// Creates a new in-memory message store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the store to fail message saves.
    pub fn set_fail_on_save(&self, fail: bool) {
        self.state.write().unwrap().fail_on_save = fail;
    }

    /// Number of messages stored in a room.
    pub fn message_count(&self, chat_room_id: ChatRoomId) -> usize {
        self.state
            .read()
            .unwrap()
            .messages
            .get(&chat_room_id)
            .map_or(0, Vec::len)
    }

    /// Number of delete-all calls received.
    pub fn delete_calls(&self) -> usize {
        self.state.read().unwrap().delete_calls
    }

    /// Seeds a room with `count` messages, for deletion tests.
    pub fn seed_messages(&self, chat_room_id: ChatRoomId, sender: UserId, count: usize) {
        let mut state = self.state.write().unwrap();
        for _ in 0..count {
            state.next_id += 1;
            let id = MessageId::new(state.next_id);
            state
                .messages
                .entry(chat_room_id)
                .or_default()
                .push((id, sender, "seed".to_string()));
        }
    }
}

#[async_trait]
impl MessageStoreService for InMemoryMessageStoreService {
    async fn save_message(
        &self,
        chat_room_id: ChatRoomId,
        sender_user_id: UserId,
        content: &str,
    ) -> Result<MessageId, ServiceError> {
        let mut state = self.state.write().unwrap();
        if state.fail_on_save {
            return Err(ServiceError::Unavailable("message store down".to_string()));
        }
        state.next_id += 1;
        let id = MessageId::new(state.next_id);
        state
            .messages
            .entry(chat_room_id)
            .or_default()
            .push((id, sender_user_id, content.to_string()));
        Ok(id)
    }

    async fn delete_all(&self, chat_room_id: ChatRoomId) -> Result<u64, ServiceError> {
        let mut state = self.state.write().unwrap();
        state.delete_calls += 1;
        let removed = state
            .messages
            .remove(&chat_room_id)
            .map_or(0, |messages| messages.len() as u64);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_assigns_sequential_ids() {
        let store = InMemoryMessageStoreService::new();
        let room = ChatRoomId::new(5);
        let first = store
            .save_message(room, UserId::new(1), "hello")
            .await
            .unwrap();
        let second = store
            .save_message(room, UserId::new(1), "again")
            .await
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(store.message_count(room), 2);
    }

    #[tokio::test]
    async fn delete_all_reports_count_and_empties_room() {
        let store = InMemoryMessageStoreService::new();
        let room = ChatRoomId::new(5);
        store.seed_messages(room, UserId::new(1), 3);

        assert_eq!(store.delete_all(room).await.unwrap(), 3);
        assert_eq!(store.message_count(room), 0);
        // A second purge finds nothing.
        assert_eq!(store.delete_all(room).await.unwrap(), 0);
    }
}
