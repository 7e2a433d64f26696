//! In-memory operation store for testing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::{ChatRoomId, CorrelationId};

use crate::error::{OperationError, Result};
use crate::operation::Operation;
use crate::store::OperationStore;

/// In-memory operation store implementation.
#[derive(Clone, Default)]
pub struct InMemoryOperationStore {
    rows: Arc<Mutex<HashMap<CorrelationId, Operation>>>,
}

impl InMemoryOperationStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of records.
    pub fn row_count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

#[async_trait]
impl OperationStore for InMemoryOperationStore {
    async fn insert(&self, operation: Operation) -> Result<()> {
        self.rows
            .lock()
            .unwrap()
            .insert(operation.correlation_id, operation);
        Ok(())
    }

    async fn get(&self, correlation_id: CorrelationId) -> Result<Option<Operation>> {
        Ok(self.rows.lock().unwrap().get(&correlation_id).cloned())
    }

    async fn update(&self, operation: Operation) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        if !rows.contains_key(&operation.correlation_id) {
            return Err(OperationError::NotFound(operation.correlation_id));
        }
        rows.insert(operation.correlation_id, operation);
        Ok(())
    }

    async fn find_active_for_room(&self, chat_room_id: ChatRoomId) -> Result<Vec<Operation>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .values()
            .filter(|op| op.chat_room_id == Some(chat_room_id) && op.is_active())
            .cloned()
            .collect())
    }
}
