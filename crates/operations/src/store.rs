//! Operation store trait.

use async_trait::async_trait;
use common::{ChatRoomId, CorrelationId};

use crate::error::Result;
use crate::operation::Operation;

/// Persistence for operation records.
#[async_trait]
pub trait OperationStore: Send + Sync {
    /// Inserts a new record.
    async fn insert(&self, operation: Operation) -> Result<()>;

    /// Fetches a record by correlation id.
    async fn get(&self, correlation_id: CorrelationId) -> Result<Option<Operation>>;

    /// Replaces an existing record.
    async fn update(&self, operation: Operation) -> Result<()>;

    /// Lists operations still active on a room, for conflict checks.
    async fn find_active_for_room(&self, chat_room_id: ChatRoomId) -> Result<Vec<Operation>>;
}
