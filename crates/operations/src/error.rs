//! Operation tracker error types.

use common::{ChatRoomId, CorrelationId};
use thiserror::Error;

use crate::operation::OperationType;

/// Errors that can occur during operation tracking.
#[derive(Debug, Error)]
pub enum OperationError {
    /// No operation with the given correlation id.
    #[error("Operation not found: {0}")]
    NotFound(CorrelationId),

    /// The requested operation conflicts with one already active on the
    /// same room.
    #[error("Operation {requested} conflicts with active {existing} on room {room}")]
    Conflict {
        requested: OperationType,
        existing: OperationType,
        room: ChatRoomId,
    },

    /// Progress must be within `[0, 100]`.
    #[error("Progress {0} is out of range (0-100)")]
    InvalidProgress(i32),

    /// `wait_for_completion` timed out before the operation finished.
    #[error("Timed out waiting for operation {0} to complete")]
    WaitTimeout(CorrelationId),

    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Failed to serialize operation data.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to stage the started event.
    #[error("Outbox error: {0}")]
    Outbox(#[from] outbox::OutboxError),

    /// Failed to build the started event envelope.
    #[error("Bus error: {0}")]
    Bus(#[from] bus::BusError),
}

/// Convenience type alias for operation results.
pub type Result<T> = std::result::Result<T, OperationError>;
