//! Outbox error types.

use common::EventId;
use thiserror::Error;

use crate::message::OutboxStatus;

/// Errors that can occur during outbox operations.
#[derive(Debug, Error)]
pub enum OutboxError {
    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Failed to serialize a staged payload.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Bus error while publishing a drained message.
    #[error("Bus error: {0}")]
    Bus(#[from] bus::BusError),

    /// No outbox row with the given id.
    #[error("Outbox message not found: {0}")]
    NotFound(EventId),

    /// An administrative transition was requested from the wrong status.
    #[error("Outbox message {id} is {actual}, cannot {requested}")]
    InvalidTransition {
        id: EventId,
        actual: OutboxStatus,
        requested: &'static str,
    },
}

/// Convenience type alias for outbox results.
pub type Result<T> = std::result::Result<T, OutboxError>;
