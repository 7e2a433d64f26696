//! Saga engine error types.

use common::CorrelationId;
use thiserror::Error;

/// Errors that can occur while driving a saga.
#[derive(Debug, Error)]
pub enum SagaError {
    /// Optimistic version check lost against a concurrent transition.
    #[error("Concurrent update on saga {0}")]
    VersionConflict(CorrelationId),

    /// A saga action failed; the delivery is retried by the bus.
    #[error("Saga action failed: {0}")]
    Action(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Failed to (de)serialize saga state or snapshot data.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to schedule or cancel a timeout.
    #[error("Bus error: {0}")]
    Bus(#[from] bus::BusError),

    /// Failed to stage an outgoing message.
    #[error("Outbox error: {0}")]
    Outbox(#[from] outbox::OutboxError),
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
