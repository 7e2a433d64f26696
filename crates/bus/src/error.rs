//! Bus error types.

use thiserror::Error;

/// Errors that can occur while talking to the message bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// Failed to serialize or deserialize a message payload.
    #[error("Payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The transport rejected a publish.
    #[error("Publish failed: {0}")]
    Publish(String),

    /// A consumer failed while handling a delivery.
    #[error("Handler failed for '{message_type}': {reason}")]
    Handler {
        message_type: String,
        reason: String,
    },
}

/// Convenience type alias for bus results.
pub type Result<T> = std::result::Result<T, BusError>;
