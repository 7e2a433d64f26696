//! Ledger error types.

use thiserror::Error;

/// Errors that can occur while consulting the processed-event ledger.
#[derive(Debug, Error)]
pub enum IdempotencyError {
    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Failed to serialize a cached handler result.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience type alias for ledger results.
pub type Result<T> = std::result::Result<T, IdempotencyError>;
