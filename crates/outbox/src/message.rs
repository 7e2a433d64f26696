//! Outbox rows and their status machine.

use chrono::{DateTime, Utc};
use common::{CorrelationId, EventId};
use serde::{Deserialize, Serialize};

use bus::MessageEnvelope;

/// Lifecycle of an outbox row.
///
/// Status moves monotonically
/// `Pending → Processing → {Processed | Pending (retry+1) | Failed}`;
/// `Cancelled` is reachable only through the administrative surface.
/// A `Processed` row is never re-published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutboxStatus {
    /// Waiting to be claimed by the publisher.
    Pending,
    /// Claimed by a publisher batch; a stale claim is reclaimed.
    Processing,
    /// Successfully published to the bus (terminal).
    Processed,
    /// Retry cap exceeded; requires operator action (terminal unless
    /// manually retried).
    Failed,
    /// Excluded permanently by an operator (terminal).
    Cancelled,
}

impl OutboxStatus {
    /// All statuses, for stats enumeration.
    pub const ALL: [OutboxStatus; 5] = [
        OutboxStatus::Pending,
        OutboxStatus::Processing,
        OutboxStatus::Processed,
        OutboxStatus::Failed,
        OutboxStatus::Cancelled,
    ];

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "Pending",
            OutboxStatus::Processing => "Processing",
            OutboxStatus::Processed => "Processed",
            OutboxStatus::Failed => "Failed",
            OutboxStatus::Cancelled => "Cancelled",
        }
    }

    /// Parses a status from its persisted name.
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A staged outgoing event.
///
/// The row id doubles as the bus message id, so a duplicate publish of the
/// same row carries the same deduplication key and is absorbed by the
/// idempotent consumer on the receiving side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: EventId,
    pub event_type: String,
    pub correlation_id: CorrelationId,
    /// Queue the message is published to.
    pub destination: String,
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Set while a publisher batch holds the row.
    pub claimed_at: Option<DateTime<Utc>>,
}

impl OutboxMessage {
    /// Stages an envelope for later publication to `destination`.
    pub fn stage(destination: impl Into<String>, envelope: &MessageEnvelope) -> Self {
        Self {
            id: envelope.message_id,
            event_type: envelope.message_type.clone(),
            correlation_id: envelope.correlation_id,
            destination: destination.into(),
            payload: envelope.payload.clone(),
            status: OutboxStatus::Pending,
            retry_count: 0,
            last_error: None,
            created_at: Utc::now(),
            processed_at: None,
            next_retry_at: None,
            claimed_at: None,
        }
    }

    /// Reconstructs the bus envelope for this row.
    pub fn to_envelope(&self) -> MessageEnvelope {
        MessageEnvelope {
            message_id: self.id,
            message_type: self.event_type.clone(),
            correlation_id: self.correlation_id,
            timestamp: self.created_at,
            payload: self.payload.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parse_roundtrip() {
        for status in OutboxStatus::ALL {
            assert_eq!(OutboxStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OutboxStatus::parse("Unknown"), None);
    }

    #[test]
    fn staged_row_reuses_the_message_id() {
        let envelope = MessageEnvelope::new(
            "RoomCreated",
            CorrelationId::new(),
            &serde_json::json!({"chat_room_id": 5}),
        )
        .unwrap();
        let row = OutboxMessage::stage("chat-events", &envelope);

        assert_eq!(row.id, envelope.message_id);
        assert_eq!(row.status, OutboxStatus::Pending);
        assert_eq!(row.retry_count, 0);

        let rebuilt = row.to_envelope();
        assert_eq!(rebuilt.message_id, envelope.message_id);
        assert_eq!(rebuilt.message_type, envelope.message_type);
        assert_eq!(rebuilt.payload, envelope.payload);
    }
}
