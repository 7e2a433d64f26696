//! Message envelope carried over the bus.

use chrono::{DateTime, Utc};
use common::{CorrelationId, EventId};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A message envelope containing a command or event along with its
/// routing metadata.
///
/// The `(message_id, message_type)` pair is the deduplication key used by
/// the processed-event ledger; the `correlation_id` ties the message to a
/// saga instance and its operation record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Unique identifier for this delivery's message.
    pub message_id: EventId,

    /// The type of the message (e.g., "RoomCreated", "CreateRoom").
    pub message_type: String,

    /// The business transaction this message belongs to.
    pub correlation_id: CorrelationId,

    /// When the message was created.
    pub timestamp: DateTime<Utc>,

    /// The message payload as JSON.
    pub payload: serde_json::Value,
}

impl MessageEnvelope {
    /// Creates an envelope with a fresh message id.
    pub fn new<T: Serialize>(
        message_type: impl Into<String>,
        correlation_id: CorrelationId,
        payload: &T,
    ) -> Result<Self> {
        Ok(Self {
            message_id: EventId::new(),
            message_type: message_type.into(),
            correlation_id,
            timestamp: Utc::now(),
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Replaces the message id, keeping everything else.
    ///
    /// Used by tests to fabricate duplicate deliveries of the same message.
    pub fn with_message_id(mut self, message_id: EventId) -> Self {
        self.message_id = message_id;
        self
    }

    /// Deserializes the payload into a typed message.
    pub fn payload_as<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Ping {
        n: u32,
    }

    #[test]
    fn envelope_roundtrips_payload() {
        let correlation_id = CorrelationId::new();
        let envelope = MessageEnvelope::new("Ping", correlation_id, &Ping { n: 7 }).unwrap();

        assert_eq!(envelope.message_type, "Ping");
        assert_eq!(envelope.correlation_id, correlation_id);
        assert_eq!(envelope.payload_as::<Ping>().unwrap(), Ping { n: 7 });
    }

    #[test]
    fn with_message_id_overrides_only_the_id() {
        let envelope =
            MessageEnvelope::new("Ping", CorrelationId::new(), &Ping { n: 1 }).unwrap();
        let id = EventId::new();
        let duplicate = envelope.clone().with_message_id(id);

        assert_eq!(duplicate.message_id, id);
        assert_eq!(duplicate.message_type, envelope.message_type);
        assert_eq!(duplicate.payload, envelope.payload);
    }
}
