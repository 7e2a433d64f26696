//! Message handlers and the message-type-keyed registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::envelope::MessageEnvelope;

/// Boxed error returned by a message handler.
///
/// Handlers live in several crates with their own error enums; the bus
/// only needs to know whether the delivery failed and how to describe it.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result of handling one delivery.
///
/// A handler may return a JSON value to be cached by the processed-event
/// ledger and replayed to duplicate deliveries (e.g. a deleted-count).
pub type HandlerResult = std::result::Result<Option<serde_json::Value>, HandlerError>;

/// A consumer for one message type.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handles a single delivery.
    async fn handle(&self, envelope: &MessageEnvelope) -> HandlerResult;
}

/// Message-type-keyed handler registry.
///
/// Explicit registration with explicit dependency passing; there is no
/// ambient container resolving consumers.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for a message type, replacing any existing one.
    pub fn register(&mut self, message_type: impl Into<String>, handler: Arc<dyn MessageHandler>) {
        self.handlers.insert(message_type.into(), handler);
    }

    /// Registers one handler for several message types.
    pub fn register_many(&mut self, message_types: &[&str], handler: Arc<dyn MessageHandler>) {
        for message_type in message_types {
            self.register(*message_type, handler.clone());
        }
    }

    /// Looks up the handler for a message type.
    pub fn get(&self, message_type: &str) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.get(message_type).cloned()
    }

    /// Returns the number of registered message types.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns true if no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use common::CorrelationId;

    use super::*;

    struct CountingHandler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MessageHandler for CountingHandler {
        async fn handle(&self, _envelope: &MessageEnvelope) -> HandlerResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
    }

    #[tokio::test]
    async fn registry_routes_by_message_type() {
        let handler = Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
        });
        let mut registry = HandlerRegistry::new();
        registry.register("RoomCreated", handler.clone());

        assert!(registry.get("RoomCreated").is_some());
        assert!(registry.get("RoomDeleted").is_none());

        let envelope = MessageEnvelope::new(
            "RoomCreated",
            CorrelationId::new(),
            &serde_json::json!({}),
        )
        .unwrap();
        registry
            .get("RoomCreated")
            .unwrap()
            .handle(&envelope)
            .await
            .unwrap();
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn register_many_shares_one_handler() {
        let handler = Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
        });
        let mut registry = HandlerRegistry::new();
        registry.register_many(&["A", "B", "C"], handler);
        assert_eq!(registry.len(), 3);
    }
}
