//! Message bus abstraction for the chat coordination services.
//!
//! The platform assumes an external broker with durable queues,
//! at-least-once delivery and delayed redelivery for timers. This crate
//! defines the trait boundary the rest of the workspace programs against,
//! plus an in-memory bus with deterministic pumping that every test suite
//! uses. Consumers are registered in a message-type-keyed
//! [`HandlerRegistry`] rather than resolved from an ambient container.

pub mod bus;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod memory;
pub mod retry;

pub use bus::{MessageBus, ScheduleToken};
pub use envelope::MessageEnvelope;
pub use error::{BusError, Result};
pub use handler::{HandlerError, HandlerRegistry, HandlerResult, MessageHandler};
pub use memory::InMemoryBus;
pub use retry::RetryPolicy;
