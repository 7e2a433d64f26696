//! Shared types used across the chat coordination crates.

mod types;

pub use types::{ChatRoomId, CorrelationId, EventId, MessageId, UserId};
