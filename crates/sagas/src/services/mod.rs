//! Collaborating services consumed over the network.
//!
//! Only the interfaces live here; production deployments plug in thin
//! clients for the real services, tests use the in-memory doubles.

pub mod delivery;
pub mod message_store;
pub mod room;

use common::ChatRoomId;
use thiserror::Error;

/// Errors surfaced by a collaborating service call.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The room does not exist on the room-storage side.
    #[error("Room not found: {0}")]
    RoomNotFound(ChatRoomId),

    /// Transport or remote-side failure; callers treat it as transient.
    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

pub use delivery::{DeliveryService, InMemoryDeliveryService};
pub use message_store::{InMemoryMessageStoreService, MessageStoreService};
pub use room::{InMemoryRoomService, RoomService};
