//! Transactional outbox for reliable event publication.
//!
//! A business write and the intent to notify the world about it must be
//! atomic even though the publish happens out of band. Events are staged
//! as rows in the same local transaction as the domain write; a background
//! [`OutboxPublisher`] drains them to the bus with bounded retry, and
//! [`OutboxCleanup`] prunes old processed rows. The delivery guarantee
//! produced is at-least-once: a crash between "publish succeeded" and
//! "mark processed" duplicates the publish on the next poll, which the
//! idempotent consumer layer absorbs downstream.

pub mod cleanup;
pub mod error;
pub mod memory;
pub mod message;
pub mod postgres;
pub mod publisher;
pub mod store;

pub use cleanup::{CleanupConfig, OutboxCleanup};
pub use error::{OutboxError, Result};
pub use memory::InMemoryOutboxStore;
pub use message::{OutboxMessage, OutboxStatus};
pub use postgres::PostgresOutboxStore;
pub use publisher::{DrainStats, OutboxPublisher, PublisherConfig};
pub use store::{OutboxStore, STALE_CLAIM};
