//! Processed-event ledger and the idempotent consumer wrapper.
//!
//! The bus delivers at-least-once; the outbox publisher deliberately
//! duplicates on crash recovery. This crate is what turns that into
//! effectively-once for the business logic: every consumer is wrapped in
//! [`IdempotentConsumer`], which claims the `(event id, event type)` key in
//! the durable ledger before running the handler body and commits the
//! ledger row only if the body succeeds. A failed body releases the claim,
//! so redelivery retries from scratch instead of being swallowed.

pub mod consumer;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use consumer::IdempotentConsumer;
pub use error::{IdempotencyError, Result};
pub use memory::InMemoryProcessedEventStore;
pub use postgres::PostgresProcessedEventStore;
pub use store::{Claim, ClaimGuard, ProcessedEvent, ProcessedEventStore};
