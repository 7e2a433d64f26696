//! Route handlers.

pub mod health;
pub mod metrics;
pub mod operations;
pub mod outbox;
