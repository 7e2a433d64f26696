//! Generic persisted saga engine.
//!
//! A saga kind is a transition table plus an action; the engine
//! correlates bus deliveries to persisted instances, serializes
//! transitions per correlation id with an optimistic version check,
//! stages outgoing messages through the outbox, and implements timeouts
//! as bus-scheduled delayed messages.

pub mod engine;
pub mod error;
pub mod machine;
pub mod memory;
pub mod postgres;
pub mod store;

pub use engine::{Saga, SagaContext, SagaEngine};
pub use error::{Result, SagaError};
pub use machine::{TIMEOUT_FIRED, TransitionTable};
pub use memory::InMemorySagaStore;
pub use postgres::PostgresSagaStore;
pub use store::{SagaRow, SagaStore};
