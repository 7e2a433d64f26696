//! Async operation tracking for long-running chat actions.
//!
//! An API request that starts a saga gets back a correlation id, not a
//! result. The [`OperationTracker`] keeps the progress/status record the
//! caller polls or blocks on: saga steps update it as they transition and
//! finalize it on the terminal state. Starting an operation is idempotent
//! and conflict-checked against other active operations on the same room.

pub mod error;
pub mod memory;
pub mod operation;
pub mod postgres;
pub mod store;
pub mod tracker;

pub use error::{OperationError, Result};
pub use memory::InMemoryOperationStore;
pub use operation::{Operation, OperationStatus, OperationType};
pub use postgres::PostgresOperationStore;
pub use store::OperationStore;
pub use tracker::{OperationTracker, StartOperation};
