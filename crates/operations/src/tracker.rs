//! The operation tracker.

use std::sync::Arc;
use std::time::Duration;

use bus::MessageEnvelope;
use chrono::Utc;
use common::{ChatRoomId, CorrelationId, MessageId, UserId};
use outbox::{OutboxMessage, OutboxStore};
use serde::{Deserialize, Serialize};

use crate::error::{OperationError, Result};
use crate::operation::{Operation, OperationStatus, OperationType};
use crate::store::OperationStore;

/// Queue the started event is published to.
const OPERATION_EVENTS_QUEUE: &str = "operation-events";

/// Interval between polls in `wait_for_completion`.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Command to start tracking a long-running action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartOperation {
    pub correlation_id: CorrelationId,
    pub operation_type: OperationType,
    pub chat_room_id: Option<ChatRoomId>,
    pub message_id: Option<MessageId>,
    pub initiator_user_id: UserId,
    pub operation_data: Option<serde_json::Value>,
}

/// Tracks the progress of long-running actions for synchronous callers.
///
/// Terminal transitions on an already-terminal record are logged no-ops,
/// never errors: sagas retry their transitions and must be able to call
/// `complete`/`fail` twice without double-applying anything.
pub struct OperationTracker {
    store: Arc<dyn OperationStore>,
    outbox: Arc<dyn OutboxStore>,
}

impl OperationTracker {
    /// Creates a tracker over an operation store and the outbox.
    pub fn new(store: Arc<dyn OperationStore>, outbox: Arc<dyn OutboxStore>) -> Self {
        Self { store, outbox }
    }

    /// Starts tracking an operation.
    ///
    /// Idempotent on the correlation id: a second start returns the
    /// existing record unchanged. A new operation is validated against
    /// the conflict matrix of active operations on the same room before
    /// any row is written, then persisted `Pending` with an
    /// `OperationStarted` event staged through the outbox.
    #[tracing::instrument(skip(self, cmd), fields(correlation_id = %cmd.correlation_id))]
    pub async fn start(&self, cmd: StartOperation) -> Result<Operation> {
        if let Some(existing) = self.store.get(cmd.correlation_id).await? {
            tracing::debug!("operation already exists, returning it unchanged");
            return Ok(existing);
        }

        if let Some(room) = cmd.chat_room_id {
            for active in self.store.find_active_for_room(room).await? {
                if active.operation_type.conflicts_with(cmd.operation_type) {
                    return Err(OperationError::Conflict {
                        requested: cmd.operation_type,
                        existing: active.operation_type,
                        room,
                    });
                }
            }
        }

        let operation = Operation::new(
            cmd.correlation_id,
            cmd.operation_type,
            cmd.chat_room_id,
            cmd.message_id,
            cmd.initiator_user_id,
            cmd.operation_data.clone(),
        );
        self.store.insert(operation.clone()).await?;

        let envelope = MessageEnvelope::new("OperationStarted", cmd.correlation_id, &cmd)?;
        self.outbox
            .stage(OutboxMessage::stage(OPERATION_EVENTS_QUEUE, &envelope))
            .await?;

        metrics::counter!("operations_started_total").increment(1);
        Ok(operation)
    }

    /// Updates progress and status message.
    ///
    /// Rejects values outside `[0, 100]`. The first update flips
    /// `Pending → InProgress`. Progress never decreases; a lower value is
    /// kept at the current one. Updates to a terminal record are no-ops.
    pub async fn update_progress(
        &self,
        correlation_id: CorrelationId,
        percent: i32,
        message: impl Into<String>,
    ) -> Result<Operation> {
        if !(0..=100).contains(&percent) {
            return Err(OperationError::InvalidProgress(percent));
        }

        let mut operation = self.load(correlation_id).await?;
        if operation.is_completed() {
            tracing::warn!(%correlation_id, status = %operation.status, "progress update on terminal operation ignored");
            return Ok(operation);
        }

        if operation.status == OperationStatus::Pending {
            operation.status = OperationStatus::InProgress;
            operation.started_at = Some(Utc::now());
        }
        if percent < operation.progress {
            tracing::debug!(
                %correlation_id,
                current = operation.progress,
                requested = percent,
                "progress would decrease, keeping current value"
            );
        } else {
            operation.progress = percent;
        }
        operation.status_message = Some(message.into());
        operation.last_updated_at = Utc::now();

        self.store.update(operation.clone()).await?;
        Ok(operation)
    }

    /// Terminal transition: the operation succeeded.
    pub async fn complete(
        &self,
        correlation_id: CorrelationId,
        result: Option<serde_json::Value>,
    ) -> Result<Operation> {
        self.finalize(correlation_id, "complete", |op| {
            op.status = OperationStatus::Completed;
            op.progress = 100;
            op.result = result;
        })
        .await
    }

    /// Terminal transition: the operation failed.
    pub async fn fail(
        &self,
        correlation_id: CorrelationId,
        error_message: impl Into<String>,
        error_code: Option<String>,
    ) -> Result<Operation> {
        let error_message = error_message.into();
        self.finalize(correlation_id, "fail", |op| {
            op.status = OperationStatus::Failed;
            op.error_message = Some(error_message);
            op.error_code = error_code;
        })
        .await
    }

    /// Cooperative cancellation: marks the record and relies on the saga
    /// to stop at its next transition; in-flight remote work is not
    /// forcibly stopped.
    ///
    /// The terminal status written is `Failed` with `cancel_reason` set;
    /// `OperationStatus::Canceled` is a reserved value not produced here.
    pub async fn cancel(
        &self,
        correlation_id: CorrelationId,
        reason: impl Into<String>,
    ) -> Result<Operation> {
        let reason = reason.into();
        self.finalize(correlation_id, "cancel", |op| {
            op.status = OperationStatus::Failed;
            op.cancel_reason = Some(reason);
        })
        .await
    }

    /// Terminal transition: the saga compensated its partial work.
    pub async fn compensate(
        &self,
        correlation_id: CorrelationId,
        reason: impl Into<String>,
    ) -> Result<Operation> {
        let reason = reason.into();
        self.finalize(correlation_id, "compensate", |op| {
            op.status = OperationStatus::Compensated;
            op.cancel_reason = Some(reason.clone());
            op.error_message = Some(reason);
        })
        .await
    }

    /// Fetches the current record.
    pub async fn get(&self, correlation_id: CorrelationId) -> Result<Option<Operation>> {
        self.store.get(correlation_id).await
    }

    /// Blocks the caller until the operation reaches a terminal status or
    /// the timeout elapses.
    pub async fn wait_for_completion(
        &self,
        correlation_id: CorrelationId,
        timeout: Duration,
    ) -> Result<Operation> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let operation = self.load(correlation_id).await?;
            if operation.is_completed() {
                return Ok(operation);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(OperationError::WaitTimeout(correlation_id));
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    async fn load(&self, correlation_id: CorrelationId) -> Result<Operation> {
        self.store
            .get(correlation_id)
            .await?
            .ok_or(OperationError::NotFound(correlation_id))
    }

    async fn finalize(
        &self,
        correlation_id: CorrelationId,
        verb: &'static str,
        mutate: impl FnOnce(&mut Operation),
    ) -> Result<Operation> {
        let mut operation = self.load(correlation_id).await?;
        if operation.is_completed() {
            tracing::warn!(
                %correlation_id,
                status = %operation.status,
                verb,
                "terminal transition on terminal operation ignored"
            );
            return Ok(operation);
        }

        mutate(&mut operation);
        let now = Utc::now();
        operation.completed_at = Some(now);
        operation.last_updated_at = now;
        self.store.update(operation.clone()).await?;

        metrics::counter!("operations_finalized_total", "status" => operation.status.as_str())
            .increment(1);
        Ok(operation)
    }
}
