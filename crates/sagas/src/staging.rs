//! Shared helper for workers replying through the outbox.

use bus::{HandlerError, MessageEnvelope};
use common::CorrelationId;
use outbox::{OutboxMessage, OutboxStore};
use serde::Serialize;

/// Stages a reply on the same correlation id.
///
/// Workers never publish straight to the bus; their reply goes through
/// the outbox alongside whatever local write the command caused.
pub(crate) async fn stage_reply<T: Serialize>(
    outbox: &dyn OutboxStore,
    correlation_id: CorrelationId,
    queue: &str,
    message_type: &str,
    payload: &T,
) -> Result<(), HandlerError> {
    let envelope = MessageEnvelope::new(message_type, correlation_id, payload)?;
    outbox
        .stage(OutboxMessage::stage(queue, &envelope))
        .await?;
    Ok(())
}
