//! Operation status endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::CorrelationId;
use operations::Operation;
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;

#[derive(Serialize)]
pub struct OperationResponse {
    pub correlation_id: String,
    pub operation_type: String,
    pub status: String,
    pub progress: i32,
    pub chat_room_id: Option<i64>,
    pub message_id: Option<i64>,
    pub initiator_user_id: i64,
    pub status_message: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
    pub cancel_reason: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

impl From<Operation> for OperationResponse {
    fn from(op: Operation) -> Self {
        Self {
            correlation_id: op.correlation_id.to_string(),
            operation_type: op.operation_type.to_string(),
            status: op.status.to_string(),
            progress: op.progress,
            chat_room_id: op.chat_room_id.map(i64::from),
            message_id: op.message_id.map(i64::from),
            initiator_user_id: op.initiator_user_id.into(),
            status_message: op.status_message,
            result: op.result,
            error_message: op.error_message,
            error_code: op.error_code,
            cancel_reason: op.cancel_reason,
            created_at: op.created_at.to_rfc3339(),
            started_at: op.started_at.map(|t| t.to_rfc3339()),
            completed_at: op.completed_at.map(|t| t.to_rfc3339()),
        }
    }
}

/// GET /operations/:id — progress and status of one tracked operation.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<OperationResponse>, ApiError> {
    let uuid = uuid::Uuid::parse_str(&id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))?;
    let correlation_id = CorrelationId::from(uuid);

    let operation = state
        .operations
        .get(correlation_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Operation {id} not found")))?;

    Ok(Json(operation.into()))
}
