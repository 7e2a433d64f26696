//! Outbox inspection and administrative endpoints.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::EventId;
use outbox::OutboxMessage;
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;

// -- Response types --

#[derive(Serialize)]
pub struct OutboxStatsResponse {
    pub counts: BTreeMap<&'static str, i64>,
}

#[derive(Serialize)]
pub struct OutboxMessageResponse {
    pub id: String,
    pub event_type: String,
    pub correlation_id: String,
    pub destination: String,
    pub status: String,
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub created_at: String,
    pub next_retry_at: Option<String>,
}

impl From<OutboxMessage> for OutboxMessageResponse {
    fn from(m: OutboxMessage) -> Self {
        Self {
            id: m.id.to_string(),
            event_type: m.event_type,
            correlation_id: m.correlation_id.to_string(),
            destination: m.destination,
            status: m.status.to_string(),
            retry_count: m.retry_count,
            last_error: m.last_error,
            created_at: m.created_at.to_rfc3339(),
            next_retry_at: m.next_retry_at.map(|t| t.to_rfc3339()),
        }
    }
}

#[derive(Serialize)]
pub struct RetryAllResponse {
    pub retried: u64,
}

// -- Handlers --

/// GET /outbox/stats — row counts per status.
#[tracing::instrument(skip(state))]
pub async fn stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<OutboxStatsResponse>, ApiError> {
    let counts = state.outbox.status_counts().await?;
    Ok(Json(OutboxStatsResponse { counts }))
}

/// GET /outbox/failed — rows parked after exhausting automatic retries.
#[tracing::instrument(skip(state))]
pub async fn failed(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<OutboxMessageResponse>>, ApiError> {
    let rows = state.outbox.list_failed().await?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

/// POST /outbox/retry/:id — re-queue one failed row.
#[tracing::instrument(skip(state))]
pub async fn retry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<OutboxMessageResponse>, ApiError> {
    let id = parse_event_id(&id)?;
    state.outbox.retry(id).await?;
    let row = state
        .outbox
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Outbox message {id} not found")))?;
    Ok(Json(row.into()))
}

/// POST /outbox/cancel/:id — permanently exclude one row.
#[tracing::instrument(skip(state))]
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<OutboxMessageResponse>, ApiError> {
    let id = parse_event_id(&id)?;
    state.outbox.cancel(id).await?;
    let row = state
        .outbox
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Outbox message {id} not found")))?;
    Ok(Json(row.into()))
}

/// POST /outbox/retryall — re-queue every failed row.
#[tracing::instrument(skip(state))]
pub async fn retry_all(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RetryAllResponse>, ApiError> {
    let retried = state.outbox.retry_all_failed().await?;
    tracing::info!(retried, "operator re-queued failed outbox rows");
    Ok(Json(RetryAllResponse { retried }))
}

fn parse_event_id(id: &str) -> Result<EventId, ApiError> {
    let uuid = uuid::Uuid::parse_str(id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))?;
    Ok(EventId::from(uuid))
}
