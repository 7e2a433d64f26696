//! Saga instance persistence.

use async_trait::async_trait;
use bus::ScheduleToken;
use chrono::{DateTime, Utc};
use common::CorrelationId;

use crate::error::Result;

/// Persisted saga instance.
///
/// State and snapshot data are stored as JSON so one table can hold every
/// saga kind; the engine owns (de)serialization against the saga's typed
/// `State` and `Data`. The `version` column backs the optimistic check
/// that serializes transitions per correlation id.
#[derive(Debug, Clone)]
pub struct SagaRow {
    pub correlation_id: CorrelationId,
    pub saga_type: String,
    pub state: serde_json::Value,
    pub data: serde_json::Value,
    /// Present exactly while a follow-up event is outstanding.
    pub timeout_token: Option<ScheduleToken>,
    pub finished: bool,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl SagaRow {
    /// Creates a fresh instance row at version 1.
    pub fn new(
        correlation_id: CorrelationId,
        saga_type: impl Into<String>,
        state: serde_json::Value,
        data: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            correlation_id,
            saga_type: saga_type.into(),
            state,
            data,
            timeout_token: None,
            finished: false,
            version: 1,
            created_at: now,
            last_updated_at: now,
        }
    }
}

/// Persistence for saga instances.
#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Inserts a new instance.
    ///
    /// Fails with `SagaError::VersionConflict` if an instance with the
    /// same correlation id already exists; the caller reloads and retries.
    async fn insert(&self, row: SagaRow) -> Result<()>;

    /// Fetches an instance by correlation id.
    async fn get(&self, correlation_id: CorrelationId) -> Result<Option<SagaRow>>;

    /// Replaces an instance, bumping `version`.
    ///
    /// The write succeeds only if the stored version still equals
    /// `row.version`; otherwise `SagaError::VersionConflict` is returned
    /// and the caller reloads and retries the transition.
    async fn update(&self, row: SagaRow) -> Result<()>;
}
