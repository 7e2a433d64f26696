//! PostgreSQL-backed saga store.

use async_trait::async_trait;
use bus::ScheduleToken;
use common::CorrelationId;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{Result, SagaError};
use crate::store::{SagaRow, SagaStore};

/// PostgreSQL saga store implementation.
///
/// All saga kinds share the `saga_instances` table; the `version` column
/// carries the optimistic check that serializes transitions per
/// correlation id across replicas.
#[derive(Clone)]
pub struct PostgresSagaStore {
    pool: PgPool,
}

impl PostgresSagaStore {
    /// Creates a new PostgreSQL saga store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_saga(row: PgRow) -> Result<SagaRow> {
        Ok(SagaRow {
            correlation_id: CorrelationId::from_uuid(row.try_get::<Uuid, _>("correlation_id")?),
            saga_type: row.try_get("saga_type")?,
            state: row.try_get("state")?,
            data: row.try_get("data")?,
            timeout_token: row
                .try_get::<Option<Uuid>, _>("timeout_token")?
                .map(ScheduleToken::from_uuid),
            finished: row.try_get("finished")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            last_updated_at: row.try_get("last_updated_at")?,
        })
    }
}

#[async_trait]
impl SagaStore for PostgresSagaStore {
    async fn insert(&self, row: SagaRow) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO saga_instances
                (correlation_id, saga_type, state, data, timeout_token, finished,
                 version, created_at, last_updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (correlation_id) DO NOTHING
            "#,
        )
        .bind(row.correlation_id.as_uuid())
        .bind(&row.saga_type)
        .bind(&row.state)
        .bind(&row.data)
        .bind(row.timeout_token.map(|t| t.as_uuid()))
        .bind(row.finished)
        .bind(row.version)
        .bind(row.created_at)
        .bind(row.last_updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SagaError::VersionConflict(row.correlation_id));
        }
        Ok(())
    }

    async fn get(&self, correlation_id: CorrelationId) -> Result<Option<SagaRow>> {
        let row = sqlx::query("SELECT * FROM saga_instances WHERE correlation_id = $1")
            .bind(correlation_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_saga).transpose()
    }

    async fn update(&self, row: SagaRow) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE saga_instances
            SET state = $3, data = $4, timeout_token = $5, finished = $6,
                version = version + 1, last_updated_at = NOW()
            WHERE correlation_id = $1 AND version = $2
            "#,
        )
        .bind(row.correlation_id.as_uuid())
        .bind(row.version)
        .bind(&row.state)
        .bind(&row.data)
        .bind(row.timeout_token.map(|t| t.as_uuid()))
        .bind(row.finished)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(SagaError::VersionConflict(row.correlation_id));
        }
        Ok(())
    }
}
