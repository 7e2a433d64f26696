//! PostgreSQL-backed processed-event ledger.

use async_trait::async_trait;
use chrono::Utc;
use common::EventId;
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::error::Result;
use crate::store::{Claim, ClaimGuard, ProcessedEvent, ProcessedEventStore};

/// PostgreSQL ledger implementation.
///
/// A claim opens a transaction and inserts the key; the transaction stays
/// open while the handler body runs and commits afterwards. A concurrent
/// duplicate blocks on the primary key until the first delivery resolves,
/// then observes either the committed row (skip) or its absence (retry).
#[derive(Clone)]
pub struct PostgresProcessedEventStore {
    pool: PgPool,
}

impl PostgresProcessedEventStore {
    /// Creates a new PostgreSQL ledger.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

struct PostgresClaim {
    tx: Transaction<'static, Postgres>,
    event_id: EventId,
    event_type: String,
}

#[async_trait]
impl ClaimGuard for PostgresClaim {
    async fn commit(mut self: Box<Self>, result: Option<serde_json::Value>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE processed_events
            SET processed_at = $3, result = $4
            WHERE event_id = $1 AND event_type = $2
            "#,
        )
        .bind(self.event_id.as_uuid())
        .bind(&self.event_type)
        .bind(Utc::now())
        .bind(result)
        .execute(&mut *self.tx)
        .await?;

        self.tx.commit().await?;
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl ProcessedEventStore for PostgresProcessedEventStore {
    async fn claim(&self, event_id: EventId, event_type: &str) -> Result<Claim> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO processed_events (event_id, event_type, processed_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (event_id, event_type) DO NOTHING
            "#,
        )
        .bind(event_id.as_uuid())
        .bind(event_type)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            tx.rollback().await?;
            let result: Option<serde_json::Value> = sqlx::query_scalar(
                "SELECT result FROM processed_events WHERE event_id = $1 AND event_type = $2",
            )
            .bind(event_id.as_uuid())
            .bind(event_type)
            .fetch_one(&self.pool)
            .await?;
            return Ok(Claim::AlreadyProcessed { result });
        }

        Ok(Claim::Acquired(Box::new(PostgresClaim {
            tx,
            event_id,
            event_type: event_type.to_string(),
        })))
    }

    async fn get(&self, event_id: EventId, event_type: &str) -> Result<Option<ProcessedEvent>> {
        let row = sqlx::query(
            r#"
            SELECT event_id, event_type, processed_at, result
            FROM processed_events
            WHERE event_id = $1 AND event_type = $2
            "#,
        )
        .bind(event_id.as_uuid())
        .bind(event_type)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(ProcessedEvent {
                event_id: EventId::from_uuid(row.try_get("event_id")?),
                event_type: row.try_get("event_type")?,
                processed_at: row.try_get("processed_at")?,
                result: row.try_get("result")?,
            })
        })
        .transpose()
    }
}
