//! PostgreSQL-backed outbox store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CorrelationId, EventId};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::error::{OutboxError, Result};
use crate::message::{OutboxMessage, OutboxStatus};
use crate::store::{OutboxStore, STALE_CLAIM};

/// PostgreSQL outbox implementation.
#[derive(Clone)]
pub struct PostgresOutboxStore {
    pool: PgPool,
}

impl PostgresOutboxStore {
    /// Creates a new PostgreSQL outbox store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    /// Stages a row on a caller-owned connection, typically the open
    /// transaction of the business write that produced the event.
    pub async fn stage_on(conn: &mut PgConnection, message: &OutboxMessage) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO outbox_messages
                (id, event_type, correlation_id, destination, payload, status,
                 retry_count, last_error, created_at, processed_at, next_retry_at, claimed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(message.id.as_uuid())
        .bind(&message.event_type)
        .bind(message.correlation_id.as_uuid())
        .bind(&message.destination)
        .bind(&message.payload)
        .bind(message.status.as_str())
        .bind(message.retry_count)
        .bind(&message.last_error)
        .bind(message.created_at)
        .bind(message.processed_at)
        .bind(message.next_retry_at)
        .bind(message.claimed_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    fn row_to_message(row: PgRow) -> Result<OutboxMessage> {
        let status: String = row.try_get("status")?;
        let status = OutboxStatus::parse(&status)
            .ok_or_else(|| OutboxError::Database(sqlx::Error::ColumnNotFound(status)))?;

        Ok(OutboxMessage {
            id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
            event_type: row.try_get("event_type")?,
            correlation_id: CorrelationId::from_uuid(row.try_get::<Uuid, _>("correlation_id")?),
            destination: row.try_get("destination")?,
            payload: row.try_get("payload")?,
            status,
            retry_count: row.try_get("retry_count")?,
            last_error: row.try_get("last_error")?,
            created_at: row.try_get("created_at")?,
            processed_at: row.try_get("processed_at")?,
            next_retry_at: row.try_get("next_retry_at")?,
            claimed_at: row.try_get("claimed_at")?,
        })
    }
}

#[async_trait]
impl OutboxStore for PostgresOutboxStore {
    async fn stage(&self, message: OutboxMessage) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        Self::stage_on(&mut conn, &message).await
    }

    async fn claim_batch(
        &self,
        batch_size: usize,
        max_retries: i32,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxMessage>> {
        let stale_cutoff = now - chrono::Duration::from_std(STALE_CLAIM).unwrap_or_default();

        // FOR UPDATE SKIP LOCKED keeps concurrent replicas from blocking
        // on each other; a crashed claimant's rows come back through the
        // stale-claim branch.
        let rows = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = 'Processing', claimed_at = $1
            WHERE id IN (
                SELECT id FROM outbox_messages
                WHERE (status = 'Pending'
                       AND retry_count < $2
                       AND (next_retry_at IS NULL OR next_retry_at <= $1))
                   OR (status = 'Processing' AND claimed_at < $3)
                ORDER BY created_at
                LIMIT $4
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(max_retries)
        .bind(stale_cutoff)
        .bind(batch_size as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_message).collect()
    }

    async fn mark_processed(&self, id: EventId) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = 'Processed', processed_at = $2, claimed_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(OutboxError::NotFound(id));
        }
        Ok(())
    }

    async fn record_failure(&self, id: EventId, error: &str, max_retries: i32) -> Result<()> {
        // Single statement so the increment and the park decision cannot
        // race a concurrent claimant. The backoff mirrors retry_backoff.
        let updated = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET retry_count = retry_count + 1,
                last_error = $2,
                claimed_at = NULL,
                status = CASE WHEN retry_count + 1 >= $3
                              THEN 'Failed' ELSE 'Pending' END,
                next_retry_at = CASE WHEN retry_count + 1 >= $3
                                     THEN NULL
                                     ELSE $4 + (retry_count + 1) * interval '5 seconds' END
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(error)
        .bind(max_retries)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(OutboxError::NotFound(id));
        }
        Ok(())
    }

    async fn get(&self, id: EventId) -> Result<Option<OutboxMessage>> {
        let row = sqlx::query("SELECT * FROM outbox_messages WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_message).transpose()
    }

    async fn status_counts(&self) -> Result<BTreeMap<&'static str, i64>> {
        let rows =
            sqlx::query("SELECT status, COUNT(*) AS n FROM outbox_messages GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut counts: BTreeMap<&'static str, i64> =
            OutboxStatus::ALL.iter().map(|s| (s.as_str(), 0)).collect();
        for row in rows {
            let status: String = row.try_get("status")?;
            if let Some(status) = OutboxStatus::parse(&status) {
                counts.insert(status.as_str(), row.try_get("n")?);
            }
        }
        Ok(counts)
    }

    async fn list_failed(&self) -> Result<Vec<OutboxMessage>> {
        let rows = sqlx::query(
            "SELECT * FROM outbox_messages WHERE status = 'Failed' ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::row_to_message).collect()
    }

    async fn retry(&self, id: EventId) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = 'Pending', retry_count = 0, next_retry_at = NULL
            WHERE id = $1 AND status = 'Failed'
            "#,
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            match self.get(id).await? {
                Some(row) => Err(OutboxError::InvalidTransition {
                    id,
                    actual: row.status,
                    requested: "retry",
                }),
                None => Err(OutboxError::NotFound(id)),
            }
        } else {
            Ok(())
        }
    }

    async fn cancel(&self, id: EventId) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = 'Cancelled'
            WHERE id = $1 AND status IN ('Pending', 'Failed')
            "#,
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            match self.get(id).await? {
                Some(row) => Err(OutboxError::InvalidTransition {
                    id,
                    actual: row.status,
                    requested: "cancel",
                }),
                None => Err(OutboxError::NotFound(id)),
            }
        } else {
            Ok(())
        }
    }

    async fn retry_all_failed(&self) -> Result<u64> {
        let updated = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = 'Pending', retry_count = 0, next_retry_at = NULL
            WHERE status = 'Failed'
            "#,
        )
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated)
    }

    async fn prune_processed_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let removed = sqlx::query(
            "DELETE FROM outbox_messages WHERE status = 'Processed' AND processed_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(removed)
    }
}
