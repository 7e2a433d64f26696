//! PostgreSQL-backed operation store.

use async_trait::async_trait;
use common::{ChatRoomId, CorrelationId, MessageId, UserId};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{OperationError, Result};
use crate::operation::{Operation, OperationStatus, OperationType};
use crate::store::OperationStore;

/// PostgreSQL operation store implementation.
#[derive(Clone)]
pub struct PostgresOperationStore {
    pool: PgPool,
}

impl PostgresOperationStore {
    /// Creates a new PostgreSQL operation store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_operation(row: PgRow) -> Result<Operation> {
        let status: String = row.try_get("status")?;
        let status = OperationStatus::parse(&status)
            .ok_or_else(|| OperationError::Database(sqlx::Error::ColumnNotFound(status)))?;
        let operation_type: String = row.try_get("operation_type")?;
        let operation_type = OperationType::parse(&operation_type).ok_or_else(|| {
            OperationError::Database(sqlx::Error::ColumnNotFound(operation_type))
        })?;

        Ok(Operation {
            correlation_id: CorrelationId::from_uuid(row.try_get::<Uuid, _>("correlation_id")?),
            operation_type,
            status,
            chat_room_id: row
                .try_get::<Option<i64>, _>("chat_room_id")?
                .map(ChatRoomId::new),
            message_id: row
                .try_get::<Option<i64>, _>("message_id")?
                .map(MessageId::new),
            initiator_user_id: UserId::new(row.try_get("initiator_user_id")?),
            progress: row.try_get("progress")?,
            status_message: row.try_get("status_message")?,
            operation_data: row.try_get("operation_data")?,
            result: row.try_get("result")?,
            error_message: row.try_get("error_message")?,
            error_code: row.try_get("error_code")?,
            cancel_reason: row.try_get("cancel_reason")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            last_updated_at: row.try_get("last_updated_at")?,
        })
    }
}

#[async_trait]
impl OperationStore for PostgresOperationStore {
    async fn insert(&self, operation: Operation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO operations
                (correlation_id, operation_type, status, chat_room_id, message_id,
                 initiator_user_id, progress, status_message, operation_data, result,
                 error_message, error_code, cancel_reason, created_at, started_at,
                 completed_at, last_updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(operation.correlation_id.as_uuid())
        .bind(operation.operation_type.as_str())
        .bind(operation.status.as_str())
        .bind(operation.chat_room_id.map(|id| id.as_i64()))
        .bind(operation.message_id.map(|id| id.as_i64()))
        .bind(operation.initiator_user_id.as_i64())
        .bind(operation.progress)
        .bind(&operation.status_message)
        .bind(&operation.operation_data)
        .bind(&operation.result)
        .bind(&operation.error_message)
        .bind(&operation.error_code)
        .bind(&operation.cancel_reason)
        .bind(operation.created_at)
        .bind(operation.started_at)
        .bind(operation.completed_at)
        .bind(operation.last_updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, correlation_id: CorrelationId) -> Result<Option<Operation>> {
        let row = sqlx::query("SELECT * FROM operations WHERE correlation_id = $1")
            .bind(correlation_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_operation).transpose()
    }

    async fn update(&self, operation: Operation) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE operations
            SET status = $2, progress = $3, status_message = $4, result = $5,
                error_message = $6, error_code = $7, cancel_reason = $8,
                started_at = $9, completed_at = $10, last_updated_at = $11
            WHERE correlation_id = $1
            "#,
        )
        .bind(operation.correlation_id.as_uuid())
        .bind(operation.status.as_str())
        .bind(operation.progress)
        .bind(&operation.status_message)
        .bind(&operation.result)
        .bind(&operation.error_message)
        .bind(&operation.error_code)
        .bind(&operation.cancel_reason)
        .bind(operation.started_at)
        .bind(operation.completed_at)
        .bind(operation.last_updated_at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(OperationError::NotFound(operation.correlation_id));
        }
        Ok(())
    }

    async fn find_active_for_room(&self, chat_room_id: ChatRoomId) -> Result<Vec<Operation>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM operations
            WHERE chat_room_id = $1 AND status IN ('Pending', 'InProgress')
            "#,
        )
        .bind(chat_room_id.as_i64())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::row_to_operation).collect()
    }
}
