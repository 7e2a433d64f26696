//! In-memory saga store for testing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use common::CorrelationId;

use crate::error::{Result, SagaError};
use crate::store::{SagaRow, SagaStore};

/// In-memory saga store implementation.
#[derive(Clone, Default)]
pub struct InMemorySagaStore {
    rows: Arc<Mutex<HashMap<CorrelationId, SagaRow>>>,
}

impl InMemorySagaStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of instances.
    pub fn row_count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

#[async_trait]
impl SagaStore for InMemorySagaStore {
    async fn insert(&self, row: SagaRow) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        if rows.contains_key(&row.correlation_id) {
            return Err(SagaError::VersionConflict(row.correlation_id));
        }
        rows.insert(row.correlation_id, row);
        Ok(())
    }

    async fn get(&self, correlation_id: CorrelationId) -> Result<Option<SagaRow>> {
        Ok(self.rows.lock().unwrap().get(&correlation_id).cloned())
    }

    async fn update(&self, mut row: SagaRow) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get(&row.correlation_id) {
            Some(stored) if stored.version == row.version => {
                row.version += 1;
                row.last_updated_at = Utc::now();
                rows.insert(row.correlation_id, row);
                Ok(())
            }
            Some(_) | None => Err(SagaError::VersionConflict(row.correlation_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: CorrelationId) -> SagaRow {
        SagaRow::new(
            id,
            "ChatCreation",
            serde_json::json!("CreatingRoom"),
            serde_json::json!({}),
        )
    }

    #[tokio::test]
    async fn insert_rejects_existing_correlation_id() {
        let store = InMemorySagaStore::new();
        let id = CorrelationId::new();
        store.insert(row(id)).await.unwrap();
        assert!(matches!(
            store.insert(row(id)).await,
            Err(SagaError::VersionConflict(_))
        ));
    }

    #[tokio::test]
    async fn update_bumps_version_and_checks_it() {
        let store = InMemorySagaStore::new();
        let id = CorrelationId::new();
        store.insert(row(id)).await.unwrap();

        let loaded = store.get(id).await.unwrap().unwrap();
        assert_eq!(loaded.version, 1);
        store.update(loaded.clone()).await.unwrap();
        assert_eq!(store.get(id).await.unwrap().unwrap().version, 2);

        // A writer still holding version 1 loses.
        assert!(matches!(
            store.update(loaded).await,
            Err(SagaError::VersionConflict(_))
        ));
    }
}
