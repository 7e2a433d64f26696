//! In-memory processed-event ledger for testing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use common::EventId;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::Result;
use crate::store::{Claim, ClaimGuard, ProcessedEvent, ProcessedEventStore};

type Key = (EventId, String);

#[derive(Default)]
struct Ledger {
    committed: HashMap<Key, ProcessedEvent>,
}

/// In-memory ledger implementation.
///
/// Concurrent claims of the same key are serialized through a per-key
/// async mutex, mirroring the row lock the PostgreSQL store takes on the
/// unique index.
#[derive(Clone, Default)]
pub struct InMemoryProcessedEventStore {
    ledger: Arc<Mutex<Ledger>>,
    key_locks: Arc<Mutex<HashMap<Key, Arc<AsyncMutex<()>>>>>,
}

impl InMemoryProcessedEventStore {
    /// Creates a new empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed rows.
    pub fn committed_count(&self) -> usize {
        self.ledger.lock().unwrap().committed.len()
    }

    fn key_lock(&self, key: &Key) -> Arc<AsyncMutex<()>> {
        self.key_locks
            .lock()
            .unwrap()
            .entry(key.clone())
            .or_default()
            .clone()
    }
}

struct InMemoryClaim {
    ledger: Arc<Mutex<Ledger>>,
    key: Key,
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl ClaimGuard for InMemoryClaim {
    async fn commit(self: Box<Self>, result: Option<serde_json::Value>) -> Result<()> {
        let row = ProcessedEvent {
            event_id: self.key.0,
            event_type: self.key.1.clone(),
            processed_at: Utc::now(),
            result,
        };
        self.ledger.lock().unwrap().committed.insert(self.key, row);
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl ProcessedEventStore for InMemoryProcessedEventStore {
    async fn claim(&self, event_id: EventId, event_type: &str) -> Result<Claim> {
        let key = (event_id, event_type.to_string());
        let guard = self.key_lock(&key).lock_owned().await;

        if let Some(row) = self.ledger.lock().unwrap().committed.get(&key) {
            return Ok(Claim::AlreadyProcessed {
                result: row.result.clone(),
            });
        }

        Ok(Claim::Acquired(Box::new(InMemoryClaim {
            ledger: self.ledger.clone(),
            key,
            _guard: guard,
        })))
    }

    async fn get(&self, event_id: EventId, event_type: &str) -> Result<Option<ProcessedEvent>> {
        let key = (event_id, event_type.to_string());
        Ok(self.ledger.lock().unwrap().committed.get(&key).cloned())
    }
}
