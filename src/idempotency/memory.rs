use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use super::record::IdempotencyRecord;
use super::storage::{IdempotencyStore, InsertOutcome, StoreResult};

/// Process-local store used by tests and benchmarks.
///
/// Key locks are async mutexes, so same-key callers queue the same way they
/// would on a Postgres advisory lock.
#[derive(Debug, Clone, Default)]
pub struct InMemoryIdempotencyStore {
    records: Arc<RwLock<HashMap<String, IdempotencyRecord>>>,
    key_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

/// Unit of work for [`InMemoryIdempotencyStore`].
pub struct InMemoryTransaction {
    _guard: OwnedMutexGuard<()>,
    staged: Option<IdempotencyRecord>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a record directly, bypassing locking and the live-record check.
    pub async fn put(&self, record: IdempotencyRecord) {
        self.records.write().await.insert(record.key.clone(), record);
    }

    pub async fn get(&self, key: &str) -> Option<IdempotencyRecord> {
        self.records.read().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    type Tx = InMemoryTransaction;

    async fn find_by_key(&self, key: &str) -> StoreResult<Option<IdempotencyRecord>> {
        Ok(self.get(key).await)
    }

    async fn begin(&self, key: &str) -> StoreResult<Self::Tx> {
        let lock = {
            let mut locks = self.key_locks.lock().await;
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        Ok(InMemoryTransaction {
            _guard: lock.lock_owned().await,
            staged: None,
        })
    }

    async fn find_locked(&self, tx: &mut Self::Tx, key: &str) -> StoreResult<Option<IdempotencyRecord>> {
        if let Some(staged) = tx.staged.as_ref().filter(|r| r.key == key) {
            return Ok(Some(staged.clone()));
        }
        Ok(self.get(key).await)
    }

    async fn insert(&self, tx: &mut Self::Tx, record: &IdempotencyRecord) -> StoreResult<InsertOutcome> {
        let live = self
            .records
            .read()
            .await
            .get(&record.key)
            .is_some_and(|existing| existing.expires_at >= record.created_at);

        if live || tx.staged.is_some() {
            return Ok(InsertOutcome::Conflict);
        }

        tx.staged = Some(record.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn commit(&self, tx: Self::Tx) -> StoreResult<()> {
        if let Some(record) = tx.staged {
            self.put(record).await;
        }
        Ok(())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| record.expires_at >= now);
        let deleted = (before - records.len()) as u64;
        drop(records);

        // Forget locks nobody is holding or waiting on.
        let mut locks = self.key_locks.lock().await;
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);

        Ok(deleted)
    }
}
