use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::http::StatusCode;
use chrono::{Duration, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::codec::{decode_body, encode_body};
use super::error::{CacheFailure, IdempotencyError, StoreError};
use super::record::IdempotencyRecord;
use super::replay_cache::RedisReplayCache;
use super::storage::{IdempotencyStore, InsertOutcome};
use crate::observability::{get_metrics, mask_sensitive};

/// Body and status produced by an idempotent operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotentResponse<T> {
    pub body: T,
    pub status: StatusCode,
}

impl<T> IdempotentResponse<T> {
    pub fn new(status: StatusCode, body: T) -> Self {
        Self { body, status }
    }

    pub fn ok(body: T) -> Self {
        Self::new(StatusCode::OK, body)
    }

    pub fn created(body: T) -> Self {
        Self::new(StatusCode::CREATED, body)
    }
}

/// Future returned by an operation run inside a store transaction.
pub type OperationFuture<'c, T, E> =
    Pin<Box<dyn Future<Output = Result<IdempotentResponse<T>, E>> + Send + 'c>>;

/// Counters for idempotency handling.
#[derive(Debug, Default)]
pub struct IdempotencyMetrics {
    pub total_requests: AtomicU64,
    pub replayed_requests: AtomicU64,
    pub executed_requests: AtomicU64,
    pub key_conflicts: AtomicU64,
    pub failed_requests: AtomicU64,
}

impl IdempotencyMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_replayed(&self) {
        self.replayed_requests.fetch_add(1, Ordering::Relaxed);
        get_metrics().record_idempotency_outcome("replayed");
    }

    pub fn record_executed(&self) {
        self.executed_requests.fetch_add(1, Ordering::Relaxed);
        get_metrics().record_idempotency_outcome("executed");
    }

    pub fn record_conflict(&self) {
        self.key_conflicts.fetch_add(1, Ordering::Relaxed);
        get_metrics().record_idempotency_outcome("conflict");
    }

    pub fn record_failed(&self) {
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
        get_metrics().record_idempotency_outcome("failed");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            replayed_requests: self.replayed_requests.load(Ordering::Relaxed),
            executed_requests: self.executed_requests.load(Ordering::Relaxed),
            key_conflicts: self.key_conflicts.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub replayed_requests: u64,
    pub executed_requests: u64,
    pub key_conflicts: u64,
    pub failed_requests: u64,
}

impl MetricsSnapshot {
    pub fn replay_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.replayed_requests as f64 / self.total_requests as f64
        }
    }
}

/// Configuration for the idempotency handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyHandlerConfig {
    pub ttl_seconds: i64,
}

impl Default for IdempotencyHandlerConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 86400, // 24 hours
        }
    }
}

impl IdempotencyHandlerConfig {
    pub fn ttl(&self) -> Duration {
        Duration::seconds(self.ttl_seconds)
    }
}

/// Runs operations at most once per idempotency key and replays the stored
/// result for every later request with the same key.
pub struct IdempotencyHandler<S: IdempotencyStore> {
    store: S,
    replay_cache: Option<RedisReplayCache>,
    metrics: Arc<IdempotencyMetrics>,
    config: IdempotencyHandlerConfig,
}

impl<S: IdempotencyStore> IdempotencyHandler<S> {
    pub fn new(store: S, config: IdempotencyHandlerConfig) -> Self {
        Self {
            store,
            replay_cache: None,
            metrics: Arc::new(IdempotencyMetrics::new()),
            config,
        }
    }

    pub fn with_replay_cache(mut self, cache: RedisReplayCache) -> Self {
        self.replay_cache = Some(cache);
        self
    }

    /// Gets the metrics for this handler.
    pub fn metrics(&self) -> Arc<IdempotencyMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Executes `operation` unless a live record exists for `key`, in which
    /// case the recorded response is returned without running it.
    ///
    /// Business errors from `operation` come back as
    /// [`IdempotencyError::Operation`] and leave no record behind.
    ///
    /// The store transaction stays open while `operation` runs. On Postgres
    /// that pins one pooled connection, so an operation that also writes
    /// through the same pool needs a second connection and can starve a small
    /// pool. Such callers use [`Self::process_in_transaction`] instead.
    pub async fn process_idempotent_request<T, E, F, Fut>(
        &self,
        key: &str,
        path: &str,
        operation: F,
    ) -> Result<IdempotentResponse<T>, IdempotencyError<E>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<IdempotentResponse<T>, E>>,
    {
        self.metrics.record_request();

        if let Some(record) = self.find_live(key).await? {
            return self.replay(record, key, path);
        }

        let mut tx = self.store.begin(key).await.map_err(CacheFailure::Store)?;
        if let Some(record) = self.find_live_locked(&mut tx, key).await? {
            return self.replay(record, key, path);
        }

        match operation().await {
            Ok(response) => self.persist(tx, key, path, response).await,
            Err(e) => {
                self.metrics.record_failed();
                Err(IdempotencyError::Operation(e))
            }
        }
    }

    /// Same protocol as [`Self::process_idempotent_request`], but `operation`
    /// runs inside the store transaction that also writes the record, so its
    /// own writes commit or roll back together with it.
    pub async fn process_in_transaction<T, E, F>(
        &self,
        key: &str,
        path: &str,
        operation: F,
    ) -> Result<IdempotentResponse<T>, IdempotencyError<E>>
    where
        T: Serialize + DeserializeOwned,
        F: for<'c> FnOnce(&'c mut S::Tx) -> OperationFuture<'c, T, E>,
    {
        self.metrics.record_request();

        if let Some(record) = self.find_live(key).await? {
            return self.replay(record, key, path);
        }

        let mut tx = self.store.begin(key).await.map_err(CacheFailure::Store)?;
        if let Some(record) = self.find_live_locked(&mut tx, key).await? {
            return self.replay(record, key, path);
        }

        let outcome = operation(&mut tx).await;
        match outcome {
            Ok(response) => self.persist(tx, key, path, response).await,
            Err(e) => {
                self.metrics.record_failed();
                Err(IdempotencyError::Operation(e))
            }
        }
    }

    /// Deletes records that expired before now.
    pub async fn cleanup_expired(&self) -> Result<u64, StoreError> {
        self.store.delete_expired(Utc::now()).await
    }

    async fn find_live(&self, key: &str) -> Result<Option<IdempotencyRecord>, CacheFailure> {
        let now = Utc::now();

        if let Some(cache) = &self.replay_cache {
            if let Some(record) = cache.get(key).await.filter(|r| !r.is_expired_at(now)) {
                return Ok(Some(record));
            }
        }

        let live = self
            .store
            .find_by_key(key)
            .await?
            .filter(|r| !r.is_expired_at(now));

        if let (Some(cache), Some(record)) = (&self.replay_cache, &live) {
            cache.put(record).await;
        }

        Ok(live)
    }

    async fn find_live_locked(
        &self,
        tx: &mut S::Tx,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>, CacheFailure> {
        let now = Utc::now();
        let record = self.store.find_locked(tx, key).await?;
        Ok(record.filter(|r| !r.is_expired_at(now)))
    }

    async fn persist<T, E>(
        &self,
        mut tx: S::Tx,
        key: &str,
        path: &str,
        response: IdempotentResponse<T>,
    ) -> Result<IdempotentResponse<T>, IdempotencyError<E>>
    where
        T: Serialize + DeserializeOwned,
    {
        let body = encode_body(&response.body).map_err(CacheFailure::Codec)?;
        let record = IdempotencyRecord::new(
            key,
            path,
            body,
            i32::from(response.status.as_u16()),
            self.config.ttl(),
        );

        match self.store.insert(&mut tx, &record).await.map_err(CacheFailure::Store)? {
            InsertOutcome::Inserted => {
                self.store.commit(tx).await.map_err(CacheFailure::Store)?;
                if let Some(cache) = &self.replay_cache {
                    cache.put(&record).await;
                }
                self.metrics.record_executed();
                tracing::debug!(
                    key = %mask_sensitive(key, 4),
                    path = %path,
                    status = record.status_code,
                    "Recorded idempotent response"
                );
                Ok(response)
            }
            InsertOutcome::Conflict => {
                // Another writer committed first; roll back and serve theirs.
                drop(tx);
                tracing::warn!(
                    key = %mask_sensitive(key, 4),
                    "Idempotency record already present at insert, replaying it"
                );
                let winner = self.store.find_by_key(key).await.map_err(CacheFailure::Store)?;
                match winner {
                    Some(winner) => self.replay(winner, key, path),
                    None => Err(CacheFailure::Store(StoreError::Inconsistent(format!(
                        "insert for key '{}' conflicted but no record was found",
                        mask_sensitive(key, 4)
                    )))
                    .into()),
                }
            }
        }
    }

    fn replay<T, E>(
        &self,
        record: IdempotencyRecord,
        key: &str,
        path: &str,
    ) -> Result<IdempotentResponse<T>, IdempotencyError<E>>
    where
        T: DeserializeOwned,
    {
        if record.path != path {
            self.metrics.record_conflict();
            tracing::warn!(
                key = %mask_sensitive(key, 4),
                stored_path = %record.path,
                requested_path = %path,
                "Idempotency key reused for a different path"
            );
            return Err(IdempotencyError::KeyConflict {
                key: key.to_string(),
                stored_path: record.path,
                requested_path: path.to_string(),
            });
        }

        let status = u16::try_from(record.status_code)
            .ok()
            .and_then(|code| StatusCode::from_u16(code).ok())
            .ok_or(CacheFailure::InvalidStatus(record.status_code))?;
        let body = decode_body(&record.response_body).map_err(CacheFailure::Codec)?;

        self.metrics.record_replayed();
        Ok(IdempotentResponse { body, status })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::idempotency::storage::MockIdempotencyStore;
    use std::sync::atomic::AtomicUsize;

    fn stored(path: &str, body: &str, status: i32) -> IdempotencyRecord {
        IdempotencyRecord::new("k1", path, body.to_string(), status, Duration::hours(24))
    }

    #[test]
    fn test_metrics_snapshot() {
        let metrics = IdempotencyMetrics::new();
        metrics.record_request();
        metrics.record_request();
        metrics.record_replayed();
        metrics.record_executed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.replayed_requests, 1);
        assert_eq!(snapshot.executed_requests, 1);
        assert_eq!(snapshot.replay_rate(), 0.5);
    }

    #[test]
    fn test_default_config() {
        let config = IdempotencyHandlerConfig::default();
        assert_eq!(config.ttl_seconds, 86400);
        assert_eq!(config.ttl(), Duration::hours(24));
    }

    #[tokio::test]
    async fn test_storage_failure_is_wrapped() {
        let mut store = MockIdempotencyStore::new();
        store
            .expect_find_by_key()
            .returning(|_| Err(StoreError::Unavailable("connection refused".to_string())));
        let handler = IdempotencyHandler::new(store, IdempotencyHandlerConfig::default());

        let result = handler
            .process_idempotent_request("k1", "/users", || async {
                Ok::<_, AppError>(IdempotentResponse::created(1u32))
            })
            .await;

        assert!(matches!(
            result,
            Err(IdempotencyError::CacheOperationFailed(CacheFailure::Store(_)))
        ));
    }

    #[tokio::test]
    async fn test_unreadable_stored_status_is_wrapped() {
        let mut store = MockIdempotencyStore::new();
        store
            .expect_find_by_key()
            .returning(|_| Ok(Some(stored("/users", "1", 9999))));
        let handler = IdempotencyHandler::new(store, IdempotencyHandlerConfig::default());

        let result = handler
            .process_idempotent_request("k1", "/users", || async {
                Ok::<_, AppError>(IdempotentResponse::created(1u32))
            })
            .await;

        assert!(matches!(
            result,
            Err(IdempotencyError::CacheOperationFailed(CacheFailure::InvalidStatus(9999)))
        ));
    }

    #[tokio::test]
    async fn test_unreadable_stored_body_is_wrapped() {
        let mut store = MockIdempotencyStore::new();
        store
            .expect_find_by_key()
            .returning(|_| Ok(Some(stored("/users", "{not json", 201))));
        let handler = IdempotencyHandler::new(store, IdempotencyHandlerConfig::default());

        let result = handler
            .process_idempotent_request("k1", "/users", || async {
                Ok::<_, AppError>(IdempotentResponse::created(1u32))
            })
            .await;

        assert!(matches!(
            result,
            Err(IdempotencyError::CacheOperationFailed(CacheFailure::Codec(_)))
        ));
    }

    #[tokio::test]
    async fn test_lost_insert_race_replays_winner() {
        let lookups = AtomicUsize::new(0);
        let mut store = MockIdempotencyStore::new();
        store.expect_find_by_key().returning(move |_| {
            if lookups.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(None)
            } else {
                Ok(Some(stored("/users", "{\"id\":7}", 201)))
            }
        });
        store.expect_begin().returning(|_| Ok(()));
        store.expect_find_locked().returning(|_, _| Ok(None));
        store
            .expect_insert()
            .returning(|_, _| Ok(InsertOutcome::Conflict));
        store.expect_commit().never();
        let handler = IdempotencyHandler::new(store, IdempotencyHandlerConfig::default());

        let response = handler
            .process_idempotent_request("k1", "/users", || async {
                Ok::<_, AppError>(IdempotentResponse::created(serde_json::json!({"id": 8})))
            })
            .await
            .unwrap();

        assert_eq!(response.body, serde_json::json!({"id": 7}));
        assert_eq!(response.status, StatusCode::CREATED);
        assert_eq!(handler.metrics().snapshot().replayed_requests, 1);
    }

    #[tokio::test]
    async fn test_business_error_skips_insert() {
        let mut store = MockIdempotencyStore::new();
        store.expect_find_by_key().returning(|_| Ok(None));
        store.expect_begin().returning(|_| Ok(()));
        store.expect_find_locked().returning(|_, _| Ok(None));
        store.expect_insert().never();
        store.expect_commit().never();
        let handler = IdempotencyHandler::new(store, IdempotencyHandlerConfig::default());

        let result = handler
            .process_idempotent_request("k1", "/users", || async {
                Err::<IdempotentResponse<u32>, _>(AppError::NotFound("User 9".to_string()))
            })
            .await;

        assert!(matches!(result, Err(IdempotencyError::Operation(AppError::NotFound(_)))));
        assert_eq!(handler.metrics().snapshot().failed_requests, 1);
    }
}
