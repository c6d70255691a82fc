use chrono::Utc;
use redis::AsyncCommands;

use super::record::IdempotencyRecord;
use crate::observability::get_metrics;

/// Redis copy of completed idempotency records.
///
/// Only ever holds records that are already committed to the store, each
/// expiring together with its record. Every Redis failure is logged and
/// treated as a miss so callers fall back to the store.
#[derive(Debug, Clone)]
pub struct RedisReplayCache {
    client: redis::Client,
    key_prefix: String,
}

impl RedisReplayCache {
    pub fn new(client: redis::Client, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
        }
    }

    fn cache_key(&self, idempotency_key: &str) -> String {
        format!("{}:replay:{}", self.key_prefix, idempotency_key)
    }

    pub async fn get(&self, idempotency_key: &str) -> Option<IdempotencyRecord> {
        let key = self.cache_key(idempotency_key);

        let mut conn = match self.client.get_multiplexed_async_connection().await {
            Ok(c) => c,
            Err(e) => {
                get_metrics().record_replay_cache("error");
                tracing::warn!("Redis connection error in replay cache get: {}", e);
                return None;
            }
        };

        let cached: Option<String> = match conn.get(&key).await {
            Ok(v) => v,
            Err(e) => {
                get_metrics().record_replay_cache("error");
                tracing::warn!("Redis get error: {}", e);
                return None;
            }
        };

        match cached.map(|json| serde_json::from_str::<IdempotencyRecord>(&json)) {
            Some(Ok(record)) => {
                get_metrics().record_replay_cache("hit");
                Some(record)
            }
            Some(Err(e)) => {
                get_metrics().record_replay_cache("error");
                tracing::warn!("Discarding unreadable replay cache entry: {}", e);
                if let Err(e) = conn.del::<_, ()>(&key).await {
                    tracing::warn!("Redis del error: {}", e);
                }
                None
            }
            None => {
                get_metrics().record_replay_cache("miss");
                None
            }
        }
    }

    pub async fn put(&self, record: &IdempotencyRecord) {
        let Some(ttl) = ttl_seconds(record) else {
            return;
        };

        let json = match serde_json::to_string(record) {
            Ok(json) => json,
            Err(e) => {
                get_metrics().record_replay_cache("error");
                tracing::warn!("Failed to serialize record for replay cache: {}", e);
                return;
            }
        };

        let mut conn = match self.client.get_multiplexed_async_connection().await {
            Ok(c) => c,
            Err(e) => {
                get_metrics().record_replay_cache("error");
                tracing::warn!("Redis connection error in replay cache put: {}", e);
                return;
            }
        };

        if let Err(e) = conn
            .set_ex::<_, _, ()>(self.cache_key(&record.key), json, ttl)
            .await
        {
            get_metrics().record_replay_cache("error");
            tracing::warn!("Redis set error: {}", e);
        }
    }
}

/// Whole seconds the record has left, `None` once nothing is left to cache.
fn ttl_seconds(record: &IdempotencyRecord) -> Option<u64> {
    let seconds = record.remaining_ttl(Utc::now()).num_seconds();
    u64::try_from(seconds).ok().filter(|s| *s > 0)
}
