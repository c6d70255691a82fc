use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Stored outcome of the first successful execution for an idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct IdempotencyRecord {
    #[sqlx(rename = "idempotency_key")]
    pub key: String,
    pub path: String,
    pub response_body: String,
    pub status_code: i32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn new(
        key: impl Into<String>,
        path: impl Into<String>,
        response_body: String,
        status_code: i32,
        ttl: Duration,
    ) -> Self {
        Self::new_at(key, path, response_body, status_code, ttl, Utc::now())
    }

    pub fn new_at(
        key: impl Into<String>,
        path: impl Into<String>,
        response_body: String,
        status_code: i32,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key: key.into(),
            path: path.into(),
            response_body,
            status_code,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Time left before the record expires, zero once it has.
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }
}
