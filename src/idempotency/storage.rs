use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use super::error::StoreError;
use super::record::IdempotencyRecord;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result of a conditional insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The record was written (fresh key, or the previous record had expired).
    Inserted,
    /// A live record already exists for the key; nothing was written.
    Conflict,
}

/// Persistence backend for idempotency records.
///
/// `begin` opens a unit of work holding an exclusive lock on one key until the
/// transaction is committed or dropped. Dropping a transaction without
/// committing discards everything staged in it.
#[cfg_attr(test, mockall::automock(type Tx = ();))]
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    type Tx: Send;

    /// Lock-free read of the current record, expired or not.
    async fn find_by_key(&self, key: &str) -> StoreResult<Option<IdempotencyRecord>>;

    async fn begin(&self, key: &str) -> StoreResult<Self::Tx>;

    /// Reads the record through an open transaction holding the key lock.
    async fn find_locked(&self, tx: &mut Self::Tx, key: &str) -> StoreResult<Option<IdempotencyRecord>>;

    /// Writes `record` unless a record for the same key is still live at
    /// `record.created_at`. An expired record is replaced.
    async fn insert(&self, tx: &mut Self::Tx, record: &IdempotencyRecord) -> StoreResult<InsertOutcome>;

    async fn commit(&self, tx: Self::Tx) -> StoreResult<()>;

    /// Deletes every record that expired before `now`.
    async fn delete_expired(&self, now: DateTime<Utc>) -> StoreResult<u64>;
}

/// PostgreSQL-based idempotency storage.
#[derive(Debug, Clone)]
pub struct PostgresIdempotencyStore {
    pool: PgPool,
}

impl PostgresIdempotencyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdempotencyStore for PostgresIdempotencyStore {
    type Tx = Transaction<'static, Postgres>;

    async fn find_by_key(&self, key: &str) -> StoreResult<Option<IdempotencyRecord>> {
        let record = sqlx::query_as::<_, IdempotencyRecord>(
            r#"
            SELECT idempotency_key, path, response_body, status_code, created_at, expires_at
            FROM idempotency_record
            WHERE idempotency_key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn begin(&self, key: &str) -> StoreResult<Self::Tx> {
        let mut tx = self.pool.begin().await?;

        // Released automatically on commit or rollback.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(key)
            .execute(&mut *tx)
            .await?;

        Ok(tx)
    }

    async fn find_locked(&self, tx: &mut Self::Tx, key: &str) -> StoreResult<Option<IdempotencyRecord>> {
        let record = sqlx::query_as::<_, IdempotencyRecord>(
            r#"
            SELECT idempotency_key, path, response_body, status_code, created_at, expires_at
            FROM idempotency_record
            WHERE idempotency_key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(record)
    }

    async fn insert(&self, tx: &mut Self::Tx, record: &IdempotencyRecord) -> StoreResult<InsertOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO idempotency_record (idempotency_key, path, response_body, status_code, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (idempotency_key) DO UPDATE
            SET path = EXCLUDED.path,
                response_body = EXCLUDED.response_body,
                status_code = EXCLUDED.status_code,
                created_at = EXCLUDED.created_at,
                expires_at = EXCLUDED.expires_at
            WHERE idempotency_record.expires_at < EXCLUDED.created_at
            "#,
        )
        .bind(&record.key)
        .bind(&record.path)
        .bind(&record.response_body)
        .bind(record.status_code)
        .bind(record.created_at)
        .bind(record.expires_at)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            Ok(InsertOutcome::Conflict)
        } else {
            Ok(InsertOutcome::Inserted)
        }
    }

    async fn commit(&self, tx: Self::Tx) -> StoreResult<()> {
        tx.commit().await?;
        Ok(())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM idempotency_record
            WHERE expires_at < $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
