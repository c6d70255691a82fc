#![allow(dead_code)]

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

/// Connects to `DATABASE_URL` and applies migrations. Returns `None` when the
/// variable is unset so database tests can be skipped.
pub async fn setup_test_db() -> Option<PgPool> {
    dotenvy::dotenv().ok();

    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping database test");
        return None;
    };

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&database_url)
        .await
        .expect("Failed to connect to test database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    Some(pool)
}

pub fn unique(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4().simple())
}

pub async fn cleanup_user(pool: &PgPool, email: &str) {
    sqlx::query("DELETE FROM tb_user WHERE email = $1")
        .bind(email)
        .execute(pool)
        .await
        .ok();
}

pub async fn cleanup_key(pool: &PgPool, key: &str) {
    sqlx::query("DELETE FROM idempotency_record WHERE idempotency_key = $1")
        .bind(key)
        .execute(pool)
        .await
        .ok();
}
