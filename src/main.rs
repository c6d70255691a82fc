use anyhow::Context;
use erm_service::api::{create_router, AppState};
use erm_service::config::Settings;
use erm_service::idempotency::{
    ExpirationSweeper, IdempotencyHandler, PostgresIdempotencyStore, RedisReplayCache,
};
use erm_service::observability::{init_logging, init_metrics, HealthChecker, LogConfig};
use erm_service::services::UserService;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = Settings::new()?;
    init_logging(&LogConfig::from(&settings.application))?;
    info!("Configuration loaded");

    let metrics_handle = init_metrics()?;

    // Connect to PostgreSQL
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(settings.database.pool_size)
        .acquire_timeout(settings.database.acquire_timeout())
        .connect(&settings.database.url)
        .await
        .context("failed to connect to PostgreSQL")?;
    info!("Database connection established");

    // Run migrations
    info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to apply migrations")?;
    info!("Migrations applied successfully");

    if let Some(seed) = &settings.seed_user {
        let mut conn = pool.acquire().await?;
        if UserService.ensure_seed_user(&mut conn, seed).await? {
            info!(name = %seed.name, "Seed user created");
        }
    }

    let redis_client = if settings.redis.enabled {
        info!("Redis replay cache enabled");
        Some(redis::Client::open(settings.redis.url.as_str()).context("invalid Redis URL")?)
    } else {
        None
    };

    let mut handler = IdempotencyHandler::new(
        PostgresIdempotencyStore::new(pool.clone()),
        settings.idempotency.handler_config()?,
    );
    if let Some(client) = &redis_client {
        handler = handler.with_replay_cache(RedisReplayCache::new(client.clone(), "erm"));
    }
    let handler = Arc::new(handler);

    let sweeper = ExpirationSweeper::new(Arc::clone(&handler), settings.idempotency.sweep_interval()).start();
    info!(
        interval_seconds = settings.idempotency.sweep_interval().as_secs(),
        "Idempotency sweeper started"
    );

    let state = AppState::new(pool.clone(), handler)
        .with_idempotency_settings(&settings.idempotency)?
        .with_metrics(metrics_handle)
        .with_health_checker(Arc::new(HealthChecker::new(pool, redis_client)));

    let address = format!("{}:{}", settings.application.host, settings.application.port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {}", address))?;
    info!("Listening on {}", address);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
    }
}
