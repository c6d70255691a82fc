use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::time::{Duration, Instant};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const SLOW_DATABASE_MS: f64 = 100.0;

/// Ordered from best to worst so that the aggregate is the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }

    pub fn is_healthy(&self) -> bool {
        *self == HealthStatus::Healthy
    }

    pub fn is_degraded(&self) -> bool {
        *self == HealthStatus::Degraded
    }

    pub fn is_unhealthy(&self) -> bool {
        *self == HealthStatus::Unhealthy
    }
}

/// Probe result for one dependency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyHealth {
    pub name: String,
    pub status: HealthStatus,
    pub latency_ms: Option<f64>,
    pub message: Option<String>,
}

impl DependencyHealth {
    fn with(name: impl Into<String>, status: HealthStatus, latency_ms: Option<f64>, message: Option<String>) -> Self {
        Self {
            name: name.into(),
            status,
            latency_ms,
            message,
        }
    }

    pub fn healthy(name: impl Into<String>, latency_ms: f64) -> Self {
        Self::with(name, HealthStatus::Healthy, Some(latency_ms), None)
    }

    pub fn degraded(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with(name, HealthStatus::Degraded, None, Some(message.into()))
    }

    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with(name, HealthStatus::Unhealthy, None, Some(message.into()))
    }
}

/// Service health: the worst status among its dependencies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedHealth {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub dependencies: Vec<DependencyHealth>,
}

impl AggregatedHealth {
    pub fn new(version: String, uptime_seconds: u64, dependencies: Vec<DependencyHealth>) -> Self {
        let status = dependencies
            .iter()
            .map(|d| d.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);

        Self {
            status,
            version,
            uptime_seconds,
            dependencies,
        }
    }
}

/// Probes PostgreSQL and, when the replay cache is enabled, Redis.
pub struct HealthChecker {
    pool: PgPool,
    redis_client: Option<redis::Client>,
    start_time: Instant,
}

impl HealthChecker {
    pub fn new(pool: PgPool, redis_client: Option<redis::Client>) -> Self {
        Self {
            pool,
            redis_client,
            start_time: Instant::now(),
        }
    }

    pub async fn check_all(&self) -> AggregatedHealth {
        let mut dependencies = vec![self.check_database().await];
        if let Some(client) = &self.redis_client {
            dependencies.push(check_redis(client).await);
        }

        AggregatedHealth::new(
            env!("CARGO_PKG_VERSION").to_string(),
            self.uptime_seconds(),
            dependencies,
        )
    }

    /// Runs `SELECT 1`. Slow answers degrade, errors and timeouts are unhealthy.
    pub async fn check_database(&self) -> DependencyHealth {
        let start = Instant::now();
        let probe = sqlx::query("SELECT 1").fetch_one(&self.pool);

        match tokio::time::timeout(PROBE_TIMEOUT, probe).await {
            Ok(Ok(_)) => {
                let latency = elapsed_ms(start);
                if latency > SLOW_DATABASE_MS {
                    DependencyHealth::with(
                        "database",
                        HealthStatus::Degraded,
                        Some(latency),
                        Some(format!("slow response ({:.0} ms)", latency)),
                    )
                } else {
                    DependencyHealth::healthy("database", latency)
                }
            }
            Ok(Err(e)) => DependencyHealth::unhealthy("database", format!("query failed: {}", e)),
            Err(_) => DependencyHealth::unhealthy("database", "probe timed out"),
        }
    }

    pub fn is_alive(&self) -> bool {
        true
    }

    /// Ready while the database answers; Redis never blocks readiness.
    pub async fn is_ready(&self) -> bool {
        !self.check_database().await.status.is_unhealthy()
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// The replay cache is optional, so any Redis failure only degrades.
async fn check_redis(client: &redis::Client) -> DependencyHealth {
    let start = Instant::now();
    let probe = async {
        let mut conn = client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<_, ()>(&mut conn).await
    };

    match tokio::time::timeout(PROBE_TIMEOUT, probe).await {
        Ok(Ok(())) => DependencyHealth::healthy("redis", elapsed_ms(start)),
        Ok(Err(e)) => DependencyHealth::degraded("redis", format!("unreachable: {}", e)),
        Err(_) => DependencyHealth::degraded("redis", "probe timed out"),
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
