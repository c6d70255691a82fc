use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::error::StoreError;
use super::handler::IdempotencyHandler;
use super::storage::IdempotencyStore;
use crate::observability::get_metrics;

/// Default time between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Background job that deletes expired idempotency records.
pub struct ExpirationSweeper<S: IdempotencyStore + 'static> {
    handler: Arc<IdempotencyHandler<S>>,
    interval: Duration,
}

impl<S: IdempotencyStore + 'static> ExpirationSweeper<S> {
    pub fn new(handler: Arc<IdempotencyHandler<S>>, interval: Duration) -> Self {
        Self { handler, interval }
    }

    /// Runs one sweep and returns how many records were deleted.
    pub async fn run_once(&self) -> Result<u64, StoreError> {
        self.handler.cleanup_expired().await
    }

    /// Starts the sweep loop in a background task. The first sweep runs
    /// immediately; failures are logged and retried on the next tick.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;

                match self.run_once().await {
                    Ok(count) => {
                        get_metrics().record_sweep(count);
                        if count > 0 {
                            tracing::info!("Cleaned up {} expired idempotency records", count);
                        }
                    }
                    Err(e) => {
                        get_metrics().record_sweep_failure();
                        tracing::error!("Failed to cleanup expired idempotency records: {}", e);
                    }
                }
            }
        })
    }
}
