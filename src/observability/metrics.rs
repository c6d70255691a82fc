use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Global metrics instance.
pub static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Metrics collector for the service.
#[derive(Debug, Clone, Copy, Default)]
pub struct Metrics;

impl Metrics {
    pub fn new() -> Self {
        Self
    }

    /// `outcome` is one of `executed`, `replayed`, `conflict` or `failed`.
    pub fn record_idempotency_outcome(&self, outcome: &'static str) {
        counter!("idempotency_requests_total", "outcome" => outcome).increment(1);
    }

    pub fn record_sweep(&self, deleted: u64) {
        counter!("idempotency_sweep_deleted_total").increment(deleted);
    }

    pub fn record_sweep_failure(&self) {
        counter!("idempotency_sweep_failures_total").increment(1);
    }

    /// `result` is one of `hit`, `miss` or `error`.
    pub fn record_replay_cache(&self, result: &'static str) {
        counter!("idempotency_replay_cache_total", "result" => result).increment(1);
    }

    pub fn record_user_created(&self) {
        counter!("erm_user_creation_total").increment(1);
    }

    pub fn record_user_updated(&self) {
        counter!("erm_user_update_total").increment(1);
    }

    pub fn record_project_added(&self) {
        counter!("erm_project_addition_total").increment(1);
    }

    pub fn record_login_failed(&self) {
        counter!("erm_login_failed_total").increment(1);
    }

    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_ms: f64) {
        counter!("http_requests_total", "method" => method.to_string(), "path" => path.to_string(), "status" => status.to_string()).increment(1);
        histogram!("http_request_duration_ms", "method" => method.to_string(), "path" => path.to_string()).record(duration_ms);
    }
}

/// Timer for measuring operation latency.
pub struct LatencyTimer {
    start: Instant,
}

impl LatencyTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for LatencyTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs the Prometheus recorder once and returns its handle.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = METRICS_HANDLE.get() {
        return Ok(handle.clone());
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            describe_metrics();
            METRICS.get_or_init(Metrics::new);
            Ok(METRICS_HANDLE.get_or_init(|| handle).clone())
        }
        // Lost a race with a concurrent initializer.
        Err(e) => METRICS_HANDLE.get().cloned().ok_or(e),
    }
}

/// Describes all metrics for Prometheus.
fn describe_metrics() {
    describe_counter!("idempotency_requests_total", Unit::Count, "Idempotent requests by outcome");
    describe_counter!("idempotency_sweep_deleted_total", Unit::Count, "Expired idempotency records deleted by the sweeper");
    describe_counter!("idempotency_sweep_failures_total", Unit::Count, "Failed expiration sweeps");

    describe_counter!("idempotency_replay_cache_total", Unit::Count, "Redis replay cache lookups by result");

    describe_counter!("erm_user_creation_total", Unit::Count, "Total number of users created");
    describe_counter!("erm_user_update_total", Unit::Count, "Total number of user updates");
    describe_counter!("erm_project_addition_total", Unit::Count, "Total number of projects added to users");
    describe_counter!("erm_login_failed_total", Unit::Count, "Total number of failed basic auth attempts");

    describe_counter!("http_requests_total", Unit::Count, "Total HTTP requests");
    describe_histogram!("http_request_duration_ms", Unit::Milliseconds, "HTTP request latency in milliseconds");
}

/// Returns the global metrics instance.
pub fn get_metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}
