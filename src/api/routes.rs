use axum::{
    extract::{MatchedPath, Request},
    http::{HeaderMap, HeaderName},
    middleware::{self, Next},
    response::Response,
    routing::get,
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use super::handlers;
use crate::auth::require_basic_auth;
use crate::config::IdempotencySettings;
use crate::error::AppError;
use crate::idempotency::{IdempotencyHandler, IdempotencyKey, PostgresIdempotencyStore, DEFAULT_MAX_KEY_LENGTH};
use crate::observability::{get_metrics, HealthChecker, LatencyTimer};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub idempotency: Arc<IdempotencyHandler<PostgresIdempotencyStore>>,
    pub key_header: HeaderName,
    pub max_key_length: usize,
    pub metrics_handle: Option<PrometheusHandle>,
    pub health_checker: Arc<HealthChecker>,
}

impl AppState {
    pub fn new(pool: PgPool, idempotency: Arc<IdempotencyHandler<PostgresIdempotencyStore>>) -> Self {
        Self {
            health_checker: Arc::new(HealthChecker::new(pool.clone(), None)),
            pool,
            idempotency,
            key_header: HeaderName::from_static("request-id"),
            max_key_length: DEFAULT_MAX_KEY_LENGTH,
            metrics_handle: None,
        }
    }

    /// Adds metrics handle to the state.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    /// Adds health checker to the state.
    pub fn with_health_checker(mut self, checker: Arc<HealthChecker>) -> Self {
        self.health_checker = checker;
        self
    }

    /// Applies the configured idempotency header name and key length limit.
    pub fn with_idempotency_settings(mut self, settings: &IdempotencySettings) -> Result<Self, AppError> {
        settings.validate()?;
        self.key_header = HeaderName::from_bytes(settings.key_header.as_bytes()).map_err(|e| {
            AppError::Validation(format!("Invalid idempotency header name '{}': {}", settings.key_header, e))
        })?;
        self.max_key_length = settings.max_key_length;
        Ok(self)
    }

    /// Reads the idempotency key header required on every mutating route.
    /// Any UTF-8 value is accepted as an opaque key.
    pub fn idempotency_key(&self, headers: &HeaderMap) -> Result<IdempotencyKey, AppError> {
        let value = headers.get(&self.key_header).ok_or_else(|| {
            AppError::Validation(format!("Required header '{}' is missing", self.key_header))
        })?;

        let raw = std::str::from_utf8(value.as_bytes()).map_err(|_| {
            AppError::Validation(format!("{} header must be valid UTF-8", self.key_header))
        })?;

        IdempotencyKey::parse(raw, self.max_key_length)
            .map_err(|e| AppError::Validation(format!("Invalid {} header: {}", self.key_header, e)))
    }
}

/// Creates the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route(
            "/api/v1/users",
            get(handlers::get_all_users).post(handlers::create_user),
        )
        .route(
            "/api/v1/users/:user_id",
            get(handlers::get_user_by_id)
                .put(handlers::update_user)
                .delete(handlers::delete_user),
        )
        .route(
            "/api/v1/users/:user_id/projects",
            get(handlers::get_user_projects).post(handlers::add_project_to_user),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_basic_auth));

    Router::new()
        // Health endpoints
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/live", get(handlers::liveness_check))
        // Metrics endpoint
        .route("/metrics", get(handlers::metrics_endpoint))
        .merge(api)
        .layer(middleware::from_fn(track_http_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}

async fn track_http_metrics(request: Request, next: Next) -> Response {
    let timer = LatencyTimer::new();
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let response = next.run(request).await;

    get_metrics().record_http_request(&method, &path, response.status().as_u16(), timer.elapsed_ms());
    response
}
