use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::api::responses::{ApiResponse, ErrorResponse, ValidationErrorDetail};
use crate::idempotency::{CacheFailure, IdempotencyError};

/// Application-wide error type.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Request validation failed")]
    InvalidRequest(Vec<ValidationErrorDetail>),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate email: {0}")]
    DuplicateEmail(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Idempotency key conflict: {0}")]
    IdempotencyKeyConflict(String),

    #[error("Error processing idempotent request: {0}")]
    CacheOperationFailed(#[source] CacheFailure),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::DuplicateEmail(_) | AppError::IdempotencyKeyConflict(_) => StatusCode::CONFLICT,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Validation(_) | AppError::InvalidRequest(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::DuplicateEmail(_) => "DUPLICATE_EMAIL",
            AppError::IdempotencyKeyConflict(_) => "IDEMPOTENCY_KEY_CONFLICT",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            _ => "INTERNAL_ERROR",
        }
    }
}

impl From<IdempotencyError<AppError>> for AppError {
    fn from(err: IdempotencyError<AppError>) -> Self {
        match err {
            IdempotencyError::Operation(inner) => inner,
            IdempotencyError::KeyConflict { key, stored_path, requested_path } => {
                AppError::IdempotencyKeyConflict(format!(
                    "Idempotency key '{}' already used with path '{}', not '{}'",
                    key, stored_path, requested_path
                ))
            }
            IdempotencyError::CacheOperationFailed(failure) => AppError::CacheOperationFailed(failure),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error = match &self {
            AppError::Validation(msg)
            | AppError::NotFound(msg)
            | AppError::DuplicateEmail(msg)
            | AppError::IdempotencyKeyConflict(msg)
            | AppError::Unauthorized(msg) => ErrorResponse::new(self.error_code(), msg.clone()),
            AppError::InvalidRequest(details) => {
                ErrorResponse::new(self.error_code(), "Request validation failed")
                    .with_details(details.clone())
            }
            other => {
                tracing::error!(error = %other, "Request failed with internal error");
                ErrorResponse::new("INTERNAL_ERROR", "An internal error occurred")
            }
        };

        let mut response = (status, Json(ApiResponse::<()>::error(error))).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Basic realm=\"erm\""),
            );
        }
        response
    }
}
