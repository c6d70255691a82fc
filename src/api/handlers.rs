use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{Postgres, Transaction};

use crate::api::requests::{
    validate_request, CreateProjectRequest, CreateUserRequest, UpdateUserRequest,
};
use crate::api::responses::{ApiResponse, HealthResponse, ProjectResponse, UserResponse};
use crate::error::AppError;
use crate::idempotency::{IdempotentResponse, OperationFuture};
use crate::models::AuthenticatedUser;
use crate::observability::mask_sensitive;
use crate::services::{AddProject, CreateUser, UpdateUser, UserService};

use super::routes::AppState;

type PgTransaction = Transaction<'static, Postgres>;

/// Health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> Json<ApiResponse<HealthResponse>> {
    let health = state.health_checker.check_all().await;

    let response = HealthResponse {
        status: health.status.as_str().to_string(),
        version: health.version,
        timestamp: chrono::Utc::now(),
        uptime_seconds: health.uptime_seconds,
        dependencies: health.dependencies,
    };

    Json(ApiResponse::success(response))
}

/// Readiness check endpoint.
pub async fn readiness_check(State(state): State<AppState>) -> StatusCode {
    if state.health_checker.is_ready().await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Liveness check endpoint.
pub async fn liveness_check() -> StatusCode {
    StatusCode::OK
}

/// Prometheus scrape endpoint.
pub async fn metrics_endpoint(State(state): State<AppState>) -> Response {
    match &state.metrics_handle {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

// ============================================================================
// User Handlers
// ============================================================================

/// Create a new user.
pub async fn create_user(
    State(state): State<AppState>,
    Extension(actor): Extension<AuthenticatedUser>,
    uri: Uri,
    headers: HeaderMap,
    Json(request): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<ApiResponse<UserResponse>>), AppError> {
    validate_request(&request)?;
    tracing::info!(actor = %actor.name, "Creating user");

    let command = CreateUser::from(request);
    let response = run_mutation(&state, &headers, uri.path(), move |tx| {
        Box::pin(async move {
            UserService
                .create_user(&mut **tx, command)
                .await
                .map(|user| IdempotentResponse::created(UserResponse::from(user)))
        })
    })
    .await?;

    Ok(respond(response))
}

/// List all users with their projects.
pub async fn get_all_users(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<UserResponse>>>, AppError> {
    tracing::info!("Retrieving all users");
    let mut conn = state.pool.acquire().await?;
    let users = UserService.get_all_users(&mut conn).await?;

    Ok(Json(ApiResponse::success(
        users.into_iter().map(UserResponse::from).collect(),
    )))
}

/// Get user by ID.
pub async fn get_user_by_id(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<ApiResponse<UserResponse>>, AppError> {
    tracing::info!(user_id, "Retrieving user");
    let mut conn = state.pool.acquire().await?;
    let user = UserService.get_user_by_id(&mut conn, user_id).await?;

    Ok(Json(ApiResponse::success(UserResponse::from(user))))
}

/// Partially update a user.
pub async fn update_user(
    State(state): State<AppState>,
    Extension(actor): Extension<AuthenticatedUser>,
    Path(user_id): Path<i64>,
    uri: Uri,
    headers: HeaderMap,
    Json(request): Json<UpdateUserRequest>,
) -> Result<(StatusCode, Json<ApiResponse<UserResponse>>), AppError> {
    validate_request(&request)?;
    tracing::info!(actor = %actor.name, user_id, "Updating user");

    let command = UpdateUser::from(request);
    let response = run_mutation(&state, &headers, uri.path(), move |tx| {
        Box::pin(async move {
            UserService
                .update_user(&mut **tx, user_id, command)
                .await
                .map(|user| IdempotentResponse::ok(UserResponse::from(user)))
        })
    })
    .await?;

    Ok(respond(response))
}

/// Delete a user and its projects.
pub async fn delete_user(
    State(state): State<AppState>,
    Extension(actor): Extension<AuthenticatedUser>,
    Path(user_id): Path<i64>,
) -> Result<StatusCode, AppError> {
    tracing::info!(actor = %actor.name, user_id, "Deleting user");
    let mut conn = state.pool.acquire().await?;
    UserService.delete_user(&mut conn, user_id).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// List the projects of a user.
pub async fn get_user_projects(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<ApiResponse<Vec<ProjectResponse>>>, AppError> {
    tracing::info!(user_id, "Retrieving projects for user");
    let mut conn = state.pool.acquire().await?;
    let projects = UserService.get_user_projects(&mut conn, user_id).await?;

    Ok(Json(ApiResponse::success(
        projects.into_iter().map(ProjectResponse::from).collect(),
    )))
}

/// Attach an external project to a user.
pub async fn add_project_to_user(
    State(state): State<AppState>,
    Extension(actor): Extension<AuthenticatedUser>,
    Path(user_id): Path<i64>,
    uri: Uri,
    headers: HeaderMap,
    Json(request): Json<CreateProjectRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ProjectResponse>>), AppError> {
    validate_request(&request)?;
    tracing::info!(actor = %actor.name, user_id, "Adding project to user");

    let command = AddProject::from(request);
    let response = run_mutation(&state, &headers, uri.path(), move |tx| {
        Box::pin(async move {
            UserService
                .add_project_to_user(&mut **tx, user_id, command)
                .await
                .map(|project| IdempotentResponse::created(ProjectResponse::from(project)))
        })
    })
    .await?;

    Ok(respond(response))
}

/// Runs a write at most once per idempotency key. The write and its
/// idempotency record commit in the same transaction.
async fn run_mutation<T, F>(
    state: &AppState,
    headers: &HeaderMap,
    path: &str,
    operation: F,
) -> Result<IdempotentResponse<T>, AppError>
where
    T: Serialize + DeserializeOwned + Send,
    F: for<'c> FnOnce(&'c mut PgTransaction) -> OperationFuture<'c, T, AppError> + Send,
{
    let key = state.idempotency_key(headers)?;
    tracing::debug!(key = %mask_sensitive(key.as_str(), 4), path, "Processing idempotent request");

    Ok(state
        .idempotency
        .process_in_transaction(key.as_str(), path, operation)
        .await?)
}

fn respond<T>(response: IdempotentResponse<T>) -> (StatusCode, Json<ApiResponse<T>>) {
    (response.status, Json(ApiResponse::success(response.body)))
}
