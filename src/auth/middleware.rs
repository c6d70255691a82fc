use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::api::AppState;
use crate::error::AppError;
use crate::services::UserService;

/// Username and password from an `Authorization: Basic` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

/// Parses `Basic <base64(user:password)>`. The scheme name is matched
/// case-insensitively.
pub fn parse_basic_credentials(header: &str) -> Option<BasicCredentials> {
    let (scheme, encoded) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }

    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    if username.is_empty() {
        return None;
    }

    Some(BasicCredentials {
        username: username.to_string(),
        password: password.to_string(),
    })
}

/// Rejects requests without valid basic auth credentials and stores the
/// [`crate::models::AuthenticatedUser`] in the request extensions.
pub async fn require_basic_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let credentials = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(parse_basic_credentials)
        .ok_or_else(|| AppError::Unauthorized("Authentication required".to_string()))?;

    let mut conn = state.pool.acquire().await?;
    let user = UserService
        .authenticate(&mut conn, &credentials.username, &credentials.password)
        .await?;
    drop(conn);

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}
