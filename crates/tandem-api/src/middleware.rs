use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use tracing::warn;

use crate::error::ApiError;
use crate::settings::SESSION_COOKIE;
use crate::{AppState, blocking};

/// Session token from the cookie, falling back to an `Authorization: Bearer` header.
fn session_token(jar: &CookieJar, req: &Request) -> Option<String> {
    if let Some(cookie) = jar.get(SESSION_COOKIE).filter(|c| !c.value().is_empty()) {
        return Some(cookie.value().to_string());
    }
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
}

/// Resolves the session to a `User` (credentials stripped) and attaches it
/// as a request extension.
pub async fn require_auth(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = session_token(&jar, &req).ok_or(ApiError::Unauthorized("Unauthorized - No token provided"))?;

    let account_id = state.directory.tokens().verify(&token).map_err(|e| {
        warn!("Rejected session token: {}", e);
        ApiError::from(e)
    })?;

    let directory = state.directory.clone();
    let user = blocking(move || directory.load_user(&account_id.to_string()))
        .await?
        .ok_or(ApiError::Unauthorized("Unauthorized - User not found"))?;

    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}
