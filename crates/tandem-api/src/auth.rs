use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
};
use axum_extra::extract::cookie::CookieJar;
use serde_json::Value;
use tracing::{info, warn};

use tandem_types::api::{
    LoginRequest, OnboardRequest, ResetPasswordRequest, SignupRequest,
    StatusResponse, UserResponse,
};
use tandem_types::models::User;

use crate::collab::{ChatUser, Email, best_effort};
use crate::error::ApiError;
use crate::{ApiJson, AppState, blocking};

const RESET_SENT: &str = "If that email exists, a reset link has been sent.";

fn chat_user(user: &User) -> ChatUser {
    ChatUser {
        id: user.id.to_string(),
        name: user.full_name.clone(),
        image: user.profile_pic.clone(),
    }
}

pub async fn signup(
    State(state): State<AppState>,
    jar: CookieJar,
    ApiJson(req): ApiJson<SignupRequest>,
) -> Result<(StatusCode, CookieJar, Json<UserResponse>), ApiError> {
    let directory = state.directory.clone();
    let session = blocking(move || directory.signup(req)).await?;

    best_effort("chat user sync", state.collab.chat.upsert_user(&chat_user(&session.user))).await;

    let jar = jar.add(state.settings.session_cookie(session.token));
    Ok((
        StatusCode::CREATED,
        jar,
        Json(UserResponse {
            success: true,
            user: session.user,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<(CookieJar, Json<UserResponse>), ApiError> {
    let directory = state.directory.clone();
    let session = blocking(move || directory.login(req)).await?;

    let jar = jar.add(state.settings.session_cookie(session.token));
    Ok((
        jar,
        Json(UserResponse {
            success: true,
            user: session.user,
        }),
    ))
}

pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> (CookieJar, Json<StatusResponse>) {
    (
        jar.add(state.settings.expired_session_cookie()),
        Json(StatusResponse {
            success: true,
            message: "Logout successful".into(),
        }),
    )
}

pub async fn onboard(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    ApiJson(req): ApiJson<OnboardRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let directory = state.directory.clone();
    let updated = blocking(move || directory.onboard(user.id, req)).await?;

    best_effort("chat user sync", state.collab.chat.upsert_user(&chat_user(&updated))).await;

    Ok(Json(UserResponse {
        success: true,
        user: updated,
    }))
}

pub async fn me(Extension(user): Extension<User>) -> Json<UserResponse> {
    Json(UserResponse { success: true, user })
}

/// Always answers the same way: registered or not, well-formed body or not,
/// delivered or not. Failures are only logged.
pub async fn forgot_password(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Json<StatusResponse> {
    let email = requested_email(&body);
    let directory = state.directory.clone();
    let pending = match blocking(move || directory.begin_password_reset(email.as_deref())).await {
        Ok(pending) => pending,
        Err(e) => {
            warn!("Password reset lookup failed: {}", e);
            None
        }
    };

    if let Some(pending) = pending {
        let requested = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
        let origin = state.settings.resolve_origin(requested);
        let link = format!("{}/reset-password/{}", origin, pending.token);

        let email = Email {
            to: pending.email,
            subject: "Password Reset Request".into(),
            html: reset_email_html(&link),
        };

        if let Err(e) = state.collab.mailer.send(&email).await {
            warn!("Reset email for account {} not delivered: {:#}", pending.account_id, e);
            let directory = state.directory.clone();
            let account_id = pending.account_id;
            if let Err(e) = blocking(move || directory.abandon_password_reset(&account_id)).await {
                warn!("Undelivered reset token left in place: {}", e);
            }
        } else {
            info!("Reset email sent for account {}", pending.account_id);
        }
    }

    Json(StatusResponse {
        success: true,
        message: RESET_SENT.into(),
    })
}

/// The `email` string of a JSON body. Anything else reads as no email.
fn requested_email(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    value.get("email")?.as_str().map(String::from)
}

fn reset_email_html(link: &str) -> String {
    format!(
        "<h1>Password Reset Request</h1>\
         <p>Click the link below to reset your password. This link expires in 10 minutes.</p>\
         <a href=\"{link}\">{link}</a>\
         <p>If you did not request this, please ignore this email.</p>"
    )
}

pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    ApiJson(req): ApiJson<ResetPasswordRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let directory = state.directory.clone();
    blocking(move || directory.reset_password(&token, req.password.as_deref())).await?;

    Ok(Json(StatusResponse {
        success: true,
        message: "Password reset successful".into(),
    }))
}
