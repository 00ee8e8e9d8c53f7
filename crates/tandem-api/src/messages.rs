use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};

use tandem_types::api::{
    ChatTokenResponse, MessagesQuery, MessagesResponse, SaveMessageRequest, SaveMessageResponse,
};
use tandem_types::models::{Conversation, User};

use crate::error::ApiError;
use crate::{ApiJson, AppState, blocking};

pub async fn save_message(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    ApiJson(req): ApiJson<SaveMessageRequest>,
) -> Result<(StatusCode, Json<SaveMessageResponse>), ApiError> {
    let mirror = state.mirror.clone();
    let saved = blocking(move || mirror.save_message(user.id, req)).await?;
    Ok((StatusCode::CREATED, Json(saved)))
}

pub async fn conversations(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<Vec<Conversation>>, ApiError> {
    let mirror = state.mirror.clone();
    Ok(Json(blocking(move || mirror.conversations(user.id)).await?))
}

pub async fn get_messages(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(other): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<MessagesResponse>, ApiError> {
    let mirror = state.mirror.clone();
    Ok(Json(blocking(move || mirror.messages(user.id, &other, &query)).await?))
}

/// Client token for connecting to the chat platform as the current user.
pub async fn chat_token(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<ChatTokenResponse>, ApiError> {
    let token = state
        .collab
        .chat
        .user_token(&user.id.to_string())
        .await
        .map_err(ApiError::Dependency)?;
    Ok(Json(ChatTokenResponse { token }))
}
