use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};

use tandem_types::api::{
    CallRatingRequest, FriendRequestsResponse, StickerPackStatus, StickerUpdateResponse,
    UserRatingResponse,
};
use tandem_types::models::{CallRating, FriendRequest, FriendRequestView, PublicProfile, User};

use crate::error::ApiError;
use crate::{ApiJson, AppState, blocking};

pub async fn recommended(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<Vec<PublicProfile>>, ApiError> {
    let directory = state.directory.clone();
    Ok(Json(blocking(move || directory.recommended_users(user.id)).await?))
}

pub async fn friends(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<Vec<PublicProfile>>, ApiError> {
    let directory = state.directory.clone();
    Ok(Json(blocking(move || directory.friends(user.id)).await?))
}

pub async fn send_friend_request(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(recipient): Path<String>,
) -> Result<(StatusCode, Json<FriendRequest>), ApiError> {
    let directory = state.directory.clone();
    let request = blocking(move || directory.send_friend_request(user.id, &recipient)).await?;
    Ok((StatusCode::CREATED, Json(request)))
}

pub async fn accept_friend_request(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(request_id): Path<String>,
) -> Result<Json<FriendRequest>, ApiError> {
    let directory = state.directory.clone();
    Ok(Json(blocking(move || directory.accept_friend_request(user.id, &request_id)).await?))
}

pub async fn friend_requests(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<FriendRequestsResponse>, ApiError> {
    let directory = state.directory.clone();
    Ok(Json(blocking(move || directory.friend_requests(user.id)).await?))
}

pub async fn outgoing_friend_requests(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<Vec<FriendRequestView>>, ApiError> {
    let directory = state.directory.clone();
    Ok(Json(blocking(move || directory.outgoing_friend_requests(user.id)).await?))
}

// -- Call ratings --

pub async fn rate_call(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    ApiJson(req): ApiJson<CallRatingRequest>,
) -> Result<(StatusCode, Json<CallRating>), ApiError> {
    let directory = state.directory.clone();
    let rating = blocking(move || directory.rate_call(user.id, req)).await?;
    Ok((StatusCode::CREATED, Json(rating)))
}

pub async fn user_rating(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<UserRatingResponse>, ApiError> {
    let directory = state.directory.clone();
    Ok(Json(blocking(move || directory.rating_summary(&user_id)).await?))
}

// -- Stickers --

pub async fn sticker_catalog(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Json<Vec<StickerPackStatus>> {
    Json(state.directory.sticker_catalog(&user))
}

pub async fn download_sticker_pack(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(pack_id): Path<String>,
) -> Result<Json<StickerUpdateResponse>, ApiError> {
    let directory = state.directory.clone();
    let user = blocking(move || directory.download_sticker_pack(user.id, &pack_id)).await?;
    Ok(Json(StickerUpdateResponse {
        message: "Pack downloaded successfully",
        user,
    }))
}

pub async fn remove_sticker_pack(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(pack_id): Path<String>,
) -> Result<Json<StickerUpdateResponse>, ApiError> {
    let directory = state.directory.clone();
    let user = blocking(move || directory.remove_sticker_pack(user.id, &pack_id)).await?;
    Ok(Json(StickerUpdateResponse {
        message: "Pack removed successfully",
        user,
    }))
}
