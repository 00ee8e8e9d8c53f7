use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{FriendRequestView, Message, StickerPack, User};

// -- JWT Claims --

/// Session token claims. Only the account id is bound; everything else is
/// loaded fresh from the directory on each request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub iat: usize,
    pub exp: usize,
}

// -- Auth --

// Request fields are optional so that missing input yields our own
// validation error instead of a deserialization rejection.

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub full_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardRequest {
    pub full_name: Option<String>,
    pub bio: Option<String>,
    pub native_language: Option<String>,
    pub learning_language: Option<String>,
    pub location: Option<String>,
    pub profile_pic: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResetPasswordRequest {
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub success: bool,
    pub user: User,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub success: bool,
    pub message: String,
}

// -- Social --

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequestsResponse {
    pub incoming_reqs: Vec<FriendRequestView>,
    pub accepted_reqs: Vec<FriendRequestView>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRatingRequest {
    pub call_id: Option<String>,
    pub rated_user_id: Option<String>,
    pub rating: Option<serde_json::Value>,
    pub call_type: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRatingResponse {
    pub user_id: Uuid,
    pub average_rating: f64,
    pub total_ratings: u32,
}

#[derive(Debug, Serialize)]
pub struct StickerUpdateResponse {
    pub message: &'static str,
    pub user: User,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StickerPackStatus {
    #[serde(flatten)]
    pub pack: StickerPack,
    pub is_downloaded: bool,
}

// -- Messages --

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveMessageRequest {
    pub receiver_id: Option<String>,
    pub content: Option<String>,
    pub message_type: Option<String>,
    pub stream_msg_id: Option<String>,
}

/// Query string of the message history endpoint. Both fields are read
/// leniently, so they stay strings here.
#[derive(Debug, Default, Deserialize)]
pub struct MessagesQuery {
    pub limit: Option<String>,
    pub before: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveMessageResponse {
    pub message: Message,
    pub conversation_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesResponse {
    pub messages: Vec<Message>,
    pub conversation_id: Option<Uuid>,
}

// -- Chat platform --

#[derive(Debug, Serialize)]
pub struct ChatTokenResponse {
    pub token: String,
}
