pub mod auth;
pub mod collab;
pub mod credentials;
pub mod directory;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod mirror;
pub mod oauth;
pub mod rate_limit;
pub mod settings;
pub mod users;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::FromRequest,
    http::{HeaderValue, Method, header},
    middleware::from_fn_with_state,
    routing::{delete, get, post, put},
};
use serde_json::{Value, json};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use tandem_db::Database;

use crate::collab::Collaborators;
use crate::credentials::TokenService;
use crate::directory::Directory;
use crate::error::ApiError;
use crate::mirror::MessageMirror;
use crate::oauth::OAuthBridge;
use crate::rate_limit::{RateLimiter, RouteClass};
use crate::settings::ApiSettings;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub directory: Directory,
    pub mirror: MessageMirror,
    pub oauth: OAuthBridge,
    pub collab: Collaborators,
    pub settings: ApiSettings,
    pub limiter: RateLimiter,
}

impl AppStateInner {
    pub fn new(db: Arc<Database>, tokens: TokenService, collab: Collaborators, settings: ApiSettings) -> AppState {
        let directory = Directory::new(db.clone(), Arc::new(tokens));
        Arc::new(Self {
            mirror: MessageMirror::new(db),
            oauth: OAuthBridge::new(directory.clone()),
            directory,
            collab,
            limiter: RateLimiter::new(settings.rate_limits.clone()),
            settings,
        })
    }
}

/// JSON body extractor whose rejection is an [`ApiError`], so malformed
/// bodies get the same `{"message"}` shape as every other failure.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// Runs synchronous store and hashing work off the async executor.
pub(crate) async fn blocking<F, T>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("blocking task failed: {}", e)))?
}

async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

fn cors(settings: &ApiSettings) -> CorsLayer {
    let origins: Vec<HeaderValue> = settings
        .allowed_origins
        .iter()
        .filter_map(|o| match o.trim_end_matches('/').parse() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("Ignoring unparsable CORS origin '{}'", o);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

pub fn build_router(state: AppState) -> Router {
    let limit = |class: RouteClass| from_fn_with_state((state.clone(), class), rate_limit::enforce);

    let auth_strict = Router::new()
        .route("/api/auth/signup", post(auth::signup))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/forgot-password", post(auth::forgot_password))
        .route("/api/auth/reset-password/{token}", post(auth::reset_password))
        .route_layer(limit(RouteClass::AuthStrict));

    let oauth_routes = Router::new()
        .route("/api/auth/google", get(oauth::google_start))
        .route("/api/auth/google/callback", get(oauth::google_callback))
        .route_layer(limit(RouteClass::OAuth));

    let public = Router::new()
        .route("/api/auth/logout", post(auth::logout))
        .route_layer(limit(RouteClass::General));

    // Auth sits inside the limiter, so rejected sessions count as failures.
    let protected = Router::new()
        .route("/api/auth/onboarding", post(auth::onboard))
        .route("/api/auth/me", get(auth::me))
        .route("/api/users", get(users::recommended))
        .route("/api/users/friends", get(users::friends))
        .route("/api/users/friend-request/{id}", post(users::send_friend_request))
        .route("/api/users/friend-request/{id}/accept", put(users::accept_friend_request))
        .route("/api/users/friend-requests", get(users::friend_requests))
        .route("/api/users/outgoing-friend-requests", get(users::outgoing_friend_requests))
        .route("/api/users/call-rating", post(users::rate_call))
        .route("/api/users/call-rating/{user_id}", get(users::user_rating))
        .route("/api/users/stickers", get(users::sticker_catalog))
        .route("/api/users/stickers/{pack_id}/download", post(users::download_sticker_pack))
        .route("/api/users/stickers/{pack_id}/remove", delete(users::remove_sticker_pack))
        .route("/api/messages", post(messages::save_message))
        .route("/api/messages/conversations", get(messages::conversations))
        .route("/api/messages/{user_id}", get(messages::get_messages))
        .route("/api/chat/token", get(messages::chat_token))
        .route_layer(from_fn_with_state(state.clone(), middleware::require_auth))
        .route_layer(limit(RouteClass::General));

    Router::new()
        .route("/health", get(health))
        .merge(auth_strict)
        .merge(oauth_routes)
        .merge(public)
        .merge(protected)
        .layer(cors(&state.settings))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
