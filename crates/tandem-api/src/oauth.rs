//! OAuth Bridge: turns a verified provider profile into a local account and
//! session, plus the two HTTP legs of the provider handshake.

use axum::{
    extract::{Query, State},
    response::Redirect,
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use tandem_db::models::NewAccount;

use crate::collab::{ChatUser, ProviderProfile, best_effort};
use crate::directory::{Directory, Session, default_avatar, normalize_email, truncate};
use crate::error::ApiError;
use crate::settings::OAUTH_STATE_COOKIE;
use crate::{AppState, blocking};

const NAME_MAX: usize = 100;
const PICTURE_MAX: usize = 500;

/// The session produced by a provider sign-in.
pub struct OAuthLogin {
    pub session: Session,
    /// A local account was created for this profile.
    pub created: bool,
}

#[derive(Clone)]
pub struct OAuthBridge {
    directory: Directory,
}

impl OAuthBridge {
    pub fn new(directory: Directory) -> Self {
        Self { directory }
    }

    /// Signs in the account registered under the profile's email, creating
    /// one on first sight. Provider-specific parsing stays in the
    /// `IdentityProvider`; this only sees the normalized profile.
    pub fn exchange_profile_for_account(&self, profile: &ProviderProfile) -> Result<OAuthLogin, ApiError> {
        let email = normalize_email(&profile.email);
        if email.is_empty() {
            return Err(ApiError::validation("Provider profile has no email"));
        }

        let db = self.directory.db();
        if let Some(existing) = db.get_account_by_email(&email)? {
            return Ok(OAuthLogin {
                session: self.directory.session_for(&existing.id)?,
                created: false,
            });
        }

        let full_name = profile
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(|n| truncate(n, NAME_MAX))
            .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());
        let picture = profile
            .picture
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(|p| truncate(p, PICTURE_MAX))
            .unwrap_or_else(default_avatar);

        let id = Uuid::new_v4().to_string();
        let created = db.create_account(&NewAccount {
            id: &id,
            email: &email,
            password_hash: None,
            full_name: &full_name,
            profile_pic: &picture,
        });

        match created {
            Ok(()) => {
                info!("Account {} created from provider profile", id);
                Ok(OAuthLogin {
                    session: self.directory.session_for(&id)?,
                    created: true,
                })
            }
            // Lost a race with a concurrent first sign-in for the same email.
            Err(e) if tandem_db::is_unique_violation(&e) => {
                let existing = db
                    .get_account_by_email(&email)?
                    .ok_or_else(|| ApiError::Internal(e.context("account vanished after email conflict")))?;
                Ok(OAuthLogin {
                    session: self.directory.session_for(&existing.id)?,
                    created: false,
                })
            }
            Err(e) => Err(ApiError::Internal(e)),
        }
    }
}

// -- Transport --

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartQuery {
    pub return_to: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

fn failure_redirect(origin: &str) -> Redirect {
    Redirect::to(&format!("{}/login?error=GoogleAuthFailed", origin))
}

/// Redirects to the provider. The anti-forgery state and the validated
/// return origin ride along in a short-lived cookie.
pub async fn google_start(
    State(state): State<AppState>,
    Query(query): Query<StartQuery>,
    jar: CookieJar,
) -> (CookieJar, Redirect) {
    let origin = state.settings.resolve_origin(query.return_to.as_deref());
    let nonce = hex::encode(rand::random::<[u8; 16]>());

    match state.collab.identity.authorize_url(&nonce) {
        Ok(url) => {
            let cookie = state.settings.oauth_state_cookie(format!("{}|{}", nonce, origin));
            (jar.add(cookie), Redirect::to(&url))
        }
        Err(e) => {
            warn!("Cannot start provider sign-in: {:#}", e);
            (jar, failure_redirect(&origin))
        }
    }
}

/// Completes the handshake. The session token is only ever set as a cookie;
/// the redirect carries nothing but the client origin.
pub async fn google_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
    jar: CookieJar,
) -> (CookieJar, Redirect) {
    let stored = jar.get(OAUTH_STATE_COOKIE).map(|c| c.value().to_string());
    let jar = jar.add(state.settings.expired_oauth_state_cookie());

    let (expected, origin) = match stored.as_deref().and_then(|v| v.split_once('|')) {
        Some((nonce, origin)) => (Some(nonce.to_string()), state.settings.resolve_origin(Some(origin))),
        None => (None, state.settings.resolve_origin(None)),
    };

    if let Some(err) = &query.error {
        warn!("Provider returned error: {}", err);
        return (jar, failure_redirect(&origin));
    }
    let (Some(code), Some(expected)) = (query.code.as_deref(), expected) else {
        warn!("Provider callback without code or state cookie");
        return (jar, failure_redirect(&origin));
    };
    if query.state.as_deref() != Some(expected.as_str()) {
        warn!("Provider callback state mismatch");
        return (jar, failure_redirect(&origin));
    }

    let profile = match state.collab.identity.exchange_code(code).await {
        Ok(profile) => profile,
        Err(e) => {
            warn!("Provider code exchange failed: {:#}", e);
            return (jar, failure_redirect(&origin));
        }
    };

    let bridge = state.oauth.clone();
    let login = match blocking(move || bridge.exchange_profile_for_account(&profile)).await {
        Ok(login) => login,
        Err(e) => {
            warn!("Provider sign-in failed: {}", e);
            return (jar, failure_redirect(&origin));
        }
    };

    if login.created {
        let user = &login.session.user;
        best_effort(
            "chat user sync",
            state.collab.chat.upsert_user(&ChatUser {
                id: user.id.to_string(),
                name: user.full_name.clone(),
                image: user.profile_pic.clone(),
            }),
        )
        .await;
    }

    let jar = jar.add(state.settings.session_cookie(login.session.token));
    (jar, Redirect::to(&origin))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tandem_db::Database;

    use super::*;
    use crate::credentials::TokenService;

    fn bridge() -> OAuthBridge {
        let db = Arc::new(Database::open_in_memory().unwrap());
        OAuthBridge::new(Directory::new(db, Arc::new(TokenService::new("test-secret"))))
    }

    fn profile(email: &str) -> ProviderProfile {
        ProviderProfile {
            email: email.into(),
            name: Some("Ana Lima".into()),
            picture: None,
        }
    }

    #[test]
    fn first_sign_in_creates_then_reuses_account() {
        let bridge = bridge();

        let first = bridge.exchange_profile_for_account(&profile("Ana@X.com")).unwrap();
        assert!(first.created);
        assert_eq!(first.session.user.email, "ana@x.com");
        assert_eq!(first.session.user.full_name, "Ana Lima");
        assert!(first.session.user.profile_pic.starts_with("https://api.dicebear.com/"));

        let second = bridge.exchange_profile_for_account(&profile("ana@x.com")).unwrap();
        assert!(!second.created);
        assert_eq!(second.session.user.id, first.session.user.id);
    }

    #[test]
    fn provider_picture_is_kept() {
        let bridge = bridge();
        let mut p = profile("b@x.com");
        p.picture = Some("https://lh3.example.com/me.jpg".into());
        p.name = None;

        let login = bridge.exchange_profile_for_account(&p).unwrap();
        assert_eq!(login.session.user.profile_pic, "https://lh3.example.com/me.jpg");
        assert_eq!(login.session.user.full_name, "b");
    }
}
