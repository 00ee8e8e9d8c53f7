//! User Directory: accounts, onboarding, password reset, the social graph,
//! sticker claims and call ratings.
//!
//! Methods are synchronous (SQLite plus argon2); handlers run them through
//! [`crate::blocking`].

mod ratings;
mod social;
mod stickers;

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use tandem_db::Database;
use tandem_db::models::{NewAccount, ProfileUpdate};
use tandem_types::api::{LoginRequest, OnboardRequest, SignupRequest};
use tandem_types::models::User;

use crate::credentials::{
    self, CredentialError, MIN_PASSWORD_LEN, TokenService, hash_password, verify_against_dummy,
    verify_password,
};
use crate::error::ApiError;

const EMAIL_MAX: usize = 254;
const FULL_NAME_MAX: usize = 100;
const BIO_MAX: usize = 500;
const LANGUAGE_MAX: usize = 50;
const LOCATION_MAX: usize = 100;
const PROFILE_PIC_MAX: usize = 500;

const INVALID_CREDENTIALS: &str = "Invalid email or password";

/// A freshly authenticated account and its session token.
pub struct Session {
    pub user: User,
    pub token: String,
}

/// A reset token that still has to be delivered. The plaintext lives only
/// as long as this value.
pub struct PendingReset {
    pub account_id: String,
    pub email: String,
    pub token: String,
}

#[derive(Clone)]
pub struct Directory {
    db: Arc<Database>,
    tokens: Arc<TokenService>,
}

impl Directory {
    pub fn new(db: Arc<Database>, tokens: Arc<TokenService>) -> Self {
        Self { db, tokens }
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub(crate) fn db(&self) -> &Database {
        &self.db
    }

    // -- Accounts --

    pub fn signup(&self, req: SignupRequest) -> Result<Session, ApiError> {
        let email = req.email.as_deref().map(normalize_email).unwrap_or_default();
        let password = req.password.unwrap_or_default();
        let full_name = req.full_name.as_deref().map(str::trim).unwrap_or_default();

        if email.is_empty() || password.is_empty() || full_name.is_empty() {
            return Err(ApiError::validation("All fields are required"));
        }
        if !looks_like_email(&email) {
            return Err(ApiError::validation("Invalid email format"));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ApiError::validation("Password must be at least 6 characters"));
        }
        if self.db.get_account_by_email(&email)?.is_some() {
            return Err(ApiError::Conflict(DUPLICATE_EMAIL));
        }

        let password_hash = hash_password(&password)?;
        let id = Uuid::new_v4().to_string();
        let full_name = truncate(full_name, FULL_NAME_MAX);
        let avatar = default_avatar();

        self.db
            .create_account(&NewAccount {
                id: &id,
                email: &email,
                password_hash: Some(&password_hash),
                full_name: &full_name,
                profile_pic: &avatar,
            })
            .map_err(|e| {
                if tandem_db::is_unique_violation(&e) {
                    ApiError::Conflict(DUPLICATE_EMAIL)
                } else {
                    ApiError::Internal(e)
                }
            })?;

        info!("Account {} created", id);
        self.session_for(&id)
    }

    /// Unknown email and wrong password produce the same error, and cost
    /// one password verification each.
    pub fn login(&self, req: LoginRequest) -> Result<Session, ApiError> {
        let email = req.email.as_deref().map(normalize_email).unwrap_or_default();
        let password = req.password.unwrap_or_default();
        if email.is_empty() || password.is_empty() {
            return Err(ApiError::validation("All fields are required"));
        }

        let Some(account) = self.db.get_account_by_email(&email)? else {
            verify_against_dummy(&password);
            return Err(ApiError::Unauthorized(INVALID_CREDENTIALS));
        };

        // OAuth-only accounts carry no password hash.
        let verified = match account.password_hash.as_deref() {
            Some(hash) => verify_password(&password, hash),
            None => {
                verify_against_dummy(&password);
                false
            }
        };
        if !verified {
            warn!("Failed login for account {}", account.id);
            return Err(ApiError::Unauthorized(INVALID_CREDENTIALS));
        }

        self.session_for(&account.id)
    }

    /// Loads an account with friends and sticker claims attached.
    pub fn load_user(&self, id: &str) -> Result<Option<User>, ApiError> {
        let Some(row) = self.db.get_account_by_id(id)? else {
            return Ok(None);
        };
        let friends = self.db.friend_ids(id)?;
        let stickers = self.db.sticker_ids(id)?;
        Ok(Some(row.into_user(friends, stickers)))
    }

    pub(crate) fn require_user(&self, id: &str) -> Result<User, ApiError> {
        self.load_user(id)?
            .ok_or(ApiError::NotFound("User not found"))
    }

    pub(crate) fn session_for(&self, id: &str) -> Result<Session, ApiError> {
        let user = self.require_user(id)?;
        let token = self.tokens.issue(user.id)?;
        Ok(Session { user, token })
    }

    pub fn onboard(&self, account_id: Uuid, req: OnboardRequest) -> Result<User, ApiError> {
        let fields = [
            ("fullName", &req.full_name),
            ("bio", &req.bio),
            ("nativeLanguage", &req.native_language),
            ("learningLanguage", &req.learning_language),
            ("location", &req.location),
        ];
        let missing: Vec<String> = fields
            .iter()
            .filter(|(_, value)| present(value).is_none())
            .map(|(name, _)| name.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ApiError::Validation {
                message: "All fields are required".into(),
                missing_fields: missing,
            });
        }

        let full_name = truncate(present(&req.full_name).unwrap_or_default(), FULL_NAME_MAX);
        let bio = truncate(present(&req.bio).unwrap_or_default(), BIO_MAX);
        let native = truncate(present(&req.native_language).unwrap_or_default(), LANGUAGE_MAX);
        let learning = truncate(present(&req.learning_language).unwrap_or_default(), LANGUAGE_MAX);
        let location = truncate(present(&req.location).unwrap_or_default(), LOCATION_MAX);
        let profile_pic = present(&req.profile_pic).map(|p| truncate(p, PROFILE_PIC_MAX));

        let id = account_id.to_string();
        let updated = self.db.update_profile(
            &id,
            &ProfileUpdate {
                full_name: &full_name,
                bio: &bio,
                native_language: &native,
                learning_language: &learning,
                location: &location,
                profile_pic: profile_pic.as_deref(),
            },
        )?;
        if !updated {
            return Err(ApiError::NotFound("User not found"));
        }

        info!("Account {} onboarded", id);
        self.require_user(&id)
    }

    // -- Password reset --

    /// Stores a fresh reset token for `email` if such an account exists.
    /// A missing or unknown email is `None`, not an error: callers answer
    /// identically either way.
    pub fn begin_password_reset(&self, email: Option<&str>) -> Result<Option<PendingReset>, ApiError> {
        let email = email.map(normalize_email).unwrap_or_default();
        if email.is_empty() {
            return Ok(None);
        }

        let Some(account) = self.db.get_account_by_email(&email)? else {
            return Ok(None);
        };

        let reset = credentials::issue_reset_token(Utc::now());
        self.db.set_reset_token(&account.id, &reset.hash, reset.expires_at)?;

        Ok(Some(PendingReset {
            account_id: account.id,
            email: account.email,
            token: reset.plaintext,
        }))
    }

    /// Drops a reset token whose email could not be delivered.
    pub fn abandon_password_reset(&self, account_id: &str) -> Result<(), ApiError> {
        self.db.clear_reset_token(account_id)?;
        Ok(())
    }

    pub fn reset_password(&self, token: &str, password: Option<&str>) -> Result<(), ApiError> {
        let password = password.unwrap_or_default();
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ApiError::validation("Password must be at least 6 characters"));
        }

        let now = Utc::now();
        let token_hash = credentials::hash_reset_token(token);
        let account = self.db.get_account_by_reset_hash(&token_hash)?;
        let (stored, expires) = match &account {
            Some(row) => (
                row.reset_token_hash.as_deref(),
                row.reset_expires_at.as_deref().map(tandem_db::parse_ts),
            ),
            None => (None, None),
        };
        credentials::verify_reset_token(token, stored, expires, now)?;

        let new_hash = hash_password(password)?;
        // The conditional update also covers a concurrent reset with the same token.
        if !self.db.consume_reset_token(&token_hash, now, &new_hash)? {
            return Err(CredentialError::InvalidOrExpired.into());
        }

        if let Some(row) = account {
            info!("Password reset for account {}", row.id);
        }
        Ok(())
    }
}

const DUPLICATE_EMAIL: &str = "Email already exists, please use a different one";

/// A trimmed, non-empty value.
fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

pub(crate) fn truncate(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

pub(crate) fn normalize_email(raw: &str) -> String {
    truncate(&raw.trim().to_lowercase(), EMAIL_MAX)
}

/// `local@domain.tld` with no whitespace.
fn looks_like_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) => !host.is_empty() && !tld.is_empty(),
        None => false,
    }
}

pub(crate) fn default_avatar() -> String {
    let seed: u32 = rand::random_range(1..=100);
    format!("https://api.dicebear.com/7.x/avataaars/svg?seed={}", seed)
}

pub(crate) fn parse_user_id(raw: &str) -> Result<Uuid, ApiError> {
    raw.parse().map_err(|_| ApiError::validation("Invalid user id"))
}
