//! Password hashing, session tokens, and password-reset tokens.

use std::sync::OnceLock;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use tandem_types::api::Claims;

pub const MIN_PASSWORD_LEN: usize = 6;
pub const SESSION_TTL_DAYS: i64 = 7;
pub const RESET_TOKEN_TTL_MINUTES: i64 = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("token expired")]
    Expired,
    #[error("invalid token")]
    Invalid,
    #[error("invalid or expired reset token")]
    InvalidOrExpired,
    #[error("password hashing failed: {0}")]
    Hash(String),
}

// -- Passwords --

/// Argon2id with a fresh random salt, PHC string output.
pub fn hash_password(plaintext: &str) -> Result<String, CredentialError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(plaintext.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| CredentialError::Hash(e.to_string()))
}

pub fn verify_password(plaintext: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(plaintext.as_bytes(), &parsed)
        .is_ok()
}

/// Burns one verification against a fixed hash so a login for an unknown
/// email costs the same as one with a wrong password.
pub fn verify_against_dummy(plaintext: &str) {
    static DUMMY: OnceLock<Option<String>> = OnceLock::new();
    if let Some(hash) = DUMMY.get_or_init(|| hash_password("tandem-dummy-password").ok()) {
        let _ = verify_password(plaintext, hash);
    }
}

// -- Session tokens --

/// HS256 session tokens binding an account id.
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl TokenService {
    pub fn new(secret: &str) -> Self {
        Self::with_ttl(secret, Duration::days(SESSION_TTL_DAYS))
    }

    pub fn with_ttl(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    pub fn issue(&self, account_id: Uuid) -> Result<String, CredentialError> {
        let now = Utc::now();
        let claims = Claims {
            sub: account_id,
            iat: now.timestamp().max(0) as usize,
            exp: (now + self.ttl).timestamp().max(0) as usize,
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| CredentialError::Hash(e.to_string()))
    }

    /// Expired tokens are reported separately from every other failure;
    /// the underlying decode error is never surfaced.
    pub fn verify(&self, token: &str) -> Result<Uuid, CredentialError> {
        decode::<Claims>(token, &self.decoding, &Validation::default())
            .map(|data| data.claims.sub)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => CredentialError::Expired,
                _ => CredentialError::Invalid,
            })
    }
}

// -- Reset tokens --

/// A freshly minted reset token. `plaintext` goes into the email and is
/// never stored; only `hash` is persisted.
pub struct ResetToken {
    pub plaintext: String,
    pub hash: String,
    pub expires_at: DateTime<Utc>,
}

pub fn issue_reset_token(now: DateTime<Utc>) -> ResetToken {
    let bytes: [u8; 32] = rand::random();
    let plaintext = hex::encode(bytes);
    let hash = hash_reset_token(&plaintext);
    ResetToken {
        plaintext,
        hash,
        expires_at: now + Duration::minutes(RESET_TOKEN_TTL_MINUTES),
    }
}

pub fn hash_reset_token(plaintext: &str) -> String {
    hex::encode(Sha256::digest(plaintext.as_bytes()))
}

/// Matches a presented token against the stored hash and expiry. Missing,
/// mismatched and expired tokens all fail the same way.
pub fn verify_reset_token(
    plaintext: &str,
    stored_hash: Option<&str>,
    expires_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<(), CredentialError> {
    match (stored_hash, expires_at) {
        (Some(hash), Some(expires)) if hash == hash_reset_token(plaintext) && expires > now => Ok(()),
        _ => Err(CredentialError::InvalidOrExpired),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_roundtrip() {
        let hash = hash_password("secret1").unwrap();
        assert_ne!(hash, "secret1");
        assert!(verify_password("secret1", &hash));
        assert!(!verify_password("secret2", &hash));
    }

    #[test]
    fn garbage_hash_never_verifies() {
        assert!(!verify_password("secret1", "not-a-phc-string"));
    }

    #[test]
    fn session_token_binds_account() {
        let tokens = TokenService::new("test-secret");
        let id = Uuid::new_v4();
        let token = tokens.issue(id).unwrap();
        assert_eq!(tokens.verify(&token).unwrap(), id);
    }

    #[test]
    fn expired_and_forged_tokens_are_distinguished() {
        let expired = TokenService::with_ttl("test-secret", Duration::hours(-2));
        let token = expired.issue(Uuid::new_v4()).unwrap();
        let verifier = TokenService::new("test-secret");
        assert_eq!(verifier.verify(&token), Err(CredentialError::Expired));

        let other = TokenService::new("other-secret");
        let forged = other.issue(Uuid::new_v4()).unwrap();
        assert_eq!(verifier.verify(&forged), Err(CredentialError::Invalid));
        assert_eq!(verifier.verify("not.a.jwt"), Err(CredentialError::Invalid));
    }

    #[test]
    fn reset_token_plaintext_is_not_the_hash() {
        let now = Utc::now();
        let token = issue_reset_token(now);
        assert_eq!(token.plaintext.len(), 64);
        assert_ne!(token.plaintext, token.hash);
        assert_eq!(token.hash, hash_reset_token(&token.plaintext));
        assert_eq!(token.expires_at, now + Duration::minutes(10));
    }

    #[test]
    fn reset_token_verification() {
        let now = Utc::now();
        let token = issue_reset_token(now);

        assert!(verify_reset_token(&token.plaintext, Some(&token.hash), Some(token.expires_at), now).is_ok());
        assert_eq!(
            verify_reset_token("wrong", Some(&token.hash), Some(token.expires_at), now),
            Err(CredentialError::InvalidOrExpired)
        );
        assert_eq!(
            verify_reset_token(&token.plaintext, Some(&token.hash), Some(token.expires_at), token.expires_at),
            Err(CredentialError::InvalidOrExpired)
        );
        assert_eq!(
            verify_reset_token(&token.plaintext, None, None, now),
            Err(CredentialError::InvalidOrExpired)
        );
    }
}
