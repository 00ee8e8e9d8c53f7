//! External collaborators: chat platform, email delivery, identity provider.
//!
//! Each is a trait object so the router can be driven with in-process fakes.
//! The `Disabled*` implementations are wired when the matching credentials are
//! absent from the environment.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use jsonwebtoken::{EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

// -- Chat platform --

/// Identity mirrored onto the chat platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatUser {
    pub id: String,
    pub name: String,
    pub image: String,
}

#[async_trait::async_trait]
pub trait ChatPlatform: Send + Sync {
    async fn upsert_user(&self, user: &ChatUser) -> Result<()>;

    /// Client token that lets `user_id` connect to the platform directly.
    async fn user_token(&self, user_id: &str) -> Result<String>;
}

const STREAM_BASE_URL: &str = "https://chat.stream-io-api.com";

/// Stream Chat server-side client.
pub struct StreamChat {
    http: reqwest::Client,
    api_key: String,
    key: EncodingKey,
}

impl StreamChat {
    pub fn new(http: reqwest::Client, api_key: String, api_secret: &str) -> Self {
        Self {
            http,
            api_key,
            key: EncodingKey::from_secret(api_secret.as_bytes()),
        }
    }

    fn server_token(&self) -> Result<String> {
        encode(&Header::default(), &json!({ "server": true }), &self.key)
            .context("failed to sign chat server token")
    }
}

#[async_trait::async_trait]
impl ChatPlatform for StreamChat {
    async fn upsert_user(&self, user: &ChatUser) -> Result<()> {
        let body = json!({
            "users": {
                &user.id: { "id": user.id, "name": user.name, "image": user.image }
            }
        });

        let resp = self
            .http
            .post(format!("{}/users", STREAM_BASE_URL))
            .query(&[("api_key", self.api_key.as_str())])
            .header("Authorization", self.server_token()?)
            .header("Stream-Auth-Type", "jwt")
            .json(&body)
            .send()
            .await
            .context("chat upsert request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("chat upsert returned {}: {}", status, text);
        }
        debug!("Chat user {} upserted", user.id);
        Ok(())
    }

    async fn user_token(&self, user_id: &str) -> Result<String> {
        encode(&Header::default(), &json!({ "user_id": user_id }), &self.key)
            .context("failed to sign chat user token")
    }
}

pub struct DisabledChat;

#[async_trait::async_trait]
impl ChatPlatform for DisabledChat {
    async fn upsert_user(&self, user: &ChatUser) -> Result<()> {
        debug!("Chat sync disabled, skipping {}", user.id);
        Ok(())
    }

    async fn user_token(&self, _user_id: &str) -> Result<String> {
        Err(anyhow!("chat platform is not configured"))
    }
}

// -- Email --

#[derive(Debug, Clone)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[async_trait::async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &Email) -> Result<()>;
}

/// Transactional mail over a JSON HTTP API with bearer auth.
pub struct HttpMailer {
    http: reqwest::Client,
    url: String,
    api_key: String,
    from: String,
}

impl HttpMailer {
    pub fn new(http: reqwest::Client, url: String, api_key: String, from: String) -> Self {
        Self {
            http,
            url,
            api_key,
            from,
        }
    }
}

#[async_trait::async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, email: &Email) -> Result<()> {
        let resp = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "from": self.from,
                "to": email.to,
                "subject": email.subject,
                "html": email.html,
            }))
            .send()
            .await
            .context("mail request failed")?;

        let status = resp.status();
        if !status.is_success() {
            bail!("mail API returned {}", status);
        }
        Ok(())
    }
}

/// Refuses every send, so reset tokens are cleared right away.
pub struct DisabledMailer;

#[async_trait::async_trait]
impl Mailer for DisabledMailer {
    async fn send(&self, _email: &Email) -> Result<()> {
        Err(anyhow!("mail delivery is not configured"))
    }
}

// -- Identity provider --

/// The three fields read from a provider profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    pub email: String,
    pub name: Option<String>,
    pub picture: Option<String>,
}

#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Where to send the browser to begin the handshake.
    fn authorize_url(&self, state: &str) -> Result<String>;

    /// Trades an authorization code for the signed-in user's profile.
    async fn exchange_code(&self, code: &str) -> Result<ProviderProfile>;
}

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";

pub struct GoogleProvider {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    callback_url: String,
}

impl GoogleProvider {
    pub fn new(http: reqwest::Client, client_id: String, client_secret: String, callback_url: String) -> Self {
        Self {
            http,
            client_id,
            client_secret,
            callback_url,
        }
    }
}

#[derive(Deserialize)]
struct GoogleToken {
    access_token: String,
}

#[derive(Deserialize)]
struct GoogleUserInfo {
    email: Option<String>,
    #[serde(default)]
    email_verified: Option<bool>,
    name: Option<String>,
    picture: Option<String>,
}

#[derive(Serialize)]
struct TokenForm<'a> {
    code: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
    redirect_uri: &'a str,
    grant_type: &'a str,
}

#[async_trait::async_trait]
impl IdentityProvider for GoogleProvider {
    fn authorize_url(&self, state: &str) -> Result<String> {
        let url = reqwest::Url::parse_with_params(
            GOOGLE_AUTH_URL,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.callback_url.as_str()),
                ("response_type", "code"),
                ("scope", "openid email profile"),
                ("state", state),
            ],
        )?;
        Ok(url.into())
    }

    async fn exchange_code(&self, code: &str) -> Result<ProviderProfile> {
        let token: GoogleToken = self
            .http
            .post(GOOGLE_TOKEN_URL)
            .form(&TokenForm {
                code,
                client_id: &self.client_id,
                client_secret: &self.client_secret,
                redirect_uri: &self.callback_url,
                grant_type: "authorization_code",
            })
            .send()
            .await?
            .error_for_status()
            .context("token exchange rejected")?
            .json()
            .await?;

        let info: GoogleUserInfo = self
            .http
            .get(GOOGLE_USERINFO_URL)
            .bearer_auth(&token.access_token)
            .send()
            .await?
            .error_for_status()
            .context("userinfo request rejected")?
            .json()
            .await?;

        if info.email_verified == Some(false) {
            bail!("provider email is not verified");
        }
        let email = info.email.context("provider profile has no email")?;

        Ok(ProviderProfile {
            email,
            name: info.name,
            picture: info.picture,
        })
    }
}

pub struct DisabledProvider;

#[async_trait::async_trait]
impl IdentityProvider for DisabledProvider {
    fn authorize_url(&self, _state: &str) -> Result<String> {
        Err(anyhow!("identity provider is not configured"))
    }

    async fn exchange_code(&self, _code: &str) -> Result<ProviderProfile> {
        Err(anyhow!("identity provider is not configured"))
    }
}

// -- Wiring --

#[derive(Clone)]
pub struct Collaborators {
    pub chat: Arc<dyn ChatPlatform>,
    pub mailer: Arc<dyn Mailer>,
    pub identity: Arc<dyn IdentityProvider>,
}

impl Collaborators {
    pub fn disabled() -> Self {
        Self {
            chat: Arc::new(DisabledChat),
            mailer: Arc::new(DisabledMailer),
            identity: Arc::new(DisabledProvider),
        }
    }
}

/// Awaits a side effect whose failure must not fail the caller. The error is
/// logged and dropped.
pub async fn best_effort<F>(label: &str, fut: F)
where
    F: Future<Output = Result<()>>,
{
    if let Err(e) = fut.await {
        warn!("{} failed: {:#}", label, e);
    }
}
