use std::path::PathBuf;

use anyhow::{Context, Result, bail};

use tandem_api::rate_limit::RateLimitConfig;
use tandem_api::settings::ApiSettings;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "your-secret-key",
    "secret",
];

pub struct StreamConfig {
    pub api_key: String,
    pub api_secret: String,
}

pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    pub callback_url: String,
}

pub struct MailConfig {
    pub api_url: String,
    pub api_key: String,
    pub from: String,
}

pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub api: ApiSettings,
    pub stream: Option<StreamConfig>,
    pub google: Option<GoogleConfig>,
    pub mail: Option<MailConfig>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let jwt_secret = var("TANDEM_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("TANDEM_JWT_SECRET is unset or still a placeholder");
        }

        let db_path: PathBuf = var("TANDEM_DB_PATH").unwrap_or_else(|| "tandem.db".into()).into();
        let host = var("TANDEM_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = var("TANDEM_PORT")
            .unwrap_or_else(|| "5001".into())
            .parse()
            .context("TANDEM_PORT must be a port number")?;

        let client_url = var("TANDEM_CLIENT_URL")
            .unwrap_or_else(|| "http://localhost:5173".into())
            .trim_end_matches('/')
            .to_string();
        let mut allowed_origins: Vec<String> = var("TANDEM_ALLOWED_ORIGINS")
            .map(|list| {
                list.split(',')
                    .map(|o| o.trim().trim_end_matches('/').to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        if !allowed_origins.contains(&client_url) {
            allowed_origins.push(client_url.clone());
        }

        let mut rate_limits = RateLimitConfig::default();
        if let Some(max) = parse_limit(var("TANDEM_RATE_AUTH_MAX"), "TANDEM_RATE_AUTH_MAX")? {
            rate_limits.auth_strict.limit = max;
        }
        if let Some(max) = parse_limit(var("TANDEM_RATE_OAUTH_MAX"), "TANDEM_RATE_OAUTH_MAX")? {
            rate_limits.oauth.limit = max;
        }
        if let Some(max) = parse_limit(var("TANDEM_RATE_API_MAX"), "TANDEM_RATE_API_MAX")? {
            rate_limits.general.limit = max;
        }

        let api = ApiSettings {
            cookie_secure: parse_flag(var("TANDEM_COOKIE_SECURE")),
            allowed_origins,
            client_url,
            rate_limits,
            trust_proxy: parse_flag(var("TANDEM_TRUST_PROXY")),
        };

        let stream = match (var("STREAM_API_KEY"), var("STREAM_API_SECRET")) {
            (Some(api_key), Some(api_secret)) => Some(StreamConfig { api_key, api_secret }),
            _ => None,
        };
        let google = match (var("GOOGLE_CLIENT_ID"), var("GOOGLE_CLIENT_SECRET"), var("GOOGLE_CALLBACK_URL")) {
            (Some(client_id), Some(client_secret), Some(callback_url)) => Some(GoogleConfig {
                client_id,
                client_secret,
                callback_url,
            }),
            _ => None,
        };
        let mail = match (var("MAIL_API_URL"), var("MAIL_API_KEY"), var("MAIL_FROM")) {
            (Some(api_url), Some(api_key), Some(from)) => Some(MailConfig { api_url, api_key, from }),
            _ => None,
        };

        Ok(Self {
            jwt_secret,
            db_path,
            host,
            port,
            api,
            stream,
            google,
            mail,
        })
    }
}

fn parse_flag(value: Option<String>) -> bool {
    matches!(value.as_deref().map(str::to_ascii_lowercase).as_deref(), Some("true" | "1" | "yes"))
}

fn parse_limit(value: Option<String>, key: &str) -> Result<Option<u32>> {
    value
        .map(|v| v.parse::<u32>().with_context(|| format!("{} must be a positive integer", key)))
        .transpose()
}
