use axum_extra::extract::cookie::{Cookie, SameSite};

use crate::credentials::SESSION_TTL_DAYS;
use crate::rate_limit::RateLimitConfig;

pub const SESSION_COOKIE: &str = "jwt";
pub const OAUTH_STATE_COOKIE: &str = "oauth_state";

/// Everything the router needs from the outside world besides the
/// database and collaborators.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    /// Secure cookies with `SameSite=None`; otherwise `Lax` for local dev.
    pub cookie_secure: bool,
    /// Origins allowed for CORS, OAuth return targets and reset links.
    pub allowed_origins: Vec<String>,
    /// Trusted fallback when a requested origin is not allow-listed.
    pub client_url: String,
    pub rate_limits: RateLimitConfig,
    /// Take the client address from `X-Forwarded-For`.
    pub trust_proxy: bool,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            cookie_secure: false,
            allowed_origins: vec!["http://localhost:5173".into()],
            client_url: "http://localhost:5173".into(),
            rate_limits: RateLimitConfig::default(),
            trust_proxy: false,
        }
    }
}

impl ApiSettings {
    /// The requested origin if it is allow-listed, else the default client url.
    pub fn resolve_origin(&self, requested: Option<&str>) -> String {
        let origin = requested
            .map(|o| o.trim_end_matches('/'))
            .filter(|o| self.allowed_origins.iter().any(|a| a.trim_end_matches('/') == *o))
            .unwrap_or(self.client_url.as_str());
        origin.trim_end_matches('/').to_string()
    }

    fn same_site(&self) -> SameSite {
        if self.cookie_secure { SameSite::None } else { SameSite::Lax }
    }

    pub fn session_cookie(&self, token: String) -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE, token))
            .http_only(true)
            .secure(self.cookie_secure)
            .same_site(self.same_site())
            .path("/")
            .max_age(time::Duration::days(SESSION_TTL_DAYS))
            .build()
    }

    /// Removal cookie matching the attributes the session cookie was set with.
    pub fn expired_session_cookie(&self) -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE, ""))
            .http_only(true)
            .secure(self.cookie_secure)
            .same_site(self.same_site())
            .path("/")
            .max_age(time::Duration::ZERO)
            .build()
    }

    pub fn oauth_state_cookie(&self, value: String) -> Cookie<'static> {
        Cookie::build((OAUTH_STATE_COOKIE, value))
            .http_only(true)
            .secure(self.cookie_secure)
            .same_site(SameSite::Lax)
            .path("/api/auth/google")
            .max_age(time::Duration::minutes(10))
            .build()
    }

    pub fn expired_oauth_state_cookie(&self) -> Cookie<'static> {
        Cookie::build((OAUTH_STATE_COOKIE, ""))
            .http_only(true)
            .secure(self.cookie_secure)
            .same_site(SameSite::Lax)
            .path("/api/auth/google")
            .max_age(time::Duration::ZERO)
            .build()
    }
}
