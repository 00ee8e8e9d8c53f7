//! Fixed-window request limiting per (client IP, route class).

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::AppState;
use crate::error::ApiError;

/// Window length shared by every route class.
pub const WINDOW: Duration = Duration::from_secs(15 * 60);

/// Windows are swept once the table grows past this many keys.
const PRUNE_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    /// signup, login, forgot-password, reset-password
    AuthStrict,
    /// provider redirect and callback
    OAuth,
    /// everything else under /api
    General,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountPolicy {
    AllRequests,
    /// Successful responses are free; only status >= 400 counts.
    FailuresOnly,
}

#[derive(Debug, Clone, Copy)]
pub struct ClassPolicy {
    pub limit: u32,
    pub window: Duration,
    pub counting: CountPolicy,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub auth_strict: ClassPolicy,
    pub oauth: ClassPolicy,
    pub general: ClassPolicy,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            auth_strict: ClassPolicy {
                limit: 10,
                window: WINDOW,
                counting: CountPolicy::AllRequests,
            },
            oauth: ClassPolicy {
                limit: 50,
                window: WINDOW,
                counting: CountPolicy::AllRequests,
            },
            general: ClassPolicy {
                limit: 100,
                window: WINDOW,
                counting: CountPolicy::FailuresOnly,
            },
        }
    }
}

impl RateLimitConfig {
    fn policy(&self, class: RouteClass) -> ClassPolicy {
        match class {
            RouteClass::AuthStrict => self.auth_strict,
            RouteClass::OAuth => self.oauth,
            RouteClass::General => self.general,
        }
    }
}

#[derive(Debug)]
struct Window {
    started: Instant,
    count: u32,
}

#[derive(Debug)]
pub struct RateLimited {
    pub retry_after: Duration,
}

/// Counter table behind one mutex: every check-and-increment happens in a
/// single critical section, so concurrent requests from one IP cannot both
/// slip under the limit.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<(RouteClass, IpAddr), Window>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn admit(&self, class: RouteClass, ip: IpAddr) -> Result<(), RateLimited> {
        self.admit_at(class, ip, Instant::now())
    }

    /// Rejects once the window's count has reached the limit. Under
    /// `AllRequests` an admitted request is counted immediately.
    pub fn admit_at(&self, class: RouteClass, ip: IpAddr, now: Instant) -> Result<(), RateLimited> {
        let policy = self.config.policy(class);
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());

        if windows.len() > PRUNE_THRESHOLD {
            windows.retain(|(c, _), w| now.duration_since(w.started) < self.config.policy(*c).window);
        }

        let window = current_window(&mut windows, (class, ip), policy.window, now);
        if window.count >= policy.limit {
            let elapsed = now.duration_since(window.started);
            return Err(RateLimited {
                retry_after: policy.window.saturating_sub(elapsed),
            });
        }

        if policy.counting == CountPolicy::AllRequests {
            window.count += 1;
        }
        Ok(())
    }

    pub fn complete(&self, class: RouteClass, ip: IpAddr, failed: bool) {
        self.complete_at(class, ip, failed, Instant::now())
    }

    /// Charges a finished request under `FailuresOnly`.
    pub fn complete_at(&self, class: RouteClass, ip: IpAddr, failed: bool, now: Instant) {
        let policy = self.config.policy(class);
        if policy.counting != CountPolicy::FailuresOnly || !failed {
            return;
        }
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let window = current_window(&mut windows, (class, ip), policy.window, now);
        window.count = window.count.saturating_add(1);
    }
}

fn current_window(
    windows: &mut HashMap<(RouteClass, IpAddr), Window>,
    key: (RouteClass, IpAddr),
    length: Duration,
    now: Instant,
) -> &mut Window {
    let window = windows.entry(key).or_insert(Window {
        started: now,
        count: 0,
    });
    if now.duration_since(window.started) >= length {
        *window = Window {
            started: now,
            count: 0,
        };
    }
    window
}

/// Client address: first `X-Forwarded-For` hop when behind a trusted proxy,
/// otherwise the socket peer.
pub fn client_ip(req: &Request, trust_proxy: bool) -> IpAddr {
    if trust_proxy {
        let forwarded = req
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse::<IpAddr>().ok());
        if let Some(ip) = forwarded {
            return ip;
        }
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

/// Route-layer middleware; the class is bound when the layer is built.
pub async fn enforce(
    State((state, class)): State<(AppState, RouteClass)>,
    req: Request,
    next: Next,
) -> Response {
    let ip = client_ip(&req, state.settings.trust_proxy);

    if let Err(limited) = state.limiter.admit(class, ip) {
        warn!("Rate limit hit: {:?} from {}", class, ip);
        return ApiError::RateLimited {
            retry_after: limited.retry_after,
        }
        .into_response();
    }

    let response = next.run(req).await;
    let status = response.status();
    state
        .limiter
        .complete(class, ip, status.is_client_error() || status.is_server_error());
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(limit: u32) -> RateLimitConfig {
        RateLimitConfig {
            auth_strict: ClassPolicy {
                limit,
                window: Duration::from_secs(60),
                counting: CountPolicy::AllRequests,
            },
            oauth: ClassPolicy {
                limit,
                window: Duration::from_secs(60),
                counting: CountPolicy::AllRequests,
            },
            general: ClassPolicy {
                limit,
                window: Duration::from_secs(60),
                counting: CountPolicy::FailuresOnly,
            },
        }
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[test]
    fn nth_request_passes_and_next_is_rejected() {
        let limiter = RateLimiter::new(config(3));
        let now = Instant::now();
        for _ in 0..3 {
            assert!(limiter.admit_at(RouteClass::AuthStrict, ip(1), now).is_ok());
        }
        let rejected = limiter.admit_at(RouteClass::AuthStrict, ip(1), now).unwrap_err();
        assert_eq!(rejected.retry_after, Duration::from_secs(60));
    }

    #[test]
    fn keys_are_per_ip_and_class() {
        let limiter = RateLimiter::new(config(1));
        let now = Instant::now();
        assert!(limiter.admit_at(RouteClass::AuthStrict, ip(1), now).is_ok());
        assert!(limiter.admit_at(RouteClass::AuthStrict, ip(2), now).is_ok());
        assert!(limiter.admit_at(RouteClass::OAuth, ip(1), now).is_ok());
        assert!(limiter.admit_at(RouteClass::AuthStrict, ip(1), now).is_err());
    }

    #[test]
    fn window_resets_after_its_length() {
        let limiter = RateLimiter::new(config(1));
        let start = Instant::now();
        assert!(limiter.admit_at(RouteClass::AuthStrict, ip(1), start).is_ok());

        let later = start + Duration::from_secs(30);
        let rejected = limiter.admit_at(RouteClass::AuthStrict, ip(1), later).unwrap_err();
        assert_eq!(rejected.retry_after, Duration::from_secs(30));

        let next_window = start + Duration::from_secs(60);
        assert!(limiter.admit_at(RouteClass::AuthStrict, ip(1), next_window).is_ok());
    }

    #[test]
    fn successes_are_free_under_failures_only() {
        let limiter = RateLimiter::new(config(2));
        let now = Instant::now();
        for _ in 0..10 {
            assert!(limiter.admit_at(RouteClass::General, ip(1), now).is_ok());
            limiter.complete_at(RouteClass::General, ip(1), false, now);
        }

        limiter.complete_at(RouteClass::General, ip(1), true, now);
        limiter.complete_at(RouteClass::General, ip(1), true, now);
        assert!(limiter.admit_at(RouteClass::General, ip(1), now).is_err());
    }
}
