//! Fixed-window rate limiting.
//!
//! Flow Overview:
//! 1) The general limiter counts every request per client key, except requests
//!    from authenticated sessions.
//! 2) The login limiter counts each `POST /admin/login` provisionally; the
//!    login handler marks success on the response and the attempt is refunded,
//!    so only failures accumulate.
//!
//! Counters live in process memory and are purged once their window closes.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, Method},
    middleware::Next,
    response::Response,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{
    access::CurrentSession,
    state::AuthState,
    types::{LimitScope, SecurityError},
    utils::extract_client_ip,
};

pub const DEFAULT_WINDOW_SECONDS: u64 = 10 * 60;
pub const DEFAULT_GENERAL_MAX: u32 = 200;
pub const DEFAULT_LOGIN_MAX: u32 = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowConfig {
    pub window: Duration,
    pub max: u32,
}

impl WindowConfig {
    #[must_use]
    pub fn new(window_seconds: u64, max: u32) -> Self {
        Self {
            window: Duration::from_secs(window_seconds),
            max,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Throttled { retry_after: Duration },
}

#[derive(Debug)]
struct Window {
    started: Instant,
    count: u32,
}

#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    // Requests allowed per window before throttling.
    allowance: u32,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    /// Limiter that throttles request `max + 1` within a window.
    #[must_use]
    pub fn general(config: WindowConfig) -> Self {
        Self::with_allowance(config.window, config.max)
    }

    /// Limiter for login attempts: throttles only once recorded failures
    /// exceed `max`, so the attempt after `max` failures still goes through.
    #[must_use]
    pub fn login(config: WindowConfig) -> Self {
        Self::with_allowance(config.window, config.max.saturating_add(1))
    }

    fn with_allowance(window: Duration, allowance: u32) -> Self {
        Self {
            window,
            allowance,
            windows: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Count a request for `key` unless its window is exhausted.
    pub async fn check(&self, key: &str) -> RateDecision {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let entry = windows.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(entry.started) >= self.window {
            entry.started = now;
            entry.count = 0;
        }
        if entry.count >= self.allowance {
            let elapsed = now.duration_since(entry.started);
            let retry_after = self.window.saturating_sub(elapsed).max(Duration::from_secs(1));
            return RateDecision::Throttled { retry_after };
        }
        entry.count += 1;
        RateDecision::Allowed
    }

    /// Give back one counted request for `key` in the current window.
    pub async fn refund(&self, key: &str) {
        let mut windows = self.windows.lock().await;
        if let Some(entry) = windows.get_mut(key) {
            entry.count = entry.count.saturating_sub(1);
        }
    }

    /// Drop closed windows, returning how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let before = windows.len();
        windows.retain(|_, entry| now.duration_since(entry.started) < self.window);
        before - windows.len()
    }
}

/// Marker the login handler puts on successful responses so the attempt is refunded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoginSucceeded;

/// Client identity for rate limiting.
///
/// The peer address, unless `trusted_proxies` hops forward the client address
/// in `X-Forwarded-For` / `X-Real-IP`.
pub(crate) fn client_key(request: &Request, trusted_proxies: usize) -> String {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    peer_key(request.headers(), peer, trusted_proxies)
}

pub(crate) fn peer_key(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trusted_proxies: usize,
) -> String {
    extract_client_ip(headers, trusted_proxies)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// General limiter; authenticated sessions bypass it entirely.
pub async fn general_rate_limit(
    State(auth_state): State<Arc<AuthState>>,
    request: Request,
    next: Next,
) -> Response {
    let authenticated = request
        .extensions()
        .get::<CurrentSession>()
        .is_some_and(|CurrentSession(session)| session.is_authenticated());
    if authenticated {
        return next.run(request).await;
    }

    let key = client_key(&request, auth_state.config().trusted_proxies());
    if let RateDecision::Throttled { retry_after } = auth_state.general_limiter().check(&key).await
    {
        warn!(client = %key, path = %request.uri().path(), "Request rate limit exceeded");
        return SecurityError::RateLimited {
            scope: LimitScope::General,
            retry_after,
        }
        .respond(request.headers());
    }

    next.run(request).await
}

/// Login limiter for `POST /admin/login`.
pub async fn login_rate_limit(
    State(auth_state): State<Arc<AuthState>>,
    request: Request,
    next: Next,
) -> Response {
    if request.method() != Method::POST {
        return next.run(request).await;
    }

    let key = client_key(&request, auth_state.config().trusted_proxies());
    let limiter = auth_state.login_limiter();
    if let RateDecision::Throttled { retry_after } = limiter.check(&key).await {
        warn!(client = %key, "Login rate limit exceeded");
        return SecurityError::RateLimited {
            scope: LimitScope::Login,
            retry_after,
        }
        .respond(request.headers());
    }

    let response = next.run(request).await;
    if response.extensions().get::<LoginSucceeded>().is_some() {
        debug!(client = %key, "Refunding successful login attempt");
        limiter.refund(&key).await;
    }
    response
}
