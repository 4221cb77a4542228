//! Auth state and configuration.

use secrecy::SecretString;
use std::sync::Arc;

use super::{
    authenticator::Authenticator,
    csrf::CsrfGuard,
    password::DEFAULT_BCRYPT_COST,
    rate_limit::{
        RateLimiter, WindowConfig, DEFAULT_GENERAL_MAX, DEFAULT_LOGIN_MAX, DEFAULT_WINDOW_SECONDS,
    },
    session::SessionManager,
    session_store::SessionStore,
    types::SecurityError,
};
use crate::api::handlers::catalog::Catalog;

const DEFAULT_SESSION_TTL_SECONDS: i64 = 24 * 60 * 60;
const DEFAULT_SESSION_COOKIE_NAME: &str = "sessionId";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "development" => Some(Self::Development),
            "production" => Some(Self::Production),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    environment: Environment,
    session_ttl_seconds: i64,
    session_cookie_name: String,
    session_cookie_secure: bool,
    csrf_on_login: bool,
    general_window: WindowConfig,
    login_window: WindowConfig,
    trusted_proxies: usize,
    bcrypt_cost: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            environment: Environment::default(),
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            session_cookie_name: DEFAULT_SESSION_COOKIE_NAME.to_string(),
            session_cookie_secure: false,
            csrf_on_login: true,
            general_window: WindowConfig::new(DEFAULT_WINDOW_SECONDS, DEFAULT_GENERAL_MAX),
            login_window: WindowConfig::new(DEFAULT_WINDOW_SECONDS, DEFAULT_LOGIN_MAX),
            trusted_proxies: 0,
            bcrypt_cost: DEFAULT_BCRYPT_COST,
        }
    }

    #[must_use]
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_session_cookie_name(mut self, name: String) -> Self {
        self.session_cookie_name = name;
        self
    }

    #[must_use]
    pub fn with_session_cookie_secure(mut self, secure: bool) -> Self {
        self.session_cookie_secure = secure;
        self
    }

    #[must_use]
    pub fn with_csrf_on_login(mut self, enabled: bool) -> Self {
        self.csrf_on_login = enabled;
        self
    }

    #[must_use]
    pub fn with_general_window(mut self, window: WindowConfig) -> Self {
        self.general_window = window;
        self
    }

    #[must_use]
    pub fn with_login_window(mut self, window: WindowConfig) -> Self {
        self.login_window = window;
        self
    }

    /// Number of reverse proxies whose `X-Forwarded-For` entries are trusted.
    #[must_use]
    pub fn with_trusted_proxies(mut self, hops: usize) -> Self {
        self.trusted_proxies = hops;
        self
    }

    #[must_use]
    pub fn with_bcrypt_cost(mut self, cost: u32) -> Self {
        self.bcrypt_cost = cost;
        self
    }

    #[must_use]
    pub fn environment(&self) -> Environment {
        self.environment
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub fn session_cookie_name(&self) -> &str {
        &self.session_cookie_name
    }

    #[must_use]
    pub fn session_cookie_secure(&self) -> bool {
        self.session_cookie_secure
    }

    #[must_use]
    pub fn csrf_on_login(&self) -> bool {
        self.csrf_on_login
    }

    #[must_use]
    pub fn general_window(&self) -> WindowConfig {
        self.general_window
    }

    #[must_use]
    pub fn login_window(&self) -> WindowConfig {
        self.login_window
    }

    #[must_use]
    pub fn trusted_proxies(&self) -> usize {
        self.trusted_proxies
    }

    #[must_use]
    pub fn bcrypt_cost(&self) -> u32 {
        self.bcrypt_cost
    }
}

/// Everything the request pipeline needs, built once at startup.
pub struct AuthState {
    config: AuthConfig,
    authenticator: Arc<dyn Authenticator>,
    sessions: SessionManager,
    csrf: CsrfGuard,
    general_limiter: RateLimiter,
    login_limiter: RateLimiter,
    catalog: Arc<dyn Catalog>,
}

impl AuthState {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        authenticator: Arc<dyn Authenticator>,
        session_store: Arc<dyn SessionStore>,
        catalog: Arc<dyn Catalog>,
        session_secret: SecretString,
    ) -> Self {
        let sessions = SessionManager::new(
            session_store,
            config.session_cookie_name().to_string(),
            config.session_ttl_seconds(),
            config.session_cookie_secure(),
        );
        Self {
            general_limiter: RateLimiter::general(config.general_window()),
            login_limiter: RateLimiter::login(config.login_window()),
            csrf: CsrfGuard::new(session_secret),
            sessions,
            authenticator,
            catalog,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn authenticator(&self) -> &Arc<dyn Authenticator> {
        &self.authenticator
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    #[must_use]
    pub fn csrf(&self) -> &CsrfGuard {
        &self.csrf
    }

    #[must_use]
    pub fn general_limiter(&self) -> &RateLimiter {
        &self.general_limiter
    }

    #[must_use]
    pub fn login_limiter(&self) -> &RateLimiter {
        &self.login_limiter
    }

    #[must_use]
    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    /// A 500 rejection; the cause is only shown outside production.
    pub(crate) fn internal_error(&self, cause: &dyn std::fmt::Display) -> SecurityError {
        let detail = match self.config.environment() {
            Environment::Development => Some(cause.to_string()),
            Environment::Production => None,
        };
        SecurityError::Internal { detail }
    }
}
