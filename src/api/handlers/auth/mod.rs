//! Admin authentication and request protection.
//!
//! This module verifies administrator credentials, manages cookie sessions,
//! and guards the request pipeline with CSRF checks, rate limits and access
//! gates.
//!
//! ## Sessions
//!
//! The session cookie carries 32 random bytes; stores only see their SHA-256
//! hash. A session is regenerated under a new token at login, so a token an
//! attacker planted before login never becomes authenticated.
//!
//! ## Rate Limiting
//!
//! - **General:** 200 requests per client per 10 minutes; authenticated
//!   sessions are exempt.
//! - **Login:** 5 failed attempts per client per 10 minutes; successful logins
//!   are refunded.
//!
//! ## Authenticators
//!
//! The store authenticator checks bcrypt hashes provisioned with
//! `course-wiki admin create`. The static authenticator checks a
//! username/password pair from the process configuration.

pub(crate) mod access;
pub(crate) mod authenticator;
pub(crate) mod credentials;
pub(crate) mod csrf;
pub(crate) mod login;
pub(crate) mod password;
pub(crate) mod rate_limit;
pub(crate) mod session;
pub(crate) mod session_store;
mod state;
pub(crate) mod types;
mod utils;

use axum::{
    http::{header::LOCATION, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};

pub use access::{CurrentPrincipal, CurrentSession, ViewContext};
pub use authenticator::{AuthError, Authenticator, Principal, StaticAuthenticator, StoreAuthenticator};
pub use credentials::{AdminRecord, CredentialStore, MemoryCredentialStore, PgCredentialStore, ProvisionOutcome};
pub use csrf::CsrfGuard;
pub use password::{hash_password, verify_password, DEFAULT_BCRYPT_COST};
pub use rate_limit::{RateDecision, RateLimiter, WindowConfig};
pub use session::{Session, SessionError, SessionManager};
pub use session_store::{MemorySessionStore, PgSessionStore, SessionRecord, SessionStore};
pub use state::{AuthConfig, AuthState, Environment};
pub use types::SecurityError;
pub(crate) use utils::valid_username;

pub const LOGIN_PATH: &str = "/admin/login";
pub const LOGOUT_PATH: &str = "/admin/logout";
pub const DASHBOARD_PATH: &str = "/admin/dashboard";

/// `302 Found` to a local path.
pub(crate) fn found(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (StatusCode::FOUND, [(LOCATION, value)]).into_response(),
        Err(_) => (StatusCode::FOUND, [(LOCATION, HeaderValue::from_static("/"))]).into_response(),
    }
}

#[cfg(test)]
mod tests;
