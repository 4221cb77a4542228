//! Per-session CSRF tokens.
//!
//! A token is `base64url(HMAC-SHA256(secret, session_key || csrf_salt))`, so
//! each session has exactly one valid token and regenerating the session
//! (new key, new salt) retires it.

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header::CONTENT_TYPE, HeaderMap, Method},
    middleware::Next,
    response::Response,
};
use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use std::sync::Arc;
use tracing::warn;

use super::{
    access::CurrentSession,
    rate_limit::client_key,
    session::Session,
    state::AuthState,
    types::SecurityError,
    LOGIN_PATH, LOGOUT_PATH,
};

/// Form field carrying the token.
pub const CSRF_FIELD: &str = "_csrf";
/// Header carrying the token for script clients.
pub const CSRF_HEADER: &str = "x-csrf-token";

// Form bodies on this service are tiny; anything larger is not a form we render.
const MAX_FORM_BYTES: usize = 64 * 1024;

type HmacSha256 = Hmac<Sha256>;

pub struct CsrfGuard {
    secret: SecretString,
}

impl CsrfGuard {
    #[must_use]
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    fn mac(&self, session: &Session) -> Option<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes()).ok()?;
        mac.update(session.key());
        mac.update(session.csrf_salt().as_bytes());
        Some(mac)
    }

    /// Token to embed in forms rendered for `session`.
    #[must_use]
    pub fn issue_token(&self, session: &Session) -> String {
        self.mac(session)
            .map(|mac| Base64UrlUnpadded::encode_string(&mac.finalize().into_bytes()))
            .unwrap_or_default()
    }

    /// Constant-time check of a submitted token against `session`.
    #[must_use]
    pub fn verify(&self, session: &Session, submitted: &str) -> bool {
        let Ok(submitted) = Base64UrlUnpadded::decode_vec(submitted.trim()) else {
            return false;
        };
        self.mac(session)
            .is_some_and(|mac| mac.verify_slice(&submitted).is_ok())
    }
}

fn is_mutating(method: &Method) -> bool {
    [Method::POST, Method::PUT, Method::PATCH, Method::DELETE].contains(method)
}

fn is_form(request: &Request) -> bool {
    request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/x-www-form-urlencoded"))
}

/// Pull `_csrf` out of a urlencoded body.
pub(crate) fn form_token(body: &[u8]) -> Option<String> {
    url::form_urlencoded::parse(body)
        .find(|(key, _)| key == CSRF_FIELD)
        .map(|(_, value)| value.into_owned())
}

fn header_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CSRF_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Token from the `x-csrf-token` header, falling back to the form body.
pub(crate) fn submitted_token(headers: &HeaderMap, body: &[u8]) -> Option<String> {
    header_token(headers).or_else(|| form_token(body))
}

/// Reject mutating requests without a valid token.
///
/// Login and logout are exempt here: the login handler checks the token
/// itself, and logout only needs one while the session is authenticated.
pub async fn csrf_protect(
    State(auth_state): State<Arc<AuthState>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if !is_mutating(request.method()) || path == LOGIN_PATH || path == LOGOUT_PATH {
        return next.run(request).await;
    }

    let Some(CurrentSession(session)) = request.extensions().get::<CurrentSession>().cloned()
    else {
        return SecurityError::BadCsrfToken.respond(request.headers());
    };

    let header_token = header_token(request.headers());

    let (request, submitted) = if header_token.is_some() || !is_form(&request) {
        (request, header_token)
    } else {
        let (parts, body) = request.into_parts();
        let Ok(bytes) = to_bytes(body, MAX_FORM_BYTES).await else {
            return SecurityError::BadCsrfToken.respond(&parts.headers);
        };
        let token = form_token(&bytes);
        (Request::from_parts(parts, Body::from(bytes)), token)
    };

    let valid = submitted
        .as_deref()
        .is_some_and(|token| auth_state.csrf().verify(&session, token));
    if !valid {
        warn!(
            client = %client_key(&request, auth_state.config().trusted_proxies()),
            path = %request.uri().path(),
            "Rejected request with invalid CSRF token"
        );
        return SecurityError::BadCsrfToken.respond(request.headers());
    }

    next.run(request).await
}
