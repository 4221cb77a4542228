//! Small helpers for session tokens, client identity and content negotiation.

use anyhow::{Context, Result};
use axum::http::{header::ACCEPT, HeaderMap};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use regex::Regex;
use sha2::{Digest, Sha256};
use url::Url;

/// Create a new session token for the session cookie.
/// The raw value is only returned to set the cookie; stores are keyed by its hash.
pub(crate) fn generate_session_token() -> Result<String> {
    random_token().context("failed to generate session token")
}

/// Random per-session salt mixed into the CSRF token.
pub(super) fn generate_csrf_salt() -> Result<String> {
    random_token().context("failed to generate csrf salt")
}

fn random_token() -> Result<String, rand::Error> {
    let mut bytes = [0u8; 32];
    OsRng.try_fill_bytes(&mut bytes)?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// Hash a session token so raw values never touch the store.
/// The hash is used for lookups when the cookie is presented.
pub(crate) fn hash_session_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Usernames are 3-50 characters of `[A-Za-z0-9_-]`.
pub(crate) fn valid_username(username: &str) -> bool {
    Regex::new(r"^[A-Za-z0-9_-]{3,50}$").is_ok_and(|regex| regex.is_match(username))
}

/// Extract the client IP recorded by trusted reverse proxies.
///
/// Each of the `trusted_proxies` hops appends the address it saw to
/// `X-Forwarded-For`, so the client is the `trusted_proxies`-th entry from the
/// right; entries further left are client supplied. With no trusted proxies
/// the headers are ignored.
pub(crate) fn extract_client_ip(headers: &HeaderMap, trusted_proxies: usize) -> Option<String> {
    if trusted_proxies == 0 {
        return None;
    }
    let forwarded: Vec<&str> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .collect();
    if !forwarded.is_empty() {
        // Fewer entries than hops: the leftmost is the furthest address known.
        let index = forwarded.len().saturating_sub(trusted_proxies);
        return forwarded.get(index).map(|value| (*value).to_string());
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// True when the client declared it accepts JSON (API callers, fetch requests).
pub(crate) fn wants_json(headers: &HeaderMap) -> bool {
    headers
        .get(ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains("application/json"))
}

/// Accept only same-origin paths as post-login redirect targets.
///
/// Anything that would resolve to another host (`//evil`, `https://evil`,
/// `/\evil`) is rejected.
pub(crate) fn local_redirect_target(candidate: &str) -> Option<String> {
    if !candidate.starts_with('/') || candidate.starts_with("//") || candidate.contains('\\') {
        return None;
    }
    let base = Url::parse("http://localhost/").ok()?;
    let joined = base.join(candidate).ok()?;
    if joined.host_str() != Some("localhost") || joined.port().is_some() {
        return None;
    }
    let mut target = joined.path().to_string();
    if let Some(query) = joined.query() {
        target.push('?');
        target.push_str(query);
    }
    Some(target)
}
