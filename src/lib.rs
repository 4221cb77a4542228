//! # Course Wiki (admin authentication core)
//!
//! `course-wiki` serves the administrative side of a course review site. Visitors
//! browse courses and post anonymous reviews; a single administrator signs in to
//! moderate content. This crate owns everything between the socket and the
//! moderation handlers that is security relevant.
//!
//! ## Sessions
//!
//! Sessions are opaque 256-bit tokens carried in an `HttpOnly` cookie. Only the
//! SHA-256 hash of a token is used as the store key, so a leaked session table
//! cannot be replayed. Sessions are regenerated on login (session fixation) and
//! destroyed on logout. Idle sessions expire after 24 hours.
//!
//! ## Credentials
//!
//! Administrators are authenticated either against the credential store
//! (bcrypt, cost 12) or against static credentials from the process
//! configuration. Both sit behind the same [`Authenticator`](api::handlers::auth::Authenticator)
//! trait and fail with the same message for unknown users and wrong passwords.
//!
//! ## Request protection
//!
//! - **CSRF:** every mutating request carries an HMAC token bound to the session.
//! - **Rate limiting:** 200 requests per 10 minutes for anonymous clients, and at
//!   most 5 failed logins per 10 minutes. Signed-in administrators bypass the
//!   general limiter.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
