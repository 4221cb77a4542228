//! Cookie sessions backed by a [`SessionStore`].
//!
//! Flow Overview: every request loads (or starts) a session from the cookie.
//! Anonymous sessions stay in memory until something is stored in them. Login
//! regenerates the session under a new token before binding the principal, and
//! logout destroys it.

use axum::http::{
    header::{InvalidHeaderValue, COOKIE},
    HeaderMap, HeaderValue,
};
use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use super::{
    session_store::{SessionRecord, SessionStore},
    utils::{generate_csrf_salt, generate_session_token, hash_session_token},
};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session regeneration failed")]
    Regeneration(#[source] anyhow::Error),
    #[error("session could not be persisted")]
    Persist(#[source] anyhow::Error),
    #[error("session store unavailable")]
    Unavailable(#[source] anyhow::Error),
}

/// A request's session: the raw cookie token plus the stored state.
#[derive(Clone, Debug)]
pub struct Session {
    token: String,
    key: Vec<u8>,
    record: SessionRecord,
    persisted: bool,
}

impl Session {
    pub(crate) fn token(&self) -> &str {
        &self.token
    }

    /// Store key (SHA-256 of the token).
    pub(crate) fn key(&self) -> &[u8] {
        &self.key
    }

    pub(crate) fn csrf_salt(&self) -> &str {
        &self.record.csrf_salt
    }

    #[must_use]
    pub fn principal_id(&self) -> Option<Uuid> {
        self.record.principal_id
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.record.authenticated && self.record.principal_id.is_some()
    }

    /// Whether the session exists in the store (and the client holds its cookie).
    #[must_use]
    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    #[must_use]
    pub fn return_to(&self) -> Option<&str> {
        self.record.return_to.as_deref()
    }

    pub fn set_return_to(&mut self, target: String) {
        self.record.return_to = Some(target);
    }

    pub fn take_return_to(&mut self) -> Option<String> {
        self.record.return_to.take()
    }

    /// Mark the session as belonging to `principal_id`.
    pub fn bind(&mut self, principal_id: Uuid) {
        self.record.principal_id = Some(principal_id);
        self.record.authenticated = true;
    }

    /// Drop authentication, e.g. when the bound principal no longer exists.
    pub fn demote(&mut self) {
        self.record.principal_id = None;
        self.record.authenticated = false;
    }
}

pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    cookie_name: String,
    ttl_seconds: i64,
    cookie_secure: bool,
}

impl SessionManager {
    #[must_use]
    pub fn new(
        store: Arc<dyn SessionStore>,
        cookie_name: String,
        ttl_seconds: i64,
        cookie_secure: bool,
    ) -> Self {
        Self {
            store,
            cookie_name,
            ttl_seconds,
            cookie_secure,
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Resolve the session cookie.
    ///
    /// A missing cookie, unknown token or expired session all yield a fresh
    /// anonymous session.
    ///
    /// # Errors
    /// Returns [`SessionError::Unavailable`] when the store cannot be read.
    pub async fn load(&self, headers: &HeaderMap) -> Result<Session, SessionError> {
        if let Some(token) = extract_session_token(headers, &self.cookie_name) {
            let key = hash_session_token(&token);
            let record = self
                .store
                .load(&key)
                .await
                .map_err(SessionError::Unavailable)?;
            if let Some(record) = record {
                return Ok(Session {
                    token,
                    key,
                    record,
                    persisted: true,
                });
            }
        }
        self.fresh(None).map_err(SessionError::Unavailable)
    }

    fn fresh(&self, return_to: Option<String>) -> anyhow::Result<Session> {
        let token = generate_session_token()?;
        let key = hash_session_token(&token);
        let now = Utc::now();
        Ok(Session {
            token,
            key,
            record: SessionRecord {
                principal_id: None,
                authenticated: false,
                return_to,
                csrf_salt: generate_csrf_salt()?,
                created_at: now,
                expires_at: now + Duration::seconds(self.ttl_seconds),
            },
            persisted: false,
        })
    }

    /// Replace `session` with a new, unauthenticated one under a new token.
    ///
    /// `return_to` carries over. The old token stops resolving once this returns.
    ///
    /// # Errors
    /// Returns [`SessionError::Regeneration`] if the swap cannot be stored.
    pub async fn regenerate(&self, session: &Session) -> Result<Session, SessionError> {
        let mut next = self
            .fresh(session.record.return_to.clone())
            .map_err(SessionError::Regeneration)?;
        self.store
            .rotate(session.key(), next.key(), &next.record)
            .await
            .map_err(SessionError::Regeneration)?;
        next.persisted = true;
        Ok(next)
    }

    /// Persist the session and extend its idle expiry.
    ///
    /// # Errors
    /// Returns [`SessionError::Persist`] if the store write fails.
    pub async fn save(&self, session: &mut Session) -> Result<(), SessionError> {
        session.record.expires_at = Utc::now() + Duration::seconds(self.ttl_seconds);
        self.store
            .save(session.key(), &session.record)
            .await
            .map_err(SessionError::Persist)?;
        session.persisted = true;
        Ok(())
    }

    /// Extend the idle expiry of a stored session.
    ///
    /// # Errors
    /// Returns [`SessionError::Unavailable`] if the store write fails.
    pub async fn touch(&self, session: &mut Session) -> Result<(), SessionError> {
        if !session.persisted {
            return Ok(());
        }
        let expires_at = Utc::now() + Duration::seconds(self.ttl_seconds);
        self.store
            .touch(session.key(), expires_at)
            .await
            .map_err(SessionError::Unavailable)?;
        session.record.expires_at = expires_at;
        Ok(())
    }

    /// Remove the session from the store; a missing session is not an error.
    ///
    /// # Errors
    /// Returns [`SessionError::Unavailable`] if the store delete fails.
    pub async fn destroy(&self, session: &Session) -> Result<(), SessionError> {
        self.store
            .delete(session.key())
            .await
            .map_err(SessionError::Unavailable)
    }

    /// Build the `HttpOnly` cookie carrying the session token.
    ///
    /// # Errors
    /// Returns an error if the cookie name is not a valid header value.
    pub fn cookie(&self, session: &Session) -> Result<HeaderValue, InvalidHeaderValue> {
        let mut cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            self.cookie_name,
            session.token(),
            self.ttl_seconds
        );
        if self.cookie_secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie)
    }

    /// Build a cookie that makes the client drop the session token.
    ///
    /// # Errors
    /// Returns an error if the cookie name is not a valid header value.
    pub fn clear_cookie(&self) -> Result<HeaderValue, InvalidHeaderValue> {
        let mut cookie = format!(
            "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0",
            self.cookie_name
        );
        if self.cookie_secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie)
    }
}

fn extract_session_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| {
            let (key, val) = pair.trim().split_once('=')?;
            (key.trim() == cookie_name).then(|| val.trim().to_string())
        })
        .find(|val| !val.is_empty())
}
