//! Credential verification strategies.
//!
//! Flow Overview: handlers and gates only see `Arc<dyn Authenticator>`. The
//! store strategy checks bcrypt hashes from the credential store; the static
//! strategy checks credentials fixed in the process configuration. Both fail
//! with [`AuthError::InvalidCredentials`] for unknown usernames and wrong
//! passwords alike, so responses never reveal which part was wrong.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;
use tracing::{debug, error};
use uuid::Uuid;

use super::{
    credentials::CredentialStore,
    password::{hash_password, verify_password},
};

/// Authenticated identity bound to a session. Never carries the password hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    pub id: Uuid,
    pub username: String,
    pub last_login_at: Option<DateTime<Utc>>,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid username or password")]
    InvalidCredentials,
    #[error("authentication backend failure: {0}")]
    Backend(#[from] anyhow::Error),
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Verify a username/password pair.
    async fn authenticate(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<Principal, AuthError>;

    /// Resolve a principal id stored in a session.
    async fn principal(&self, id: Uuid) -> Result<Option<Principal>, AuthError>;

    /// Short label for logs and health output.
    fn mode(&self) -> &'static str;
}

/// Verifies credentials against the credential store.
pub struct StoreAuthenticator {
    store: Arc<dyn CredentialStore>,
    // Verified when the username is unknown so both failure paths cost one bcrypt run.
    dummy_hash: String,
}

impl StoreAuthenticator {
    /// Build the authenticator; `bcrypt_cost` should match the cost used for stored hashes.
    ///
    /// # Errors
    /// Returns an error if the timing-equalization hash cannot be computed.
    pub async fn new(store: Arc<dyn CredentialStore>, bcrypt_cost: u32) -> anyhow::Result<Self> {
        let filler = SecretString::from(Uuid::new_v4().to_string());
        let dummy_hash = hash_password(&filler, bcrypt_cost).await?;
        Ok(Self { store, dummy_hash })
    }
}

#[async_trait]
impl Authenticator for StoreAuthenticator {
    async fn authenticate(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<Principal, AuthError> {
        let record = self.store.find_by_username(username).await?;

        let Some(record) = record else {
            let _ = verify_password(password, &self.dummy_hash).await?;
            debug!("authentication failed: unknown username");
            return Err(AuthError::InvalidCredentials);
        };

        if !verify_password(password, &record.password_hash).await? {
            debug!("authentication failed: password mismatch");
            return Err(AuthError::InvalidCredentials);
        }

        let now = Utc::now();
        self.store.record_login(record.id, now).await?;

        Ok(Principal {
            id: record.id,
            username: record.username,
            last_login_at: Some(now),
        })
    }

    async fn principal(&self, id: Uuid) -> Result<Option<Principal>, AuthError> {
        let record = self.store.find_by_id(id).await?;
        Ok(record.map(|record| Principal {
            id: record.id,
            username: record.username,
            last_login_at: record.last_login_at,
        }))
    }

    fn mode(&self) -> &'static str {
        "store"
    }
}

/// Verifies credentials fixed in the process configuration.
pub struct StaticAuthenticator {
    id: Uuid,
    username: String,
    username_digest: [u8; 32],
    password_digest: [u8; 32],
    last_login_at: RwLock<Option<DateTime<Utc>>>,
}

impl StaticAuthenticator {
    #[must_use]
    pub fn new(username: String, password: &SecretString) -> Self {
        Self {
            id: Uuid::new_v5(&Uuid::NAMESPACE_OID, username.as_bytes()),
            username_digest: digest(username.as_bytes()),
            password_digest: digest(password.expose_secret().as_bytes()),
            username,
            last_login_at: RwLock::new(None),
        }
    }
}

fn digest(value: &[u8]) -> [u8; 32] {
    Sha256::digest(value).into()
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn authenticate(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<Principal, AuthError> {
        // Compare fixed-size digests in constant time; evaluate both before branching.
        let username_ok = digest(username.as_bytes())[..].ct_eq(&self.username_digest[..]);
        let password_ok =
            digest(password.expose_secret().as_bytes())[..].ct_eq(&self.password_digest[..]);
        if !bool::from(username_ok & password_ok) {
            debug!("authentication failed: static credentials mismatch");
            return Err(AuthError::InvalidCredentials);
        }

        let now = Utc::now();
        *self.last_login_at.write().await = Some(now);

        Ok(Principal {
            id: self.id,
            username: self.username.clone(),
            last_login_at: Some(now),
        })
    }

    async fn principal(&self, id: Uuid) -> Result<Option<Principal>, AuthError> {
        if id != self.id {
            return Ok(None);
        }
        Ok(Some(Principal {
            id: self.id,
            username: self.username.clone(),
            last_login_at: *self.last_login_at.read().await,
        }))
    }

    fn mode(&self) -> &'static str {
        "static"
    }
}

/// Log backend failures once at the boundary that swallows them.
pub(crate) fn log_backend_error(err: &AuthError) {
    if let AuthError::Backend(source) = err {
        error!("Authentication backend error: {source:#}");
    }
}
