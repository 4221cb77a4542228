//! Password hashing via bcrypt.
//!
//! bcrypt is CPU bound; both operations run on the blocking pool so a login
//! never stalls other requests on the same worker.

use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};

/// Production bcrypt cost factor.
pub const DEFAULT_BCRYPT_COST: u32 = 12;

/// Hash a password with bcrypt at the given cost.
///
/// # Errors
/// Returns an error if the cost is out of range or the blocking task fails.
pub async fn hash_password(password: &SecretString, cost: u32) -> Result<String> {
    let password = password.clone();
    tokio::task::spawn_blocking(move || bcrypt::hash(password.expose_secret(), cost))
        .await
        .context("bcrypt hash task failed")?
        .context("bcrypt hash")
}

/// Verify a password against a bcrypt hash.
///
/// A malformed stored hash verifies as `false` rather than erroring, so a
/// corrupted record cannot be told apart from a wrong password.
///
/// # Errors
/// Returns an error only if the blocking task itself fails.
pub async fn verify_password(password: &SecretString, hash: &str) -> Result<bool> {
    let password = password.clone();
    let hash = hash.to_string();
    tokio::task::spawn_blocking(move || {
        bcrypt::verify(password.expose_secret(), &hash).unwrap_or(false)
    })
    .await
    .context("bcrypt verify task failed")
}
