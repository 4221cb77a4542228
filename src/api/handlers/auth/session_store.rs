//! Server-side session persistence.
//!
//! Stores are keyed by the SHA-256 hash of the session token; raw tokens only
//! ever live in the client cookie. Expiry is enforced by the store: expired
//! rows never load and are purged periodically.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::Instrument;
use uuid::Uuid;

/// Persisted session state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionRecord {
    pub principal_id: Option<Uuid>,
    pub authenticated: bool,
    pub return_to: Option<String>,
    pub csrf_salt: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a live session; missing and expired sessions are both `None`.
    async fn load(&self, key: &[u8]) -> Result<Option<SessionRecord>>;

    /// Insert or replace a session.
    async fn save(&self, key: &[u8], record: &SessionRecord) -> Result<()>;

    /// Replace `old_key` with `new_key` in a single operation.
    async fn rotate(&self, old_key: &[u8], new_key: &[u8], record: &SessionRecord) -> Result<()>;

    /// Remove a session; removing a missing session is not an error.
    async fn delete(&self, key: &[u8]) -> Result<()>;

    /// Push the idle expiry forward.
    async fn touch(&self, key: &[u8], expires_at: DateTime<Utc>) -> Result<()>;

    /// Drop expired sessions, returning how many were removed.
    async fn purge_expired(&self) -> Result<u64>;
}

/// Postgres-backed session store (`admin_sessions` table).
#[derive(Clone, Debug)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const UPSERT_SESSION: &str = r"
    INSERT INTO admin_sessions
        (token_hash, principal_id, authenticated, return_to, csrf_salt, created_at, expires_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7)
    ON CONFLICT (token_hash) DO UPDATE SET
        principal_id = EXCLUDED.principal_id,
        authenticated = EXCLUDED.authenticated,
        return_to = EXCLUDED.return_to,
        csrf_salt = EXCLUDED.csrf_salt,
        expires_at = EXCLUDED.expires_at
";

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn load(&self, key: &[u8]) -> Result<Option<SessionRecord>> {
        let query = r"
            SELECT principal_id, authenticated, return_to, csrf_salt, created_at, expires_at
            FROM admin_sessions
            WHERE token_hash = $1 AND expires_at > NOW()
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT"
        );
        let row = sqlx::query(query)
            .bind(key)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to load session")?;

        Ok(row.map(|row| SessionRecord {
            principal_id: row.get("principal_id"),
            authenticated: row.get("authenticated"),
            return_to: row.get("return_to"),
            csrf_salt: row.get("csrf_salt"),
            created_at: row.get("created_at"),
            expires_at: row.get("expires_at"),
        }))
    }

    async fn save(&self, key: &[u8], record: &SessionRecord) -> Result<()> {
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPSERT"
        );
        sqlx::query(UPSERT_SESSION)
            .bind(key)
            .bind(record.principal_id)
            .bind(record.authenticated)
            .bind(record.return_to.as_deref())
            .bind(&record.csrf_salt)
            .bind(record.created_at)
            .bind(record.expires_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to save session")?;
        Ok(())
    }

    async fn rotate(&self, old_key: &[u8], new_key: &[u8], record: &SessionRecord) -> Result<()> {
        // Both statements commit together so a concurrent request never sees a
        // half-migrated session.
        let mut tx = self.pool.begin().await.context("begin session rotation")?;

        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE"
        );
        sqlx::query("DELETE FROM admin_sessions WHERE token_hash = $1")
            .bind(old_key)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to delete rotated session")?;

        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT"
        );
        sqlx::query(UPSERT_SESSION)
            .bind(new_key)
            .bind(record.principal_id)
            .bind(record.authenticated)
            .bind(record.return_to.as_deref())
            .bind(&record.csrf_salt)
            .bind(record.created_at)
            .bind(record.expires_at)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to insert rotated session")?;

        tx.commit().await.context("commit session rotation")?;
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> Result<()> {
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE"
        );
        sqlx::query("DELETE FROM admin_sessions WHERE token_hash = $1")
            .bind(key)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete session")?;
        Ok(())
    }

    async fn touch(&self, key: &[u8], expires_at: DateTime<Utc>) -> Result<()> {
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE"
        );
        sqlx::query("UPDATE admin_sessions SET expires_at = $2 WHERE token_hash = $1")
            .bind(key)
            .bind(expires_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to touch session")?;
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE"
        );
        let result = sqlx::query("DELETE FROM admin_sessions WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to purge expired sessions")?;
        Ok(result.rows_affected())
    }
}

/// In-process session store.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<Vec<u8>, SessionRecord>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions, expired ones included.
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, key: &[u8]) -> Result<Option<SessionRecord>> {
        let sessions = self.sessions.lock().await;
        Ok(sessions
            .get(key)
            .filter(|record| record.expires_at > Utc::now())
            .cloned())
    }

    async fn save(&self, key: &[u8], record: &SessionRecord) -> Result<()> {
        self.sessions
            .lock()
            .await
            .insert(key.to_vec(), record.clone());
        Ok(())
    }

    async fn rotate(&self, old_key: &[u8], new_key: &[u8], record: &SessionRecord) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        sessions.remove(old_key);
        sessions.insert(new_key.to_vec(), record.clone());
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> Result<()> {
        self.sessions.lock().await.remove(key);
        Ok(())
    }

    async fn touch(&self, key: &[u8], expires_at: DateTime<Utc>) -> Result<()> {
        if let Some(record) = self.sessions.lock().await.get_mut(key) {
            record.expires_at = expires_at;
        }
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        let now = Utc::now();
        sessions.retain(|_, record| record.expires_at > now);
        Ok((before - sessions.len()) as u64)
    }
}
