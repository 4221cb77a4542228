//! Administrator credential storage.
//!
//! Flow Overview: the provisioning command creates the single administrator,
//! the store authenticator reads records by username, and a successful login
//! stamps `last_login_at`. No other component writes these records.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::Instrument;
use uuid::Uuid;

/// Stored administrator identity.
#[derive(Clone)]
pub struct AdminRecord {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for AdminRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminRecord")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("password_hash", &"***")
            .field("created_at", &self.created_at)
            .field("last_login_at", &self.last_login_at)
            .finish()
    }
}

/// Result of the one-shot provisioning insert.
#[derive(Debug)]
pub enum ProvisionOutcome {
    Created(AdminRecord),
    /// An administrator already exists; nothing was written.
    AlreadyProvisioned(Vec<AdminRecord>),
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Exact, case-sensitive username lookup.
    async fn find_by_username(&self, username: &str) -> Result<Option<AdminRecord>>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<AdminRecord>>;

    /// Stamp a successful login.
    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;

    async fn list(&self) -> Result<Vec<AdminRecord>>;

    /// Insert the administrator unless one already exists.
    async fn provision(&self, username: &str, password_hash: &str) -> Result<ProvisionOutcome>;

    /// Remove every administrator, returning how many were deleted.
    async fn delete_all(&self) -> Result<u64>;
}

/// Postgres-backed credential store (`admin_users` table).
#[derive(Clone, Debug)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const ADMIN_COLUMNS: &str = "id, username, password_hash, created_at, last_login_at";

fn admin_from_row(row: &sqlx::postgres::PgRow) -> AdminRecord {
    AdminRecord {
        id: row.get("id"),
        username: row.get("username"),
        password_hash: row.get("password_hash"),
        created_at: row.get("created_at"),
        last_login_at: row.get("last_login_at"),
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<AdminRecord>> {
        let query = format!("SELECT {ADMIN_COLUMNS} FROM admin_users WHERE username = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT"
        );
        let row = sqlx::query(&query)
            .bind(username)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup admin by username")?;
        Ok(row.as_ref().map(admin_from_row))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<AdminRecord>> {
        let query = format!("SELECT {ADMIN_COLUMNS} FROM admin_users WHERE id = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT"
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup admin by id")?;
        Ok(row.as_ref().map(admin_from_row))
    }

    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let query = "UPDATE admin_users SET last_login_at = $2 WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE"
        );
        sqlx::query(query)
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to record admin login")?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<AdminRecord>> {
        let query = format!("SELECT {ADMIN_COLUMNS} FROM admin_users ORDER BY created_at");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT"
        );
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to list admins")?;
        Ok(rows.iter().map(admin_from_row).collect())
    }

    async fn provision(&self, username: &str, password_hash: &str) -> Result<ProvisionOutcome> {
        // The table lock serializes concurrent provisioning runs so the
        // existence check and the insert cannot interleave.
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin provisioning transaction")?;

        sqlx::query("LOCK TABLE admin_users IN SHARE ROW EXCLUSIVE MODE")
            .execute(&mut *tx)
            .await
            .context("failed to lock admin_users")?;

        let query = format!("SELECT {ADMIN_COLUMNS} FROM admin_users ORDER BY created_at");
        let existing = sqlx::query(&query)
            .fetch_all(&mut *tx)
            .await
            .context("failed to check existing admins")?;
        if !existing.is_empty() {
            let _ = tx.rollback().await;
            return Ok(ProvisionOutcome::AlreadyProvisioned(
                existing.iter().map(admin_from_row).collect(),
            ));
        }

        let query = format!(
            "INSERT INTO admin_users (id, username, password_hash) VALUES ($1, $2, $3) RETURNING {ADMIN_COLUMNS}"
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT"
        );
        let row = sqlx::query(&query)
            .bind(Uuid::new_v4())
            .bind(username)
            .bind(password_hash)
            .fetch_one(&mut *tx)
            .instrument(span)
            .await
            .context("failed to insert admin")?;

        tx.commit().await.context("commit provisioning transaction")?;

        Ok(ProvisionOutcome::Created(admin_from_row(&row)))
    }

    async fn delete_all(&self) -> Result<u64> {
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE"
        );
        let result = sqlx::query("DELETE FROM admin_users")
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete admins")?;
        Ok(result.rows_affected())
    }
}

/// In-process credential store, used when no database is configured and in tests.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    admins: RwLock<HashMap<Uuid, AdminRecord>>,
}

impl MemoryCredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<AdminRecord>> {
        let admins = self.admins.read().await;
        Ok(admins
            .values()
            .find(|admin| admin.username == username)
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<AdminRecord>> {
        Ok(self.admins.read().await.get(&id).cloned())
    }

    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        if let Some(admin) = self.admins.write().await.get_mut(&id) {
            admin.last_login_at = Some(at);
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<AdminRecord>> {
        let mut admins: Vec<AdminRecord> = self.admins.read().await.values().cloned().collect();
        admins.sort_by_key(|admin| admin.created_at);
        Ok(admins)
    }

    async fn provision(&self, username: &str, password_hash: &str) -> Result<ProvisionOutcome> {
        let mut admins = self.admins.write().await;
        if !admins.is_empty() {
            return Ok(ProvisionOutcome::AlreadyProvisioned(
                admins.values().cloned().collect(),
            ));
        }
        let record = AdminRecord {
            id: Uuid::new_v4(),
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            created_at: Utc::now(),
            last_login_at: None,
        };
        admins.insert(record.id, record.clone());
        Ok(ProvisionOutcome::Created(record))
    }

    async fn delete_all(&self) -> Result<u64> {
        let mut admins = self.admins.write().await;
        let count = admins.len() as u64;
        admins.clear();
        Ok(count)
    }
}
