//! Administrator provisioning.
//!
//! Exactly one administrator is expected. `create` refuses to add a second
//! one and `reset` removes every record so `create` can run again.

use crate::api::{
    self,
    handlers::auth::{
        hash_password, valid_username, AdminRecord, CredentialStore, PgCredentialStore,
        ProvisionOutcome,
    },
};
use crate::cli::prompt::Prompt;
use anyhow::{bail, Result};
use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;
use tracing::info;

pub const MIN_PASSWORD_CHARS: usize = 8;

#[derive(Debug)]
pub struct CreateArgs {
    pub dsn: String,
    pub bcrypt_cost: u32,
    pub master_password: Option<SecretString>,
}

#[derive(Debug)]
pub struct ResetArgs {
    pub dsn: String,
}

/// Execute `admin create` against the database.
/// # Errors
/// Returns an error if the database is unreachable or provisioning is refused.
pub async fn execute_create(args: CreateArgs, prompt: &mut impl Prompt) -> Result<()> {
    let store = PgCredentialStore::new(api::connect(&args.dsn).await?);
    let admin = create(
        &store,
        prompt,
        args.bcrypt_cost,
        args.master_password.as_ref(),
    )
    .await?;
    println!("Administrator {} created.", admin.username);
    Ok(())
}

/// Execute `admin reset` against the database.
/// # Errors
/// Returns an error if the database is unreachable.
pub async fn execute_reset(args: ResetArgs, prompt: &mut impl Prompt) -> Result<()> {
    let store = PgCredentialStore::new(api::connect(&args.dsn).await?);
    match reset(&store, prompt).await? {
        Some(deleted) => println!("Deleted {deleted} administrator(s)."),
        None => println!("Aborted; nothing was deleted."),
    }
    Ok(())
}

/// Prompt for and store the administrator.
///
/// # Errors
/// Returns an error when the master password is wrong, an administrator
/// already exists, or the entered credentials are invalid.
pub async fn create(
    store: &dyn CredentialStore,
    prompt: &mut impl Prompt,
    bcrypt_cost: u32,
    master_password: Option<&SecretString>,
) -> Result<AdminRecord> {
    if let Some(master) = master_password {
        let entered = prompt.secret("Master password: ")?;
        let matches: bool = entered
            .expose_secret()
            .as_bytes()
            .ct_eq(master.expose_secret().as_bytes())
            .into();
        if !matches {
            bail!("Invalid master password");
        }
    }

    let existing = store.list().await?;
    if !existing.is_empty() {
        refuse(&existing)?;
    }

    let username = prompt.line("Username: ")?.trim().to_string();
    if !valid_username(&username) {
        bail!("Username must be 3-50 characters of letters, digits, '_' or '-'");
    }

    let password = prompt.secret("Password: ")?;
    if password.expose_secret().chars().count() < MIN_PASSWORD_CHARS {
        bail!("Password must be at least {MIN_PASSWORD_CHARS} characters");
    }
    let confirmation = prompt.secret("Confirm password: ")?;
    if password.expose_secret() != confirmation.expose_secret() {
        bail!("Passwords do not match");
    }

    let hash = hash_password(&password, bcrypt_cost).await?;
    match store.provision(&username, &hash).await? {
        ProvisionOutcome::Created(admin) => {
            info!(username = %admin.username, "Administrator provisioned");
            Ok(admin)
        }
        ProvisionOutcome::AlreadyProvisioned(existing) => {
            refuse(&existing)?;
            bail!("An administrator already exists")
        }
    }
}

/// Delete every administrator once the operator types `yes`.
///
/// Returns `None` when the operator declined.
///
/// # Errors
/// Returns an error if the prompt or the store fails.
pub async fn reset(store: &dyn CredentialStore, prompt: &mut impl Prompt) -> Result<Option<u64>> {
    let existing = store.list().await?;
    for admin in &existing {
        println!("{}", describe(admin));
    }
    let answer = prompt.line("Type 'yes' to delete all administrators: ")?;
    if answer.trim() != "yes" {
        return Ok(None);
    }
    let deleted = store.delete_all().await?;
    info!(deleted, "Administrators deleted");
    Ok(Some(deleted))
}

fn refuse(existing: &[AdminRecord]) -> Result<()> {
    for admin in existing {
        println!("{}", describe(admin));
    }
    bail!("An administrator already exists; run `admin reset` first")
}

fn describe(admin: &AdminRecord) -> String {
    let last_login = admin.last_login_at.map_or_else(
        || "never".to_string(),
        |at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    );
    format!(
        "{} (created {}, last login {last_login})",
        admin.username,
        admin.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
    )
}
