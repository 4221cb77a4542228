use crate::api::{
    self,
    handlers::{
        auth::{
            AuthConfig, AuthState, Authenticator, CredentialStore, MemorySessionStore,
            PgCredentialStore, PgSessionStore, SessionStore, StaticAuthenticator,
            StoreAuthenticator,
        },
        catalog::{Catalog, MemoryCatalog, PgCatalog},
        health::Backend,
    },
};
use crate::cli::commands::auth::StaticCredentials;
use anyhow::{bail, Result};
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<String>,
    pub config: AuthConfig,
    pub session_secret: SecretString,
    pub static_credentials: Option<StaticCredentials>,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let (backend, session_store, catalog, credential_store) = match args.dsn {
        Some(dsn) => {
            let pool = api::connect(&dsn).await?;
            (
                Backend::Postgres(pool.clone()),
                Arc::new(PgSessionStore::new(pool.clone())) as Arc<dyn SessionStore>,
                Arc::new(PgCatalog::new(pool.clone())) as Arc<dyn Catalog>,
                Some(Arc::new(PgCredentialStore::new(pool)) as Arc<dyn CredentialStore>),
            )
        }
        None => {
            warn!("No --dsn given; sessions and content are kept in memory");
            (
                Backend::Memory,
                Arc::new(MemorySessionStore::new()) as Arc<dyn SessionStore>,
                Arc::new(MemoryCatalog::new()) as Arc<dyn Catalog>,
                None,
            )
        }
    };

    let authenticator: Arc<dyn Authenticator> = match (args.static_credentials, credential_store)
    {
        (Some(credentials), _) => Arc::new(StaticAuthenticator::new(
            credentials.username,
            &credentials.password,
        )),
        (None, Some(store)) => {
            Arc::new(StoreAuthenticator::new(store, args.config.bcrypt_cost()).await?)
        }
        (None, None) => bail!("static administrator credentials are required without --dsn"),
    };

    info!(
        environment = args.config.environment().as_str(),
        authenticator = authenticator.mode(),
        "Starting {}",
        crate::APP_USER_AGENT
    );

    let auth_state = AuthState::new(
        args.config,
        authenticator,
        session_store,
        catalog,
        args.session_secret,
    );

    api::serve(args.port, Arc::new(auth_state), backend).await
}
