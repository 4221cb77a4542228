//! Map parsed arguments to an [`Action`].
//!
//! Validation that clap cannot express (secret length, the memory-mode
//! credential requirement, production bcrypt cost) happens here so the
//! actions start from a consistent configuration.

use crate::api::handlers::auth::{AuthConfig, Environment, DEFAULT_BCRYPT_COST};
use crate::cli::actions::{admin, server, Action};
use crate::cli::commands::{
    auth, rate_limit, session, ARG_DSN, ARG_ENVIRONMENT, ARG_PORT, CMD_ADMIN, CMD_ADMIN_CREATE,
    CMD_ADMIN_RESET, CMD_SERVER,
};
use anyhow::{anyhow, bail, Context, Result};
use clap::ArgMatches;

/// Map validated CLI matches to an action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &ArgMatches) -> Result<Action> {
    match matches.subcommand() {
        Some((CMD_SERVER, sub)) => server_action(sub),
        Some((CMD_ADMIN, sub)) => match sub.subcommand() {
            Some((CMD_ADMIN_CREATE, create)) => {
                let auth_opts = auth::Options::parse(create);
                Ok(Action::CreateAdmin(admin::CreateArgs {
                    dsn: required_dsn(create)?,
                    bcrypt_cost: auth_opts.bcrypt_cost,
                    master_password: auth_opts.master_password,
                }))
            }
            Some((CMD_ADMIN_RESET, reset)) => Ok(Action::ResetAdmins(admin::ResetArgs {
                dsn: required_dsn(reset)?,
            })),
            _ => Err(anyhow!("missing admin subcommand")),
        },
        _ => Err(anyhow!("missing subcommand")),
    }
}

fn required_dsn(matches: &ArgMatches) -> Result<String> {
    matches
        .get_one::<String>(ARG_DSN)
        .cloned()
        .context("missing required argument: --dsn")
}

fn server_action(matches: &ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = matches.get_one::<String>(ARG_DSN).cloned();

    let environment = matches
        .get_one::<String>(ARG_ENVIRONMENT)
        .map_or(Some(Environment::Development), |name| {
            Environment::from_name(name)
        })
        .context("invalid --environment")?;

    let session_opts = session::Options::parse(matches)?;
    let rate_opts = rate_limit::Options::parse(matches);
    let auth_opts = auth::Options::parse(matches);

    if dsn.is_none() && auth_opts.static_credentials.is_none() {
        bail!("--admin-username and --admin-password are required when --dsn is not set");
    }
    if environment == Environment::Production && auth_opts.bcrypt_cost < DEFAULT_BCRYPT_COST {
        bail!("--bcrypt-cost must be at least {DEFAULT_BCRYPT_COST} in production");
    }

    let config = AuthConfig::new()
        .with_environment(environment)
        .with_session_ttl_seconds(session_opts.ttl_seconds)
        .with_session_cookie_name(session_opts.cookie_name)
        .with_session_cookie_secure(
            session_opts.cookie_secure || environment == Environment::Production,
        )
        .with_csrf_on_login(session_opts.csrf_on_login)
        .with_general_window(rate_opts.general)
        .with_login_window(rate_opts.login)
        .with_trusted_proxies(rate_opts.trusted_proxies)
        .with_bcrypt_cost(auth_opts.bcrypt_cost);

    Ok(Action::Server(server::Args {
        port,
        dsn,
        config,
        session_secret: session_opts.secret,
        static_credentials: auth_opts.static_credentials,
    }))
}
