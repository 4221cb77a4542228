use crate::api::handlers::auth::DEFAULT_BCRYPT_COST;
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_ADMIN_USERNAME: &str = "admin-username";
pub const ARG_ADMIN_PASSWORD: &str = "admin-password";
pub const ARG_BCRYPT_COST: &str = "bcrypt-cost";
pub const ARG_MASTER_PASSWORD: &str = "master-password";

/// Administrator credentials taken from configuration instead of the database.
#[derive(Debug)]
pub struct StaticCredentials {
    pub username: String,
    pub password: SecretString,
}

#[derive(Debug)]
pub struct Options {
    pub static_credentials: Option<StaticCredentials>,
    pub bcrypt_cost: u32,
    pub master_password: Option<SecretString>,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        let username = optional_string(matches, ARG_ADMIN_USERNAME);
        let password = optional_string(matches, ARG_ADMIN_PASSWORD);
        let static_credentials = match (username, password) {
            (Some(username), Some(password)) => Some(StaticCredentials {
                username,
                password: SecretString::from(password),
            }),
            _ => None,
        };

        Self {
            static_credentials,
            bcrypt_cost: optional_u32(matches, ARG_BCRYPT_COST).unwrap_or(DEFAULT_BCRYPT_COST),
            master_password: optional_string(matches, ARG_MASTER_PASSWORD)
                .map(SecretString::from),
        }
    }
}

// Accessors that tolerate arguments a subcommand does not define.
fn optional_string(matches: &ArgMatches, id: &str) -> Option<String> {
    matches.try_get_one::<String>(id).ok().flatten().cloned()
}

fn optional_u32(matches: &ArgMatches, id: &str) -> Option<u32> {
    matches.try_get_one::<u32>(id).ok().flatten().copied()
}

fn bcrypt_cost_arg() -> Arg {
    Arg::new(ARG_BCRYPT_COST)
        .long(ARG_BCRYPT_COST)
        .help("bcrypt work factor for stored password hashes")
        .env("COURSE_WIKI_BCRYPT_COST")
        .default_value("12")
        .value_parser(clap::value_parser!(u32).range(4..=31))
}

/// Authenticator arguments for the `server` subcommand.
#[must_use]
pub fn with_server_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ADMIN_USERNAME)
                .long(ARG_ADMIN_USERNAME)
                .help("Static administrator username (skips the credential store)")
                .env("COURSE_WIKI_ADMIN_USERNAME")
                .requires(ARG_ADMIN_PASSWORD),
        )
        .arg(
            Arg::new(ARG_ADMIN_PASSWORD)
                .long(ARG_ADMIN_PASSWORD)
                .help("Static administrator password")
                .env("COURSE_WIKI_ADMIN_PASSWORD")
                .hide_env_values(true)
                .requires(ARG_ADMIN_USERNAME),
        )
        .arg(bcrypt_cost_arg())
}

/// Arguments for `admin create`.
#[must_use]
pub fn with_provisioning_args(command: Command) -> Command {
    command.arg(bcrypt_cost_arg()).arg(
        Arg::new(ARG_MASTER_PASSWORD)
            .long(ARG_MASTER_PASSWORD)
            .help("When set, provisioning asks for this password first")
            .env("COURSE_WIKI_MASTER_PASSWORD")
            .hide_env_values(true),
    )
}
