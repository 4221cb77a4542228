use anyhow::{bail, Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use secrecy::{ExposeSecret, SecretString};

pub const ARG_SESSION_SECRET: &str = "session-secret";
pub const ARG_SESSION_TTL_SECONDS: &str = "session-ttl-seconds";
pub const ARG_SESSION_COOKIE_NAME: &str = "session-cookie-name";
pub const ARG_COOKIE_SECURE: &str = "cookie-secure";
pub const ARG_CSRF_ON_LOGIN: &str = "csrf-on-login";

/// Minimum length of the key used to derive CSRF tokens.
pub const MIN_SECRET_BYTES: usize = 32;

#[derive(Debug)]
pub struct Options {
    pub secret: SecretString,
    pub ttl_seconds: i64,
    pub cookie_name: String,
    pub cookie_secure: bool,
    pub csrf_on_login: bool,
}

impl Options {
    /// Parse session options.
    ///
    /// # Errors
    /// Returns an error if the secret is missing or too short.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let secret = matches
            .get_one::<String>(ARG_SESSION_SECRET)
            .cloned()
            .map(SecretString::from)
            .context("missing required argument: --session-secret")?;
        if secret.expose_secret().len() < MIN_SECRET_BYTES {
            bail!("--{ARG_SESSION_SECRET} must be at least {MIN_SECRET_BYTES} bytes");
        }

        let cookie_name = matches
            .get_one::<String>(ARG_SESSION_COOKIE_NAME)
            .cloned()
            .unwrap_or_else(|| "sessionId".to_string());
        if cookie_name.is_empty()
            || !cookie_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            bail!("--{ARG_SESSION_COOKIE_NAME} must be a non-empty token of [A-Za-z0-9_-]");
        }

        Ok(Self {
            secret,
            ttl_seconds: matches
                .get_one::<i64>(ARG_SESSION_TTL_SECONDS)
                .copied()
                .unwrap_or(86_400),
            cookie_name,
            cookie_secure: matches.get_flag(ARG_COOKIE_SECURE),
            csrf_on_login: matches
                .get_one::<bool>(ARG_CSRF_ON_LOGIN)
                .copied()
                .unwrap_or(true),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SESSION_SECRET)
                .long(ARG_SESSION_SECRET)
                .help("Secret used to derive CSRF tokens (at least 32 bytes)")
                .env("COURSE_WIKI_SESSION_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL_SECONDS)
                .long(ARG_SESSION_TTL_SECONDS)
                .help("Session lifetime in seconds, renewed on activity")
                .env("COURSE_WIKI_SESSION_TTL_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_SESSION_COOKIE_NAME)
                .long(ARG_SESSION_COOKIE_NAME)
                .help("Session cookie name")
                .env("COURSE_WIKI_SESSION_COOKIE_NAME")
                .default_value("sessionId"),
        )
        .arg(
            Arg::new(ARG_COOKIE_SECURE)
                .long(ARG_COOKIE_SECURE)
                .help("Mark the session cookie Secure (always on in production)")
                .env("COURSE_WIKI_COOKIE_SECURE")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_CSRF_ON_LOGIN)
                .long(ARG_CSRF_ON_LOGIN)
                .help("Require a CSRF token on the login form")
                .env("COURSE_WIKI_CSRF_ON_LOGIN")
                .default_value("true")
                .value_parser(clap::value_parser!(bool)),
        )
}
