use crate::api::handlers::auth::WindowConfig;
use clap::{Arg, ArgMatches, Command};

pub const ARG_WINDOW_SECONDS: &str = "rate-limit-window-seconds";
pub const ARG_MAX: &str = "rate-limit-max";
pub const ARG_LOGIN_WINDOW_SECONDS: &str = "login-rate-limit-window-seconds";
pub const ARG_LOGIN_MAX: &str = "login-rate-limit-max";
pub const ARG_TRUSTED_PROXIES: &str = "trusted-proxies";

#[derive(Debug, Clone, Copy)]
pub struct Options {
    pub general: WindowConfig,
    pub login: WindowConfig,
    pub trusted_proxies: usize,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        let seconds = |id: &str| matches.get_one::<u64>(id).copied().unwrap_or(600);
        Self {
            general: WindowConfig::new(
                seconds(ARG_WINDOW_SECONDS),
                matches.get_one::<u32>(ARG_MAX).copied().unwrap_or(200),
            ),
            login: WindowConfig::new(
                seconds(ARG_LOGIN_WINDOW_SECONDS),
                matches.get_one::<u32>(ARG_LOGIN_MAX).copied().unwrap_or(5),
            ),
            trusted_proxies: matches
                .get_one::<usize>(ARG_TRUSTED_PROXIES)
                .copied()
                .unwrap_or(0),
        }
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_WINDOW_SECONDS)
                .long(ARG_WINDOW_SECONDS)
                .help("General rate limit window in seconds")
                .env("COURSE_WIKI_RATE_LIMIT_WINDOW_SECONDS")
                .default_value("600")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_MAX)
                .long(ARG_MAX)
                .help("Requests allowed per client and window for anonymous visitors")
                .env("COURSE_WIKI_RATE_LIMIT_MAX")
                .default_value("200")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_LOGIN_WINDOW_SECONDS)
                .long(ARG_LOGIN_WINDOW_SECONDS)
                .help("Login rate limit window in seconds")
                .env("COURSE_WIKI_LOGIN_RATE_LIMIT_WINDOW_SECONDS")
                .default_value("600")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_LOGIN_MAX)
                .long(ARG_LOGIN_MAX)
                .help("Failed logins tolerated per client and window")
                .env("COURSE_WIKI_LOGIN_RATE_LIMIT_MAX")
                .default_value("5")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_TRUSTED_PROXIES)
                .long(ARG_TRUSTED_PROXIES)
                .help("Reverse proxy hops whose X-Forwarded-For entries are trusted (0 keys on the peer address)")
                .env("COURSE_WIKI_TRUSTED_PROXIES")
                .default_value("0")
                .value_parser(clap::value_parser!(usize)),
        )
}
