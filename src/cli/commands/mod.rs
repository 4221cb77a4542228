pub mod auth;
pub mod logging;
pub mod rate_limit;
pub mod session;

use clap::{
    builder::styling::{AnsiColor, Effects, Styles},
    Arg, ColorChoice, Command,
};

pub const CMD_SERVER: &str = "server";
pub const CMD_ADMIN: &str = "admin";
pub const CMD_ADMIN_CREATE: &str = "create";
pub const CMD_ADMIN_RESET: &str = "reset";

pub const ARG_PORT: &str = "port";
pub const ARG_DSN: &str = "dsn";
pub const ARG_ENVIRONMENT: &str = "environment";

fn dsn_arg() -> Arg {
    Arg::new(ARG_DSN)
        .short('d')
        .long(ARG_DSN)
        .help("Database connection string")
        .env("COURSE_WIKI_DSN")
        .hide_env_values(true)
}

fn server_command() -> Command {
    let command = Command::new(CMD_SERVER)
        .about("Run the web server")
        .long_about(
            "Run the web server. Without --dsn sessions and content live in memory and \
             --admin-username/--admin-password are required.",
        )
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("8080")
                .env("COURSE_WIKI_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(dsn_arg())
        .arg(
            Arg::new(ARG_ENVIRONMENT)
                .long(ARG_ENVIRONMENT)
                .help("Deployment environment")
                .env("COURSE_WIKI_ENVIRONMENT")
                .default_value("development")
                .value_parser(["development", "production"]),
        );

    let command = session::with_args(command);
    let command = rate_limit::with_args(command);
    auth::with_server_args(command)
}

fn admin_command() -> Command {
    Command::new(CMD_ADMIN)
        .about("Manage the administrator account")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(auth::with_provisioning_args(
            Command::new(CMD_ADMIN_CREATE)
                .about("Create the administrator (refused when one exists)")
                .arg(dsn_arg().required(true)),
        ))
        .subcommand(
            Command::new(CMD_ADMIN_RESET)
                .about("Delete every administrator after confirmation")
                .arg(dsn_arg().required(true)),
        )
}

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("course-wiki")
        .about("Course reviews with an authenticated admin dashboard")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(server_command())
        .subcommand(admin_command());

    logging::with_args(command)
}
