pub mod logging;
pub mod resilience;
pub mod session;

use clap::{
    Arg, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

pub const ARG_PORT: &str = "port";
pub const ARG_DSN: &str = "dsn";
pub const ARG_PAYMENT_URL: &str = "payment-url";

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

    let command = Command::new("comanda")
        .about("Session integrity and request authorization for food ordering")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("8080")
                .env("COMANDA_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_DSN)
                .short('d')
                .long(ARG_DSN)
                .help("Database connection string")
                .long_help(
                    "Database connection string. The pool connects lazily, so an unreachable database trips the breaker instead of failing startup.",
                )
                .env("COMANDA_DSN")
                .required(true),
        )
        .arg(
            Arg::new(ARG_PAYMENT_URL)
                .long(ARG_PAYMENT_URL)
                .help("Payment provider charge endpoint")
                .env("COMANDA_PAYMENT_URL")
                .required(true),
        );

    let command = session::with_args(command);
    let command = resilience::with_args(command);
    logging::with_args(command)
}
