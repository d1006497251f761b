//! This module implements the definition of the command line app.

use std::net::SocketAddr;

use clap::builder::PossibleValuesParser;
use clap::{Arg, Command, value_parser};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const ABOUT: &str = "Beacon accepts telemetry from browsers and turns it into metrics.";

pub fn make_app() -> Command {
    Command::new("beacon")
        .disable_help_subcommand(true)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .max_term_width(79)
        .version(VERSION)
        .about(ABOUT)
        .arg(
            Arg::new("config")
                .value_name("CONFIG")
                .long("config")
                .short('c')
                .global(true)
                .env("BEACON_CONFIG_DIR")
                .help("The path to the config folder."),
        )
        .subcommand(
            Command::new("run")
                .about("Run the ingestion server")
                .after_help(
                    "This runs the server in the foreground until it receives SIGINT or \
                     SIGTERM.  It binds to the port and network interface configured in \
                     the config file unless overridden here.",
                )
                .arg(
                    Arg::new("host")
                        .long("host")
                        .short('H')
                        .value_name("HOST")
                        .env("BEACON_HOST")
                        .help("The host the server binds to."),
                )
                .arg(
                    Arg::new("port")
                        .long("port")
                        .short('P')
                        .value_name("PORT")
                        .env("BEACON_PORT")
                        .help("The port the server binds to."),
                )
                .arg(
                    Arg::new("sample_rate")
                        .long("sample-rate")
                        .value_name("RATE")
                        .env("BEACON_SAMPLE_RATE")
                        .help("Probability between 0 and 1 of keeping an ingested event."),
                )
                .arg(
                    Arg::new("kill_switch")
                        .long("kill-switch")
                        .value_name("BOOL")
                        .num_args(0..=1)
                        .default_missing_value("true")
                        .env("BEACON_KILL_SWITCH")
                        .help("Drop all ingested events."),
                )
                .arg(
                    Arg::new("rate_limit_capacity")
                        .long("rate-limit-capacity")
                        .value_name("TOKENS")
                        .env("BEACON_RATE_LIMIT_CAPACITY")
                        .help("Burst size of the per-client rate limiter."),
                )
                .arg(
                    Arg::new("rate_limit_refill_rate")
                        .long("rate-limit-refill-rate")
                        .value_name("TOKENS")
                        .env("BEACON_RATE_LIMIT_REFILL_RATE")
                        .help("Tokens per second added to each client's budget."),
                )
                .arg(
                    Arg::new("statsd_addr")
                        .long("statsd-addr")
                        .value_name("ADDR")
                        .env("BEACON_STATSD_ADDR")
                        .help("Address of the statsd server. Empty to disable metrics."),
                )
                .arg(
                    Arg::new("log_level")
                        .long("log-level")
                        .value_name("LEVEL")
                        .env("BEACON_LOG_LEVEL")
                        .help("The log level, one of error, warn, info, debug or trace."),
                )
                .arg(
                    Arg::new("shutdown_timeout")
                        .long("shutdown-timeout")
                        .value_name("SECONDS")
                        .env("BEACON_SHUTDOWN_TIMEOUT")
                        .help("Seconds to wait for open requests on shutdown."),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Manage the server config")
                .after_help(
                    "This command provides basic config management.  It can be used to \
                     print out the effective config and to validate a config folder.",
                )
                .subcommand_required(true)
                .arg_required_else_help(true)
                .subcommand(
                    Command::new("show")
                        .about("Show the entire config out for debugging purposes")
                        .after_help(
                            "This dumps out the entire config including the values which \
                             are not in the config file but filled in from defaults.  The \
                             default output format is YAML but a debug format can also be \
                             specified.",
                        )
                        .arg(
                            Arg::new("format")
                                .short('f')
                                .long("format")
                                .value_parser(PossibleValuesParser::new(["debug", "yaml"]))
                                .default_value("yaml")
                                .help("The output format"),
                        ),
                )
                .subcommand(
                    Command::new("check")
                        .about("Validate the config")
                        .after_help(
                            "This loads the config folder and fails with a description of \
                             the first invalid value.",
                        ),
                ),
        )
        .subcommand(
            Command::new("healthcheck")
                .about("Check the health of a running server")
                .after_help(
                    "This queries the health endpoint of a running server and exits with \
                     a non-zero status if it is not healthy.",
                )
                .arg(
                    Arg::new("mode")
                        .long("mode")
                        .short('m')
                        .value_parser(PossibleValuesParser::new(["live", "ready"]))
                        .default_value("ready")
                        .help("The health check to run"),
                )
                .arg(
                    Arg::new("timeout")
                        .long("timeout")
                        .value_name("SECONDS")
                        .value_parser(value_parser!(u64))
                        .default_value("5")
                        .help("Seconds to wait for a response"),
                )
                .arg(
                    Arg::new("addr")
                        .long("addr")
                        .value_name("ADDR")
                        .value_parser(value_parser!(SocketAddr))
                        .help("The server address, defaults to the configured listen address"),
                ),
        )
}
