use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use beacon_config::{Config, OverridableConfig};
use clap::ArgMatches;

use crate::cliapp::make_app;
use crate::{healthcheck, setup};

/// Runs the command line application.
pub fn execute() -> Result<()> {
    let app = make_app();
    let matches = app.get_matches();
    let config_path = config_dir(&matches);

    // Commands that do not need to load the config:
    if let Some("config") = matches.subcommand_name()
        && let Some(("check", _)) = matches
            .subcommand_matches("config")
            .and_then(ArgMatches::subcommand)
    {
        return check_config(&config_path);
    }

    let mut config = Config::from_path(&config_path)?;

    if let Some(matches) = matches.subcommand_matches("run") {
        config.apply_override(extract_config_args(matches))?;
    }

    beacon_log::init(config.logging(), config.sentry());

    match matches.subcommand() {
        Some(("config", matches)) => manage_config(&config, matches),
        Some(("healthcheck", matches)) => healthcheck::healthcheck(&config, matches),
        Some(("run", _)) => run(config),
        _ => unreachable!(),
    }
}

fn config_dir(matches: &ArgMatches) -> PathBuf {
    matches
        .get_one::<String>("config")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(".beacon"))
}

/// Extracts config overrides from the arguments of the `run` command.
///
/// Values given through environment variables are resolved by clap.
pub fn extract_config_args(matches: &ArgMatches) -> OverridableConfig {
    let value = |name: &str| matches.get_one::<String>(name).cloned();

    OverridableConfig {
        host: value("host"),
        port: value("port"),
        sample_rate: value("sample_rate"),
        kill_switch: value("kill_switch"),
        rate_limit_capacity: value("rate_limit_capacity"),
        rate_limit_refill_rate: value("rate_limit_refill_rate"),
        statsd_addr: value("statsd_addr"),
        log_level: value("log_level"),
        shutdown_timeout: value("shutdown_timeout"),
    }
}

fn check_config(path: &Path) -> Result<()> {
    if !Config::config_exists(path) {
        bail!("no config file found in {}", path.display());
    }

    let config = Config::from_path(path)?;
    setup::check_config(&config)?;

    #[allow(clippy::print_stdout)]
    {
        println!("config is valid");
    }
    Ok(())
}

fn manage_config(config: &Config, matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("show", matches)) => {
            let format = matches
                .get_one::<String>("format")
                .map(String::as_str)
                .unwrap_or("yaml");

            let output = match format {
                "debug" => format!("{config:#?}\n"),
                _ => config.to_yaml_string()?,
            };

            #[allow(clippy::print_stdout)]
            {
                print!("{output}");
            }
            Ok(())
        }
        _ => unreachable!(),
    }
}

/// Starts the server and blocks until it shuts down.
pub fn run(config: Config) -> Result<()> {
    setup::check_config(&config)?;
    setup::dump_spawn_infos(&config);
    setup::init_metrics(&config)?;

    beacon_server::run(config)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_extract_config_args() {
        let matches = make_app()
            .try_get_matches_from([
                "beacon",
                "run",
                "--port",
                "8080",
                "--sample-rate",
                "0.25",
                "--statsd-addr",
                "127.0.0.1:8125",
            ])
            .unwrap();
        let run = matches.subcommand_matches("run").unwrap();
        let overrides = extract_config_args(run);

        assert_eq!(overrides.port.as_deref(), Some("8080"));
        assert_eq!(overrides.sample_rate.as_deref(), Some("0.25"));
        assert_eq!(overrides.statsd_addr.as_deref(), Some("127.0.0.1:8125"));
        assert_eq!(overrides.kill_switch, None);

        let mut config = Config::default();
        config.apply_override(overrides).unwrap();
        assert_eq!(config.listen_addr().port(), 8080);
        assert_eq!(config.sampling().sample_rate, 0.25);
        assert_eq!(config.statsd_addr(), Some("127.0.0.1:8125"));
    }

    #[test]
    fn test_invalid_override() {
        let matches = make_app()
            .try_get_matches_from(["beacon", "run", "--sample-rate", "often"])
            .unwrap();
        let run = matches.subcommand_matches("run").unwrap();

        let mut config = Config::default();
        let error = config.apply_override(extract_config_args(run)).unwrap_err();
        assert!(error.to_string().contains("sample_rate"), "{error}");
    }
}
