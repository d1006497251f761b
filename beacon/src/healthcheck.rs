use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Result, format_err};
use beacon_config::Config;
use clap::ArgMatches;
use reqwest::blocking::Client;

pub fn healthcheck(config: &Config, matches: &ArgMatches) -> Result<()> {
    let mode = matches
        .get_one::<String>("mode")
        .map(String::as_str)
        .unwrap_or("ready");

    let timeout = matches.get_one::<u64>("timeout").copied().unwrap_or(5);

    let addr = matches
        .get_one::<SocketAddr>("addr")
        .copied()
        .unwrap_or(config.listen_addr());

    let client = Client::builder()
        .timeout(Some(Duration::from_secs(timeout)))
        .build()?;

    let response = client
        .get(format!("http://{addr}/api/health/{mode}/"))
        .send();

    match response {
        Ok(response) => {
            if response.status().is_success() {
                Ok(())
            } else {
                beacon_log::error!("beacon is unhealthy. Status code: {}", response.status());
                Err(format_err!(
                    "beacon is unhealthy. Status code: {}",
                    response.status()
                ))
            }
        }
        Err(err) => {
            beacon_log::error!("beacon is unhealthy. Error: {err}");
            Err(err.into())
        }
    }
}
