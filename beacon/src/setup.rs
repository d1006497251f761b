use anyhow::Result;
use beacon_config::{Config, ExporterKind};
use beacon_statsd::MetricsConfig;

/// Rejects combinations of values that are valid on their own but unsafe together.
pub fn check_config(config: &Config) -> Result<()> {
    let rate_limits = config.rate_limits();

    if rate_limits.enabled
        && rate_limits.trust_forwarded_for
        && config.listen_addr().ip().is_unspecified()
    {
        anyhow::bail!(
            "rate_limits.trust_forwarded_for is enabled while listening on all interfaces. \
             Clients could pick their own rate limit key; bind to the proxy network instead.",
        );
    }

    Ok(())
}

/// Print spawn infos to the log.
pub fn dump_spawn_infos(config: &Config) {
    if config.path().as_os_str().is_empty() {
        beacon_log::info!("launching beacon without config folder");
    } else {
        beacon_log::info!(
            "launching beacon from config folder {}",
            config.path().display()
        );
    }

    let sampling = config.sampling();
    let rate_limits = config.rate_limits();

    beacon_log::info!("  listen address: {}", config.listen_addr());
    beacon_log::info!("  log level: {}", config.logging().level);
    beacon_log::info!("  sample rate: {}", sampling.sample_rate);
    if sampling.kill_switch {
        beacon_log::warn!("  kill switch: active, all events are dropped");
    }
    if rate_limits.enabled {
        beacon_log::info!(
            "  rate limit: {} requests burst, {}/s refill",
            rate_limits.capacity,
            rate_limits.refill_rate
        );
    } else {
        beacon_log::info!("  rate limit: disabled");
    }
    match (config.exporter(), config.statsd_addr()) {
        (ExporterKind::Statsd, Some(addr)) => beacon_log::info!("  exporter: statsd at {addr}"),
        (ExporterKind::Statsd, None) => beacon_log::info!("  exporter: statsd (no address)"),
        (ExporterKind::None, _) => beacon_log::info!("  exporter: none"),
    }
}

/// Initialize the metric system.
pub fn init_metrics(config: &Config) -> Result<()> {
    let Some(host) = config.statsd_addr() else {
        return Ok(());
    };

    let mut default_tags = config.metrics_default_tags().clone();
    if let Some(hostname_tag) = config.metrics_hostname_tag()
        && let Some(hostname) = hostname::get().ok().and_then(|s| s.into_string().ok())
    {
        default_tags.insert(hostname_tag.to_owned(), hostname);
    }
    beacon_statsd::init(MetricsConfig {
        prefix: config.metrics_prefix().to_owned(),
        host: host.to_owned(),
        default_tags,
        sample_rate: config.metrics_sample_rate(),
        aggregate: config.metrics_aggregate(),
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_forwarded_for_on_all_interfaces() {
        let config = Config::from_json_value(json!({
            "server": { "host": "0.0.0.0" },
            "rate_limits": { "trust_forwarded_for": true },
        }))
        .unwrap();
        assert!(check_config(&config).is_err());

        let config = Config::from_json_value(json!({
            "server": { "host": "10.0.0.5" },
            "rate_limits": { "trust_forwarded_for": true },
        }))
        .unwrap();
        assert!(check_config(&config).is_ok());
    }
}
