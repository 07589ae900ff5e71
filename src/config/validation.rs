//! Configuration validation.

use crate::config::Config;
use std::collections::HashSet;

/// Validate the configuration.
///
/// Checks for:
/// - A non-empty listener name
/// - At least one upstream
/// - No duplicate upstream entries (same zone and address)
/// - No upstream sharing the listen or metrics address
/// - A known log level
///
/// # Returns
///
/// `Ok(())` if valid, or an error message describing the problems.
pub fn validate_config(config: &Config) -> Result<(), String> {
    let mut errors = Vec::new();

    if config.listener.name.is_empty() {
        errors.push("listener name cannot be empty".to_string());
    }

    if config.upstreams.is_empty() {
        errors.push("at least one upstream must be defined".to_string());
    }

    let mut seen = HashSet::new();
    for upstream in &config.upstreams {
        if !seen.insert((upstream.zone.as_str(), upstream.address)) {
            errors.push(format!("duplicate upstream address: {}", upstream.address));
        }

        if upstream.address == config.listener.listen {
            errors.push(format!(
                "upstream {} is the listen address; the balancer would dial itself",
                upstream.address
            ));
        }

        if config.metrics.enabled && upstream.address == config.metrics.address {
            errors.push(format!(
                "upstream {} collides with the metrics address",
                upstream.address
            ));
        }
    }

    if config.metrics.enabled && config.metrics.address == config.listener.listen {
        errors.push(format!(
            "metrics address {} collides with the listen address",
            config.metrics.address
        ));
    }

    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.global.log_level.to_lowercase().as_str()) {
        errors.push(format!(
            "invalid log level '{}', must be one of: {}",
            config.global.log_level,
            valid_levels.join(", ")
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GlobalConfig, ListenerConfig, MetricsConfig, UpstreamConfig};
    use crate::balancer::DEFAULT_CONNECT_TIMEOUT;

    fn minimal_config() -> Config {
        Config {
            global: GlobalConfig::default(),
            listener: ListenerConfig {
                name: "test".to_string(),
                listen: "127.0.0.1:4000".parse().unwrap(),
                connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            },
            metrics: MetricsConfig::default(),
            upstreams: vec![UpstreamConfig {
                address: "127.0.0.1:5000".parse().unwrap(),
                zone: String::new(),
            }],
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate_config(&minimal_config()).is_ok());
    }

    #[test]
    fn test_no_upstreams() {
        let mut config = minimal_config();
        config.upstreams.clear();
        let result = validate_config(&config);
        assert!(result.unwrap_err().contains("at least one upstream"));
    }

    #[test]
    fn test_empty_listener_name() {
        let mut config = minimal_config();
        config.listener.name.clear();
        let result = validate_config(&config);
        assert!(result.unwrap_err().contains("name cannot be empty"));
    }

    #[test]
    fn test_duplicate_upstreams() {
        let mut config = minimal_config();
        config.upstreams.push(config.upstreams[0].clone());
        let result = validate_config(&config);
        assert!(result.unwrap_err().contains("duplicate upstream"));
    }

    #[test]
    fn test_same_address_different_zone_allowed() {
        let mut config = minimal_config();
        let mut other = config.upstreams[0].clone();
        other.zone = "eth0".to_string();
        config.upstreams.push(other);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_upstream_is_listen_address() {
        let mut config = minimal_config();
        config.upstreams[0].address = config.listener.listen;
        let result = validate_config(&config);
        assert!(result.unwrap_err().contains("dial itself"));
    }

    #[test]
    fn test_metrics_collides_with_listen() {
        let mut config = minimal_config();
        config.metrics.address = config.listener.listen;
        let result = validate_config(&config);
        assert!(result.unwrap_err().contains("metrics address"));
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = minimal_config();
        config.global.log_level = "verbose".to_string();
        let result = validate_config(&config);
        assert!(result.unwrap_err().contains("invalid log level"));
    }
}
