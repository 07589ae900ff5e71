//! Configuration data types.

use crate::balancer::{Endpoint, DEFAULT_CONNECT_TIMEOUT};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Global settings
    #[serde(default)]
    pub global: GlobalConfig,

    /// Listener definition (where we accept downstream connections)
    pub listener: ListenerConfig,

    /// Metrics endpoint configuration
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Upstream servers to balance across
    #[serde(default)]
    pub upstreams: Vec<UpstreamConfig>,
}

/// Global configuration settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GlobalConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: json or pretty
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::Json,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenerConfig {
    /// Name used in logs and metric labels
    #[serde(default = "default_listener_name")]
    pub name: String,

    /// Address and port to listen on
    pub listen: SocketAddr,

    /// Upper bound on dialing an upstream host
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
}

/// Metrics endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Whether the metrics endpoint is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Address to bind the metrics server
    #[serde(default = "default_metrics_address")]
    pub address: SocketAddr,

    /// Path for the metrics endpoint
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: default_metrics_address(),
            path: default_metrics_path(),
        }
    }
}

/// Individual upstream server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    /// Server address and port
    pub address: SocketAddr,

    /// Scope identifier, usually empty outside link-local IPv6
    #[serde(default)]
    pub zone: String,
}

impl UpstreamConfig {
    /// The endpoint this entry describes.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::with_zone(self.zone.clone(), self.address.ip(), self.address.port())
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_listener_name() -> String {
    "tcplb".to_string()
}

fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

fn default_true() -> bool {
    true
}

fn default_metrics_address() -> SocketAddr {
    "127.0.0.1:9090".parse().unwrap()
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}
