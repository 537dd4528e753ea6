//! Logger Configuration
//!
//! Layered as built-in defaults, then an optional TOML file, then `SSM_*`
//! environment variables (`SSM_PORT`, `SSM_LOG_LEVEL`,
//! `SSM_SUBSCRIPTION=RPM,Boost`, ...).

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use ssm_poller::PollerConfig;
use ssm_protocol::{SessionConfig, Target};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Serial port; the first enumerated port when absent
    pub port: Option<String>,
    pub target: Target,
    /// Directory definition documents are read from
    pub asset_dir: PathBuf,
    /// Logger definition document; the bootstrap list when absent
    pub logger_definition: Option<String>,
    /// Parameter range table
    pub range_table: Option<String>,
    /// Parameters polled from startup
    pub subscription: Vec<String>,
    pub poll_delay_ms: u64,
    pub idle_delay_ms: u64,
    pub log_level: String,
    pub log_json: bool,
    /// Prometheus listen address; no exporter when absent
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            port: None,
            target: Target::Ecu,
            asset_dir: PathBuf::from("assets"),
            logger_definition: None,
            range_table: None,
            subscription: vec![
                "Engine Speed".to_string(),
                "Coolant Temp".to_string(),
                "Boost".to_string(),
            ],
            poll_delay_ms: 50,
            idle_delay_ms: 200,
            log_level: "info".to_string(),
            log_json: false,
            metrics_addr: None,
        }
    }
}

impl LoggerConfig {
    /// Load configuration. An explicitly named file must exist.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(true));
        }
        builder
            .add_source(
                Environment::with_prefix("SSM")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("subscription"),
            )
            .build()?
            .try_deserialize()
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            target: self.target,
            ..SessionConfig::default()
        }
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            poll_delay: Duration::from_millis(self.poll_delay_ms),
            idle_delay: Duration::from_millis(self.idle_delay_ms),
            ..PollerConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LoggerConfig::default();
        assert_eq!(config.target, Target::Ecu);
        assert!(config.logger_definition.is_none());
        assert_eq!(config.poller_config().poll_delay, Duration::from_millis(50));
        assert_eq!(config.session_config().failure_threshold, 3);
    }

    #[test]
    fn test_load_file_overrides_defaults() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/testdata/logger.toml");
        let config = LoggerConfig::load(Some(path)).unwrap();
        assert_eq!(config.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.target, Target::Tcu);
        assert_eq!(config.logger_definition.as_deref(), Some("logger_definition.xml"));
        assert_eq!(config.subscription, vec!["RPM".to_string(), "MAP".to_string()]);
        assert_eq!(config.poll_delay_ms, 100);
        // unset keys keep their defaults
        assert_eq!(config.idle_delay_ms, 200);
        assert_eq!(config.metrics_addr, Some("127.0.0.1:9000".parse().unwrap()));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        assert!(LoggerConfig::load(Some("/nonexistent/ssm-logger.toml")).is_err());
    }
}
