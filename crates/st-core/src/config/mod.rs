//! Configuration management

mod catalog;
mod client;
mod coordinator;
pub mod serde_utils;

pub use catalog::{CatalogConfig, CatalogFormat, FilterPrecedence, PriorityOrder};
pub use client::{ClientProfile, PartnerRelay};
pub use coordinator::{ConnectFailurePolicy, CoordinatorConfig, RoundPolicyConfig};

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("relay-speedtest")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
        burst_duration = 15
        on_connect_failure = "abort"
        checkpoint_path = "/var/lib/speedtest/state.json"

        [round]
        policy = "exhausted"
        max_round = 3

        [catalog]
        path = "/var/lib/tor/cached-consensus"
        format = "consensus"
        blacklist = ["$aaaa"]
        order = "descending"

        [clients.speedtest0]
        control_address = "127.0.0.1:9090"
        partner = { fingerprint = "70AB9FC42C2FE750B24EECD27F7C25139F01EB6C", nickname = "SpeedTest0" }

        [clients.speedtest1]
        control_address = "127.0.0.1:9091"
        password = "secret"
        partner = { fingerprint = "244FA0202C1C0614348A083CC30413C1CCBB76BC" }
    "#;

    #[test]
    fn test_load_missing_config() {
        let dir = TempDir::new().unwrap();
        let result = load_config::<CoordinatorConfig>(&dir.path().join("missing.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_load_sample_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config: CoordinatorConfig = load_config(&path).unwrap();

        assert_eq!(config.burst_duration, Duration::from_secs(15));
        assert_eq!(config.soft_timeout, Duration::from_secs(25));
        assert_eq!(config.on_connect_failure, ConnectFailurePolicy::Abort);
        assert_eq!(
            config.round,
            RoundPolicyConfig::Exhausted { max_round: Some(3) }
        );
        assert_eq!(config.catalog.format, CatalogFormat::Consensus);
        assert_eq!(config.catalog.order, PriorityOrder::Descending);
        assert_eq!(config.clients.len(), 2);
        assert_eq!(
            config.clients["speedtest0"].partner.nickname.as_deref(),
            Some("SpeedTest0")
        );
        assert_eq!(
            config.clients["speedtest1"].password.as_deref(),
            Some("secret")
        );
        config.validate().unwrap();
    }
}
