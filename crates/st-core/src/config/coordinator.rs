//! Coordinator configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_secs;
use super::{CatalogConfig, ClientProfile};
use crate::error::ConfigError;

/// Configuration for the coordinator daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Scheduler cadence
    #[serde(with = "duration_secs")]
    pub tick_interval: Duration,

    /// How often the catalog is refreshed and progress is logged
    #[serde(with = "duration_secs")]
    pub heartbeat_interval: Duration,

    /// Length of each traffic burst
    #[serde(with = "duration_secs")]
    pub burst_duration: Duration,

    /// Time in one status after which a client is nudged with STOP/CLOSE
    #[serde(with = "duration_secs")]
    pub soft_timeout: Duration,

    /// Time in one status after which a client is forced back to IDLE
    #[serde(with = "duration_secs")]
    pub hard_expiry: Duration,

    /// Limit for establishing each control connection
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Where the checkpoint is written
    pub checkpoint_path: PathBuf,

    /// Where the log file is written
    pub log_path: PathBuf,

    /// What to do when a client cannot be brought up
    pub on_connect_failure: ConnectFailurePolicy,

    /// When the round counter advances
    pub round: RoundPolicyConfig,

    /// Target feed and filtering
    pub catalog: CatalogConfig,

    /// Measurement clients, by name
    pub clients: BTreeMap<String, ClientProfile>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        let config_dir = super::default_config_dir();

        Self {
            tick_interval: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(60),
            burst_duration: Duration::from_secs(20),
            soft_timeout: Duration::from_secs(25),
            hard_expiry: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            checkpoint_path: config_dir.join("speedtester.state"),
            log_path: config_dir.join("speedtester.log"),
            on_connect_failure: ConnectFailurePolicy::Degrade,
            round: RoundPolicyConfig::Fixed,
            catalog: CatalogConfig::default(),
            clients: BTreeMap::new(),
        }
    }
}

impl CoordinatorConfig {
    /// Check values that serde cannot check on its own
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.clients.is_empty() {
            return Err(ConfigError::Invalid("no clients configured".to_string()));
        }

        if self.tick_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "tick_interval must be at least one second".to_string(),
            ));
        }

        if self.burst_duration >= self.soft_timeout {
            return Err(ConfigError::Invalid(format!(
                "burst_duration ({:?}) must be shorter than soft_timeout ({:?})",
                self.burst_duration, self.soft_timeout
            )));
        }

        if self.soft_timeout >= self.hard_expiry {
            return Err(ConfigError::Invalid(format!(
                "soft_timeout ({:?}) must be shorter than hard_expiry ({:?})",
                self.soft_timeout, self.hard_expiry
            )));
        }

        for (name, profile) in &self.clients {
            if profile.control_address.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "client {} has no control_address",
                    name
                )));
            }
            if profile.partner.fingerprint.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "client {} has no partner fingerprint",
                    name
                )));
            }
        }

        Ok(())
    }
}

/// Reaction to a client whose control connection cannot be brought up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectFailurePolicy {
    /// Stop the coordinator
    Abort,
    /// Continue with the clients that did come up
    #[default]
    Degrade,
}

/// When the round counter advances
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum RoundPolicyConfig {
    /// Never advance automatically
    #[default]
    Fixed,
    /// Advance once every listed target has been measured `round` times
    Exhausted {
        /// Last round to run
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_round: Option<u32>,
    },
}
