//! Kernel configuration

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Environment variable read by `KernelConfig::from_env`
pub const STOP_POLICY_ENV: &str = "SKEIN_STOP_POLICY";

/// What happens to strands still suspended when the kernel stops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopPolicy {
    /// Resume each with `KernelStopped` so it can clean up and exit
    #[default]
    Notify,
    /// Terminate each
    Terminate,
}

impl FromStr for StopPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "notify" => Ok(Self::Notify),
            "terminate" => Ok(Self::Terminate),
            _ => Err(ConfigError::InvalidStopPolicy(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid stop policy `{0}` (expected `notify` or `terminate`)")]
    InvalidStopPolicy(String),
}

/// Kernel settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KernelConfig {
    pub stop_policy: StopPolicy,
}

impl KernelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop_policy(mut self, policy: StopPolicy) -> Self {
        self.stop_policy = policy;
        self
    }

    /// Defaults, overridden by `SKEIN_STOP_POLICY` when set
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(value) = std::env::var(STOP_POLICY_ENV) {
            config.stop_policy = value.parse()?;
        }
        Ok(config)
    }
}
