//! PD endpoint and refresh loop configuration

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// PD (placement driver) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdConfig {
    /// PD endpoints as `host:port`. The first one serves the HTTP API,
    /// all of them are handed to the etcd client.
    #[serde(default)]
    pub endpoints: Vec<String>,
}

impl Default for PdConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["127.0.0.1:2379".to_string()],
        }
    }
}

impl PdConfig {
    /// Validate PD configuration
    pub fn validate(&self) -> Result<()> {
        if self.endpoints.is_empty() {
            return Err(anyhow::anyhow!(
                "unexpected empty pd endpoints, please specify at least one pd endpoint"
            ));
        }

        if let Some(blank) = self.endpoints.iter().position(|e| e.trim().is_empty()) {
            return Err(anyhow::anyhow!("pd endpoint #{} is empty", blank));
        }

        Ok(())
    }
}

/// Topology refresh loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Refresh interval in seconds, also the deadline of one refresh cycle
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,

    /// Connection timeout for registry clients in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
}

fn default_refresh_interval() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    5
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            refresh_interval: default_refresh_interval(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

impl DiscoveryConfig {
    /// Validate the refresh loop configuration
    pub fn validate(&self) -> Result<()> {
        if self.refresh_interval == 0 {
            return Err(anyhow::anyhow!(
                "Discovery refresh_interval must be greater than 0"
            ));
        }

        if self.connect_timeout == 0 {
            return Err(anyhow::anyhow!(
                "Discovery connect_timeout must be greater than 0"
            ));
        }

        Ok(())
    }

    pub fn refresh_duration(&self) -> Duration {
        Duration::from_secs(self.refresh_interval)
    }

    pub fn connect_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }
}
