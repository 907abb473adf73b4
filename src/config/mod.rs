//! # Configuration
//!
//! TOML configuration for the topology discoverer:
//!
//! - `pd`: PD endpoints, the first one serves the HTTP API
//! - `security`: client TLS material shared by both registry clients
//! - `discovery`: refresh interval and client timeouts
//! - `log`: log level for the binary
//!
//! `${VAR}` and `${VAR:-default}` references are expanded from the
//! environment before parsing.
//!
//! ```rust,no_run
//! use topo_discovery::config::Config;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::from_file_with_env("config.toml").await?;
//! println!("PD endpoints: {:?}", config.pd.endpoints);
//! # Ok(())
//! # }
//! ```

pub mod discovery;
pub mod logging;
pub mod security;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use tracing::{info, warn};

pub use discovery::{DiscoveryConfig, PdConfig};
pub use logging::LogConfig;
pub use security::SecurityConfig;

/// Top level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// PD endpoints
    #[serde(default)]
    pub pd: PdConfig,
    /// Client TLS (optional)
    #[serde(default)]
    pub security: SecurityConfig,
    /// Refresh loop settings
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    /// Logging
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Load configuration from file with environment variable expansion
    pub async fn from_file_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        let config = Self::from_toml_str(&content)?;
        info!("Configuration loaded from {:?}", path.as_ref());
        Ok(config)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let expanded_content = expand_env_vars(content);
        let config: Config = toml::from_str(&expanded_content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        self.pd.validate()?;
        self.security.validate()?;
        self.discovery.validate()?;
        self.log.validate()?;

        if self.pd.endpoints.len() > 1 {
            info!(
                "Only the first PD endpoint ({}) is used for the PD HTTP API",
                self.pd.endpoints[0]
            );
        }

        Ok(())
    }

    /// HTTP scheme for the PD API and etcd endpoints
    pub fn http_scheme(&self) -> &'static str {
        self.security.http_scheme()
    }
}

/// Expand environment variables in configuration content
/// Supports ${VAR} and ${VAR:-default} syntax
fn expand_env_vars(content: &str) -> String {
    let mut result = content.to_string();
    let mut cursor = 0;

    while let Some(offset) = result[cursor..].find("${") {
        let start = cursor + offset;
        let Some(end) = result[start..].find('}') else {
            break; // Malformed ${VAR expression
        };

        let var_expr = &result[start + 2..start + end];
        let replacement = if let Some(default_pos) = var_expr.find(":-") {
            let var_name = &var_expr[..default_pos];
            let default_value = &var_expr[default_pos + 2..];
            env::var(var_name).unwrap_or_else(|_| default_value.to_string())
        } else {
            env::var(var_expr).unwrap_or_else(|_| {
                warn!(
                    "Environment variable '{}' not found, using empty string",
                    var_expr
                );
                String::new()
            })
        };

        result.replace_range(start..start + end + 1, &replacement);
        cursor = start + replacement.len();
    }

    result
}
