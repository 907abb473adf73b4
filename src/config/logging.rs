use serde::{Deserialize, Serialize};

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Level for this crate: trace, debug, info, warn or error
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

impl LogConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        match self.level.to_ascii_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
            other => Err(anyhow::anyhow!("Unknown log level '{}'", other)),
        }
    }

    /// Filter directive for `tracing_subscriber::EnvFilter`
    pub fn env_filter(&self, verbose: bool) -> String {
        let level = if verbose {
            "debug".to_string()
        } else {
            self.level.to_ascii_lowercase()
        };
        format!("topo_discovery={}", level)
    }
}
