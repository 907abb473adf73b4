use std::fmt;
use thiserror::Error;
use tokio::time::Duration;

/// Main error type for topology discovery
#[derive(Error, Debug, Clone)]
pub enum TopologyError {
    /// Configuration related errors, fatal at construction
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// TLS material could not be loaded or applied
    #[error("TLS error: {message}")]
    Tls { message: String },

    /// An upstream registry call failed
    #[error("Registry error: {registry}: {message}")]
    Registry { registry: String, message: String },

    /// A registry answered with a payload we could not understand
    #[error("Decode error: {registry}: {message}")]
    Decode { registry: String, message: String },

    /// Timeout errors
    #[error("Operation timed out after {duration:?}: {operation}")]
    Timeout {
        duration: Duration,
        operation: String,
    },

    /// The registry client was already released by `close`
    #[error("Registry client closed: {registry}")]
    Closed { registry: String },

    /// `start` was called on a discoverer that is already running
    #[error("Topology discoverer already started")]
    AlreadyStarted,
}

impl TopologyError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a TLS error
    pub fn tls<S: Into<String>>(message: S) -> Self {
        Self::Tls {
            message: message.into(),
        }
    }

    /// Create a registry error
    pub fn registry<R: Into<String>, S: Into<String>>(registry: R, message: S) -> Self {
        Self::Registry {
            registry: registry.into(),
            message: message.into(),
        }
    }

    /// Create a decode error
    pub fn decode<R: Into<String>, S: Into<String>>(registry: R, message: S) -> Self {
        Self::Decode {
            registry: registry.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(duration: Duration, operation: S) -> Self {
        Self::Timeout {
            duration,
            operation: operation.into(),
        }
    }

    /// Create a closed-client error
    pub fn closed<R: Into<String>>(registry: R) -> Self {
        Self::Closed {
            registry: registry.into(),
        }
    }

    /// Whether the failure belongs to a single refresh cycle and goes away
    /// on its own at the next tick
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TopologyError::Registry { .. }
                | TopologyError::Decode { .. }
                | TopologyError::Timeout { .. }
        )
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            TopologyError::Config { .. } => ErrorSeverity::Critical,
            TopologyError::Tls { .. } => ErrorSeverity::Critical,
            TopologyError::AlreadyStarted => ErrorSeverity::High,
            TopologyError::Closed { .. } => ErrorSeverity::Medium,
            TopologyError::Registry { .. } => ErrorSeverity::Medium,
            TopologyError::Decode { .. } => ErrorSeverity::Medium,
            TopologyError::Timeout { .. } => ErrorSeverity::Medium,
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Low => write!(f, "LOW"),
            ErrorSeverity::Medium => write!(f, "MEDIUM"),
            ErrorSeverity::High => write!(f, "HIGH"),
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Result type alias for topology operations
pub type TopologyResult<T> = Result<T, TopologyError>;

/// Convert from reqwest::Error to TopologyError
impl From<reqwest::Error> for TopologyError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            TopologyError::decode("pd", err.to_string())
        } else if err.is_builder() {
            TopologyError::config(format!("Invalid PD client: {}", err))
        } else {
            TopologyError::registry("pd", err.to_string())
        }
    }
}

/// Convert from etcd_client::Error to TopologyError
impl From<etcd_client::Error> for TopologyError {
    fn from(err: etcd_client::Error) -> Self {
        match err {
            etcd_client::Error::InvalidArgs(msg) => {
                TopologyError::config(format!("Invalid etcd client: {}", msg))
            }
            etcd_client::Error::InvalidUri(e) => {
                TopologyError::config(format!("Invalid etcd endpoint: {}", e))
            }
            other => TopologyError::registry("etcd", other.to_string()),
        }
    }
}

/// Convert from serde_json::Error to TopologyError
impl From<serde_json::Error> for TopologyError {
    fn from(err: serde_json::Error) -> Self {
        TopologyError::decode("json", err.to_string())
    }
}
