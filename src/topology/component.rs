use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Cluster role of a discovered component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentName {
    /// SQL layer
    #[serde(rename = "tidb")]
    TiDB,
    /// Placement driver / cluster manager
    #[serde(rename = "pd")]
    PD,
    /// Transactional row store
    #[serde(rename = "tikv")]
    TiKV,
    /// Analytical column store
    #[serde(rename = "tiflash")]
    TiFlash,
}

impl ComponentName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentName::TiDB => "tidb",
            ComponentName::PD => "pd",
            ComponentName::TiKV => "tikv",
            ComponentName::TiFlash => "tiflash",
        }
    }
}

impl fmt::Display for ComponentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One healthy cluster member, normalized across registries
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Component {
    pub name: ComponentName,
    pub ip: String,
    pub port: u16,
    pub status_port: u16,
}

impl Component {
    pub fn new(name: ComponentName, ip: impl Into<String>, port: u16, status_port: u16) -> Self {
        Self {
            name,
            ip: ip.into(),
            port,
            status_port,
        }
    }

    /// Service address as `ip:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// Status (metrics) address as `ip:status_port`
    pub fn status_address(&self) -> String {
        format!("{}:{}", self.ip, self.status_port)
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({}:{}, status {})",
            self.name, self.ip, self.port, self.status_port
        )
    }
}

/// Ordered result of one successful refresh cycle: TiDB, then PD, then
/// TiKV, then TiFlash. Shared, never mutated after publication.
pub type Snapshot = Arc<Vec<Component>>;
