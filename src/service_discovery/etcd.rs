//! TiDB discovery through the etcd embedded in PD
//!
//! Every TiDB server keeps two keys under `/topology/tidb/<host:port>/`:
//! `info` holds a JSON description including the status port, `ttl` holds
//! the unix time in nanoseconds of its last heartbeat. A server is up when
//! both exist and the heartbeat is recent.

use async_trait::async_trait;
use etcd_client::{Client, ConnectOptions, GetOptions};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{TopologyError, TopologyResult};
use crate::service_discovery::status::ComponentStatus;
use crate::service_discovery::traits::{endpoint_url, parse_host_port, with_deadline, ComponentSource};
use crate::tls::TlsMaterial;
use crate::topology::{Component, ComponentName};

/// Key prefix TiDB servers register under
pub const TIDB_TOPOLOGY_PREFIX: &str = "/topology/tidb/";

/// A heartbeat older than this marks the server unreachable
pub const TIDB_TTL_FRESHNESS: Duration = Duration::from_secs(45);

const REGISTRY: &str = "etcd";

#[derive(Debug, Deserialize)]
struct TidbTopologyInfo {
    #[serde(default)]
    version: String,
    #[serde(default)]
    git_hash: String,
    status_port: u16,
    #[serde(default)]
    deploy_path: String,
    #[serde(default)]
    start_timestamp: i64,
}

/// A TiDB server as registered in etcd
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TidbInstance {
    pub ip: String,
    pub port: u16,
    pub status_port: u16,
    pub version: String,
    pub git_hash: String,
    pub deploy_path: String,
    pub start_timestamp: i64,
    pub status: ComponentStatus,
}

/// Decode the TiDB topology from `(key, value)` pairs under
/// [`TIDB_TOPOLOGY_PREFIX`]. `now_nanos` is the current unix time in
/// nanoseconds. Result is sorted by `(ip, port)`.
pub fn parse_tidb_topology<'a, I>(entries: I, now_nanos: i64) -> Vec<TidbInstance>
where
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    let mut infos: BTreeMap<String, TidbInstance> = BTreeMap::new();
    let mut alive: HashSet<String> = HashSet::new();

    for (key, value) in entries {
        let Some(remaining) = key.strip_prefix(TIDB_TOPOLOGY_PREFIX) else {
            continue;
        };
        let mut parts = remaining.trim_end_matches('/').split('/');
        let (Some(address), Some(kind), None) = (parts.next(), parts.next(), parts.next()) else {
            continue;
        };

        match kind {
            "info" => match parse_tidb_info(address, value) {
                Ok(instance) => {
                    infos.insert(address.to_string(), instance);
                }
                Err(e) => warn!(address = %address, "Skipping malformed TiDB topology info: {}", e),
            },
            "ttl" => {
                if is_ttl_fresh(value, now_nanos) {
                    alive.insert(address.to_string());
                }
            }
            _ => {}
        }
    }

    let mut instances: Vec<TidbInstance> = infos
        .into_iter()
        .map(|(address, mut instance)| {
            if alive.contains(&address) {
                instance.status = ComponentStatus::Up;
            }
            instance
        })
        .collect();

    instances.sort_by(|a, b| a.ip.cmp(&b.ip).then(a.port.cmp(&b.port)));
    instances
}

fn parse_tidb_info(address: &str, value: &[u8]) -> TopologyResult<TidbInstance> {
    let (ip, port) = parse_host_port(address).ok_or_else(|| {
        TopologyError::decode(REGISTRY, format!("invalid TiDB address '{}'", address))
    })?;
    let info: TidbTopologyInfo = serde_json::from_slice(value)?;

    Ok(TidbInstance {
        ip,
        port,
        status_port: info.status_port,
        version: info.version,
        git_hash: info.git_hash,
        deploy_path: info.deploy_path,
        start_timestamp: info.start_timestamp,
        status: ComponentStatus::Unreachable,
    })
}

fn is_ttl_fresh(value: &[u8], now_nanos: i64) -> bool {
    let Some(ttl_nanos) = std::str::from_utf8(value)
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
    else {
        return false;
    };

    now_nanos.saturating_sub(ttl_nanos) <= TIDB_TTL_FRESHNESS.as_nanos() as i64
}

/// Map up TiDB instances to components, keeping their order
pub fn tidb_components(instances: Vec<TidbInstance>) -> Vec<Component> {
    instances
        .into_iter()
        .filter(|instance| instance.status.is_up())
        .map(|instance| {
            Component::new(
                ComponentName::TiDB,
                instance.ip,
                instance.port,
                instance.status_port,
            )
        })
        .collect()
}

/// SQL tier source backed by etcd
pub struct TidbSource {
    client: Mutex<Option<Client>>,
}

impl std::fmt::Debug for TidbSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TidbSource")
            .field("client", &"<etcd_client::Client>")
            .finish()
    }
}

impl TidbSource {
    /// Create the etcd client over all PD endpoints
    pub async fn connect(
        endpoints: &[String],
        scheme: &str,
        tls: Option<&TlsMaterial>,
        connect_timeout: Duration,
    ) -> TopologyResult<Self> {
        if endpoints.is_empty() {
            return Err(TopologyError::config(
                "unexpected empty pd endpoints, please specify at least one pd endpoint",
            ));
        }

        let urls: Vec<String> = endpoints
            .iter()
            .map(|endpoint| endpoint_url(scheme, endpoint))
            .collect();

        let mut options = ConnectOptions::new().with_connect_timeout(connect_timeout);
        if let Some(tls) = tls {
            options = options.with_tls(tls.etcd_tls_options());
        }

        let client = Client::connect(&urls, Some(options)).await?;
        debug!(endpoints = ?urls, "etcd client created");

        Ok(Self {
            client: Mutex::new(Some(client)),
        })
    }

    fn client(&self) -> TopologyResult<Client> {
        let guard = self
            .client
            .lock()
            .map_err(|_| TopologyError::registry(REGISTRY, "client lock poisoned"))?;
        guard
            .as_ref()
            .cloned()
            .ok_or_else(|| TopologyError::closed(REGISTRY))
    }
}

#[async_trait]
impl ComponentSource for TidbSource {
    fn name(&self) -> &str {
        REGISTRY
    }

    async fn query(&self, deadline: Instant) -> TopologyResult<Vec<Component>> {
        let mut client = self.client()?;

        let response = with_deadline(deadline, "etcd get /topology/tidb/", async {
            client
                .get(TIDB_TOPOLOGY_PREFIX, Some(GetOptions::new().with_prefix()))
                .await
                .map_err(TopologyError::from)
        })
        .await?;

        let now_nanos = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or(i64::MAX);
        let entries = response
            .kvs()
            .iter()
            .filter_map(|kv| kv.key_str().ok().map(|key| (key, kv.value())));

        Ok(tidb_components(parse_tidb_topology(entries, now_nanos)))
    }

    async fn close(&self) -> TopologyResult<()> {
        let client = self
            .client
            .lock()
            .map_err(|_| TopologyError::registry(REGISTRY, "client lock poisoned"))?
            .take();

        if client.is_some() {
            debug!("etcd client released");
        }
        Ok(())
    }
}
