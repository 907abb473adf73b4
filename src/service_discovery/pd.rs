//! PD HTTP API client and the PD / store sources built on it
//!
//! Only the first PD endpoint is queried; PD forwards to its leader
//! internally, failover across endpoints is not attempted.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{TopologyError, TopologyResult};
use crate::service_discovery::status::ComponentStatus;
use crate::service_discovery::traits::{
    endpoint_url, parse_host_port, parse_url_host_port, with_deadline, ComponentSource,
};
use crate::tls::TlsMaterial;
use crate::topology::{Component, ComponentName};

const REGISTRY: &str = "pd";
const API_PREFIX: &str = "/pd/api/v1";

#[derive(Debug, Clone, Deserialize)]
pub struct PdMember {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub member_id: u64,
    #[serde(default)]
    pub client_urls: Vec<String>,
    #[serde(default)]
    pub binary_version: String,
    #[serde(default)]
    pub git_hash: String,
    #[serde(default)]
    pub deploy_path: String,
}

#[derive(Debug, Deserialize)]
struct MembersResponse {
    #[serde(default)]
    members: Option<Vec<PdMember>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PdMemberHealth {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub member_id: u64,
    #[serde(default)]
    pub health: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreLabel {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreMeta {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub state_name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub status_address: String,
    #[serde(default)]
    pub labels: Option<Vec<StoreLabel>>,
    #[serde(default)]
    pub start_timestamp: i64,
}

impl StoreMeta {
    /// TiFlash stores carry the `engine=tiflash` label
    pub fn is_tiflash(&self) -> bool {
        self.labels
            .as_deref()
            .unwrap_or_default()
            .iter()
            .any(|label| label.key == "engine" && label.value == "tiflash")
    }
}

#[derive(Debug, Deserialize)]
struct StoreEntry {
    store: StoreMeta,
}

#[derive(Debug, Deserialize)]
struct StoresResponse {
    #[serde(default)]
    stores: Option<Vec<StoreEntry>>,
}

/// A PD member with its health
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdInstance {
    pub name: String,
    pub ip: String,
    pub port: u16,
    pub version: String,
    pub status: ComponentStatus,
}

/// A TiKV or TiFlash store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreInstance {
    pub id: u64,
    pub ip: String,
    pub port: u16,
    pub status_port: u16,
    pub version: String,
    pub status: ComponentStatus,
}

/// Client for the PD HTTP API
pub struct PdClient {
    client: reqwest::Client,
    base_url: String,
}

impl std::fmt::Debug for PdClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdClient")
            .field("base_url", &self.base_url)
            .field("client", &"<reqwest::Client>")
            .finish()
    }
}

impl PdClient {
    /// Create a client for `endpoint`. No request is sent.
    pub fn new(
        endpoint: &str,
        scheme: &str,
        tls: Option<&TlsMaterial>,
        connect_timeout: Duration,
    ) -> TopologyResult<Self> {
        if endpoint.trim().is_empty() {
            return Err(TopologyError::config("PD endpoint is empty"));
        }

        let base_url = format!("{}{}", endpoint_url(scheme, endpoint), API_PREFIX);
        reqwest::Url::parse(&base_url)
            .map_err(|e| TopologyError::config(format!("Invalid PD endpoint '{}': {}", endpoint, e)))?;

        let mut builder = reqwest::ClientBuilder::new().connect_timeout(connect_timeout);
        if let Some(tls) = tls {
            builder = tls.apply_to_http(builder)?;
        }
        let client = builder
            .build()
            .map_err(|e| TopologyError::config(format!("Failed to build PD client: {}", e)))?;

        debug!(base_url = %base_url, "PD client created");
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, deadline: Instant) -> TopologyResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let operation = format!("GET {}", path);

        with_deadline(deadline, &operation, async {
            let response = self.client.get(&url).send().await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(TopologyError::registry(
                    REGISTRY,
                    format!("GET {} returned HTTP {}: {}", path, status, body.trim()),
                ));
            }

            response.json::<T>().await.map_err(|e| {
                TopologyError::decode(REGISTRY, format!("GET {}: {}", path, e))
            })
        })
        .await
    }

    pub async fn members(&self, deadline: Instant) -> TopologyResult<Vec<PdMember>> {
        let response: MembersResponse = self.get_json("/members", deadline).await?;
        Ok(response.members.unwrap_or_default())
    }

    pub async fn health(&self, deadline: Instant) -> TopologyResult<Vec<PdMemberHealth>> {
        self.get_json("/health", deadline).await
    }

    pub async fn stores(&self, deadline: Instant) -> TopologyResult<Vec<StoreMeta>> {
        let response: StoresResponse = self.get_json("/stores", deadline).await?;
        Ok(response
            .stores
            .unwrap_or_default()
            .into_iter()
            .map(|entry| entry.store)
            .collect())
    }

    /// PD members in API order; a member is up when `/health` reports it
    /// healthy
    pub async fn pd_instances(&self, deadline: Instant) -> TopologyResult<Vec<PdInstance>> {
        let members = self.members(deadline).await?;
        let healthy: HashSet<u64> = self
            .health(deadline)
            .await?
            .into_iter()
            .filter(|h| h.health)
            .map(|h| h.member_id)
            .collect();

        let mut instances = Vec::with_capacity(members.len());
        for member in members {
            let Some(url) = member.client_urls.first() else {
                warn!(member = %member.name, "PD member has no client url, skipped");
                continue;
            };
            let Some((ip, port)) = parse_url_host_port(url) else {
                warn!(member = %member.name, url = %url, "invalid PD client url, skipped");
                continue;
            };
            let status = if healthy.contains(&member.member_id) {
                ComponentStatus::Up
            } else {
                ComponentStatus::Unreachable
            };

            instances.push(PdInstance {
                name: member.name,
                ip,
                port,
                version: member.binary_version,
                status,
            });
        }

        Ok(instances)
    }

    /// Stores split into `(tikv, tiflash)`, each in API order
    pub async fn store_instances(
        &self,
        deadline: Instant,
    ) -> TopologyResult<(Vec<StoreInstance>, Vec<StoreInstance>)> {
        let mut tikv = Vec::new();
        let mut tiflash = Vec::new();

        for store in self.stores(deadline).await? {
            let Some((ip, port)) = parse_host_port(&store.address) else {
                warn!(store = store.id, address = %store.address, "invalid store address, skipped");
                continue;
            };
            let Some((_, status_port)) = parse_host_port(&store.status_address) else {
                warn!(
                    store = store.id,
                    status_address = %store.status_address,
                    "invalid store status address, skipped"
                );
                continue;
            };

            let instance = StoreInstance {
                id: store.id,
                ip,
                port,
                status_port,
                version: store.version.clone(),
                status: ComponentStatus::from_store_state(&store.state_name),
            };

            if store.is_tiflash() {
                tiflash.push(instance);
            } else {
                tikv.push(instance);
            }
        }

        Ok((tikv, tiflash))
    }
}

/// Map up PD members to components. PD serves metrics on its client port.
pub fn pd_components(instances: Vec<PdInstance>) -> Vec<Component> {
    instances
        .into_iter()
        .filter(|instance| instance.status.is_up())
        .map(|instance| Component::new(ComponentName::PD, instance.ip, instance.port, instance.port))
        .collect()
}

/// Map up stores to components: TiKV first, then TiFlash
pub fn store_components(tikv: Vec<StoreInstance>, tiflash: Vec<StoreInstance>) -> Vec<Component> {
    let mut components = Vec::with_capacity(tikv.len() + tiflash.len());
    for (name, instances) in [(ComponentName::TiKV, tikv), (ComponentName::TiFlash, tiflash)] {
        components.extend(
            instances
                .into_iter()
                .filter(|instance| instance.status.is_up())
                .map(|instance| Component::new(name, instance.ip, instance.port, instance.status_port)),
        );
    }
    components
}

/// Cluster manager source: PD members
#[derive(Debug, Clone)]
pub struct PdSource {
    client: Arc<PdClient>,
}

impl PdSource {
    pub fn new(client: Arc<PdClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ComponentSource for PdSource {
    fn name(&self) -> &str {
        "pd"
    }

    async fn query(&self, deadline: Instant) -> TopologyResult<Vec<Component>> {
        Ok(pd_components(self.client.pd_instances(deadline).await?))
    }
}

/// Storage source: TiKV and TiFlash stores from one `/stores` call
#[derive(Debug, Clone)]
pub struct StoreSource {
    client: Arc<PdClient>,
}

impl StoreSource {
    pub fn new(client: Arc<PdClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ComponentSource for StoreSource {
    fn name(&self) -> &str {
        "stores"
    }

    async fn query(&self, deadline: Instant) -> TopologyResult<Vec<Component>> {
        let (tikv, tiflash) = self.client.store_instances(deadline).await?;
        Ok(store_components(tikv, tiflash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    fn client_for(server: &MockServer) -> Arc<PdClient> {
        Arc::new(PdClient::new(&server.uri(), "http", None, Duration::from_secs(1)).unwrap())
    }

    async fn mount_json(server: &MockServer, route: &str, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path(format!("{}{}", API_PREFIX, route)))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[test]
    fn test_client_base_url() {
        let client = PdClient::new("10.0.0.2:2379", "http", None, Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), "http://10.0.0.2:2379/pd/api/v1");

        let client = PdClient::new("10.0.0.2:2379", "https", None, Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), "https://10.0.0.2:2379/pd/api/v1");
    }

    #[test]
    fn test_client_rejects_bad_endpoint() {
        assert!(matches!(
            PdClient::new("", "http", None, Duration::from_secs(1)),
            Err(TopologyError::Config { .. })
        ));
        assert!(matches!(
            PdClient::new("10.0.0.2:notaport", "http", None, Duration::from_secs(1)),
            Err(TopologyError::Config { .. })
        ));
    }

    #[tokio::test]
    async fn test_pd_source_filters_unhealthy_members() {
        let server = MockServer::start().await;
        mount_json(
            &server,
            "/members",
            json!({
                "members": [
                    {"name": "pd-0", "member_id": 1, "client_urls": ["http://10.0.0.2:2379"], "binary_version": "v7.5.0"},
                    {"name": "pd-1", "member_id": 2, "client_urls": ["http://10.0.0.12:2379"]},
                    {"name": "pd-2", "member_id": 3, "client_urls": ["http://10.0.0.22:2379"]}
                ]
            }),
        )
        .await;
        mount_json(
            &server,
            "/health",
            json!([
                {"name": "pd-0", "member_id": 1, "health": true},
                {"name": "pd-1", "member_id": 2, "health": false}
            ]),
        )
        .await;

        let source = PdSource::new(client_for(&server));
        let components = source.query(deadline()).await.unwrap();

        assert_eq!(
            components,
            vec![Component::new(ComponentName::PD, "10.0.0.2", 2379, 2379)]
        );
    }

    #[tokio::test]
    async fn test_pd_instances_report_status() {
        let server = MockServer::start().await;
        mount_json(
            &server,
            "/members",
            json!({"members": [
                {"name": "pd-0", "member_id": 1, "client_urls": ["http://10.0.0.2:2379"], "binary_version": "v7.5.0"},
                {"name": "pd-1", "member_id": 2, "client_urls": ["http://10.0.0.12:2379"]}
            ]}),
        )
        .await;
        mount_json(&server, "/health", json!([{"member_id": 1, "health": true}])).await;

        let instances = client_for(&server).pd_instances(deadline()).await.unwrap();
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[0].version, "v7.5.0");
        assert_eq!(instances[0].status, ComponentStatus::Up);
        assert_eq!(instances[1].status, ComponentStatus::Unreachable);
    }

    #[tokio::test]
    async fn test_store_source_splits_tikv_and_tiflash() {
        let server = MockServer::start().await;
        mount_json(
            &server,
            "/stores",
            json!({
                "count": 4,
                "stores": [
                    {"store": {"id": 1, "address": "10.0.0.3:20160", "status_address": "10.0.0.3:20180", "state_name": "Up"}},
                    {"store": {"id": 2, "address": "10.0.0.4:3930", "status_address": "10.0.0.4:20292", "state_name": "Up",
                               "labels": [{"key": "engine", "value": "tiflash"}]}},
                    {"store": {"id": 3, "address": "10.0.0.5:20160", "status_address": "10.0.0.5:20180", "state_name": "Tombstone"}},
                    {"store": {"id": 4, "address": "10.0.0.6:20160", "status_address": "10.0.0.6:20180", "state_name": "Up",
                               "labels": [{"key": "zone", "value": "z1"}]}}
                ]
            }),
        )
        .await;

        let source = StoreSource::new(client_for(&server));
        let components = source.query(deadline()).await.unwrap();

        assert_eq!(
            components,
            vec![
                Component::new(ComponentName::TiKV, "10.0.0.3", 20160, 20180),
                Component::new(ComponentName::TiKV, "10.0.0.6", 20160, 20180),
                Component::new(ComponentName::TiFlash, "10.0.0.4", 3930, 20292),
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_store_list() {
        let server = MockServer::start().await;
        mount_json(&server, "/stores", json!({"count": 0, "stores": null})).await;

        let source = StoreSource::new(client_for(&server));
        assert!(source.query(deadline()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_http_error_is_registry_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pd/api/v1/members"))
            .respond_with(ResponseTemplate::new(503).set_body_string("no leader"))
            .mount(&server)
            .await;

        let err = PdSource::new(client_for(&server))
            .query(deadline())
            .await
            .unwrap_err();

        assert!(matches!(err, TopologyError::Registry { .. }));
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_malformed_payload_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pd/api/v1/stores"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = StoreSource::new(client_for(&server))
            .query(deadline())
            .await
            .unwrap_err();
        assert!(matches!(err, TopologyError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_malformed_store_is_skipped() {
        let server = MockServer::start().await;
        mount_json(
            &server,
            "/stores",
            json!({"stores": [
                {"store": {"id": 7, "address": "10.0.0.3", "status_address": "10.0.0.3:20180", "state_name": "Up"}},
                {"store": {"id": 8, "address": "10.0.0.8:20160", "status_address": "10.0.0.8:20180", "state_name": "Up"}},
                {"store": {"id": 9, "address": "10.0.0.9:20160", "status_address": "", "state_name": "Tombstone"}}
            ]}),
        )
        .await;

        let components = StoreSource::new(client_for(&server))
            .query(deadline())
            .await
            .unwrap();
        assert_eq!(
            components,
            vec![Component::new(ComponentName::TiKV, "10.0.0.8", 20160, 20180)]
        );
    }

    #[tokio::test]
    async fn test_pd_member_without_client_url_is_skipped() {
        let server = MockServer::start().await;
        mount_json(
            &server,
            "/members",
            json!({"members": [
                {"name": "pd-x", "member_id": 5, "client_urls": []},
                {"name": "pd-y", "member_id": 6, "client_urls": ["not a url"]},
                {"name": "pd-0", "member_id": 1, "client_urls": ["http://10.0.0.2:2379"]}
            ]}),
        )
        .await;
        mount_json(
            &server,
            "/health",
            json!([
                {"member_id": 1, "health": true},
                {"member_id": 5, "health": true},
                {"member_id": 6, "health": true}
            ]),
        )
        .await;

        let components = PdSource::new(client_for(&server))
            .query(deadline())
            .await
            .unwrap();
        assert_eq!(
            components,
            vec![Component::new(ComponentName::PD, "10.0.0.2", 2379, 2379)]
        );
    }

    #[tokio::test]
    async fn test_slow_registry_hits_deadline() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pd/api/v1/stores"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"stores": []}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let source = StoreSource::new(client_for(&server));
        let err = source
            .query(Instant::now() + Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, TopologyError::Timeout { .. }));
    }
}
