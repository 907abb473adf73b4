//! Core trait and helpers shared by the registry adapters
//!
//! Every adapter queries one upstream registry, drops instances that are
//! not up, and returns normalized [`Component`] records in its own order.

use async_trait::async_trait;
use std::future::Future;
use tokio::time::Instant;

use crate::error::{TopologyError, TopologyResult};
use crate::topology::Component;

/// A registry of live instances for one or more tiers
#[async_trait]
pub trait ComponentSource: Send + Sync {
    /// Short registry name used in logs and errors
    fn name(&self) -> &str;

    /// Fetch the healthy components of this source.
    ///
    /// Every network call made here must finish before `deadline`; the
    /// deadline is shared with the other sources of the same cycle.
    async fn query(&self, deadline: Instant) -> TopologyResult<Vec<Component>>;

    /// Release the underlying registry connection.
    ///
    /// Queries after `close` fail with [`TopologyError::Closed`] for
    /// sources that hold a connection.
    async fn close(&self) -> TopologyResult<()> {
        Ok(())
    }
}

/// Run `fut` until `deadline`, turning an expired deadline into a
/// [`TopologyError::Timeout`] for `operation`
pub async fn with_deadline<T, F>(deadline: Instant, operation: &str, fut: F) -> TopologyResult<T>
where
    F: Future<Output = TopologyResult<T>>,
{
    let started = Instant::now();
    match tokio::time::timeout_at(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(TopologyError::timeout(started.elapsed(), operation)),
    }
}

/// Split `host:port` (or `[v6]:port`) into its parts
pub fn parse_host_port(address: &str) -> Option<(String, u16)> {
    let address = address.trim();
    let (host, port) = address.rsplit_once(':')?;
    let port = port.parse::<u16>().ok()?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return None;
    }
    Some((host.to_string(), port))
}

/// Host and port of a URL such as `http://10.0.0.2:2379`
pub fn parse_url_host_port(url: &str) -> Option<(String, u16)> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    let port = parsed.port_or_known_default()?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    Some((host.to_string(), port))
}

/// Prefix `endpoint` with `scheme://` unless it already carries a scheme
pub fn endpoint_url(scheme: &str, endpoint: &str) -> String {
    let endpoint = endpoint.trim().trim_end_matches('/');
    if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("{}://{}", scheme, endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_host_port() {
        assert_eq!(
            parse_host_port("10.0.0.3:20160"),
            Some(("10.0.0.3".to_string(), 20160))
        );
        assert_eq!(
            parse_host_port("tikv-0.tikv-peer:20160"),
            Some(("tikv-0.tikv-peer".to_string(), 20160))
        );
        assert_eq!(parse_host_port("[::1]:4000"), Some(("::1".to_string(), 4000)));
        assert_eq!(parse_host_port("10.0.0.3"), None);
        assert_eq!(parse_host_port("10.0.0.3:notaport"), None);
        assert_eq!(parse_host_port(":4000"), None);
    }

    #[test]
    fn test_parse_url_host_port() {
        assert_eq!(
            parse_url_host_port("http://10.0.0.2:2379"),
            Some(("10.0.0.2".to_string(), 2379))
        );
        assert_eq!(
            parse_url_host_port("https://pd.local"),
            Some(("pd.local".to_string(), 443))
        );
        assert_eq!(parse_url_host_port("not a url"), None);
    }

    #[test]
    fn test_endpoint_url() {
        assert_eq!(endpoint_url("http", "10.0.0.2:2379"), "http://10.0.0.2:2379");
        assert_eq!(
            endpoint_url("https", "https://10.0.0.2:2379/"),
            "https://10.0.0.2:2379"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_deadline_times_out() {
        let deadline = Instant::now() + Duration::from_secs(1);
        let result: TopologyResult<()> = with_deadline(deadline, "slow registry", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        match result {
            Err(TopologyError::Timeout { operation, .. }) => assert_eq!(operation, "slow registry"),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_with_deadline_passes_result_through() {
        let deadline = Instant::now() + Duration::from_secs(5);
        let result = with_deadline(deadline, "fast registry", async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);

        let result: TopologyResult<u8> = with_deadline(deadline, "failing registry", async {
            Err(TopologyError::registry("pd", "HTTP 500"))
        })
        .await;
        assert!(matches!(result, Err(TopologyError::Registry { .. })));
    }
}
