use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::component::Component;
use crate::error::TopologyResult;
use crate::service_discovery::ComponentSource;

/// Runs every source once per cycle and concatenates their results.
///
/// Sources are queried one after the other in registration order, sharing a
/// single deadline. The first failure aborts the cycle, so a partial view is
/// never returned.
pub struct Aggregator {
    sources: Vec<Arc<dyn ComponentSource>>,
}

impl std::fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.sources.iter().map(|s| s.name()).collect();
        f.debug_struct("Aggregator").field("sources", &names).finish()
    }
}

impl Aggregator {
    pub fn new(sources: Vec<Arc<dyn ComponentSource>>) -> Self {
        Self { sources }
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    pub async fn aggregate(&self, deadline: Instant) -> TopologyResult<Vec<Component>> {
        let mut components = Vec::new();

        for source in &self.sources {
            let found = source.query(deadline).await.map_err(|e| {
                debug!(source = source.name(), error = %e, "source query failed");
                e
            })?;
            debug!(source = source.name(), count = found.len(), "source queried");
            components.extend(found);
        }

        Ok(components)
    }

    /// Close every source, reporting the first failure after all were tried
    pub async fn close(&self) -> TopologyResult<()> {
        let mut first_error = None;

        for source in &self.sources {
            if let Err(e) = source.close().await {
                warn!(source = source.name(), error = %e, "failed to close source");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
