//! # topo-discovery - cluster topology discovery for TiDB deployments
//!
//! Keeps an up-to-date list of the healthy members of a TiDB cluster and
//! pushes it to any number of subscribers.
//!
//! ## Sources
//!
//! - **TiDB**: server registrations under `/topology/tidb/` in PD's etcd
//! - **PD**: the PD members API, filtered by `/health`
//! - **TiKV / TiFlash**: the PD stores API, split on the `engine` label
//!
//! Every refresh queries the sources in that order under one deadline. The
//! result is published as an immutable [`Snapshot`]; a failed refresh keeps
//! the previous one.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use topo_discovery::{config::Config, TopologyDiscoverer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_file_with_env("config/config.toml").await?;
//!     let discoverer = TopologyDiscoverer::new(&config).await?;
//!     let mut updates = discoverer.subscribe();
//!     discoverer.start()?;
//!
//!     while let Some(snapshot) = updates.recv().await {
//!         for component in snapshot.iter() {
//!             println!("{}", component);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod service_discovery;
pub mod tls;
pub mod topology;

// Re-export commonly used types
pub use error::{ErrorSeverity, TopologyError, TopologyResult};
pub use service_discovery::{ComponentSource, ComponentStatus};
pub use topology::{
    Component, ComponentName, Mailbox, Snapshot, TopologyDiscoverer, TopologySubscriber,
};
