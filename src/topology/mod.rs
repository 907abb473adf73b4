//! Cluster topology model and the discovery control loop

pub mod aggregator;
pub mod component;
pub mod discoverer;
pub mod subscriber;

pub use aggregator::Aggregator;
pub use component::{Component, ComponentName, Snapshot};
pub use discoverer::{TopologyDiscoverer, DEFAULT_DISCOVER_INTERVAL};
pub use subscriber::{Mailbox, SubscriberRegistry, TopologySubscriber};
