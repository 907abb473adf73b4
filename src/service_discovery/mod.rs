//! Registry adapters
//!
//! Each adapter queries one upstream registry and returns the healthy
//! instances it knows about as normalized components:
//! - etcd: TiDB servers registered under `/topology/tidb/`
//! - PD members: the PD HTTP API `/members` + `/health`
//! - Stores: the PD HTTP API `/stores`, split into TiKV and TiFlash

pub mod etcd;
pub mod pd;
pub mod status;
pub mod traits;

pub use etcd::{TidbInstance, TidbSource};
pub use pd::{PdClient, PdInstance, PdSource, StoreInstance, StoreSource};
pub use status::ComponentStatus;
pub use traits::{with_deadline, ComponentSource};
