//! Pool and Topology Monitoring
//!
//! Observers register hooks on a `Listener` owned by a pool or a replica set topology. Every
//! lifecycle change of a pool is published as a `PoolEvent`; membership and role changes of a
//! replica set are published as a `TopologyEvent`, including a description diff whenever the
//! topology materially changes.
mod event;
mod listener;

pub use self::event::{PoolEvent, ServerRole, TopologyEvent};
pub use self::listener::{Hook, Listener};
