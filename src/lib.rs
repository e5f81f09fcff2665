//! Connection pooling and replica set topology tracking for a native MongoDB driver.
//!
//! The crate is the reactor-facing core of a driver. A `ConnectionPool` owns the sockets to a
//! single node: it grows on demand up to a configured size, dispatches queued work one message
//! per connection, keeps every connection authenticated with the current credentials, and
//! reconnects with a bounded retry budget after the last socket is lost. A
//! `ReplicaSetTopology` consumes handshake replies from the nodes of a replica set and keeps a
//! consistent view of the primary and the other members.
//!
//! Neither type performs I/O or keeps time on its own. Sockets are supplied by a
//! `ConnectionFactory`, and the owning event loop feeds connection events and timer expiries
//! back in:
//!
//! ```no_run
//! # use mongodb_core::pool::{ConnectionFactory, ConnectionPool, PoolOptions};
//! # use mongodb_core::auth::{AuthProviders, CommandEncoder};
//! # use std::rc::Rc;
//! # fn encode_query(_: &str, _: &bson::Document) -> Vec<u8> { Vec::new() }
//! # fn run<F: ConnectionFactory>(factory: F) -> mongodb_core::Result<()> {
//! let options = PoolOptions::new("localhost", 27017);
//! let encoder: CommandEncoder = Rc::new(|db: &str, command: &bson::Document| -> mongodb_core::Result<Vec<u8>> {
//!     Ok(encode_query(db, command))
//! });
//! let mut pool = ConnectionPool::new(options, factory, AuthProviders::new(encoder))?;
//!
//! pool.add_hook(|event| println!("{}", event));
//! pool.connect(None)?;
//!
//! // Later, from the event loop:
//! if let Some(deadline) = pool.next_timeout() {
//!     pool.handle_timeout(deadline);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Lifecycle and membership changes are published through the hooks in `apm`.
pub mod apm;
pub mod auth;
pub mod connstring;
pub mod error;
pub mod pool;
pub mod topology;

pub use crate::error::{Error, Result};
pub use crate::pool::ConnectionPool;
pub use crate::topology::ReplicaSetTopology;
