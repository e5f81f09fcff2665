use std::fmt::{Display, Error as FmtError, Formatter};

use crate::error::Error;
use crate::topology::TopologyDescriptionChangedEvent;

/// Lifecycle notifications published by a connection pool.
#[derive(Debug, Clone)]
pub enum PoolEvent {
    /// The initial connection is established and authenticated.
    Connect,
    /// The last live socket closed. Socket errors are reported here as well.
    Close(Option<Error>),
    /// The last live socket timed out.
    Timeout(Option<Error>),
    /// The last live socket received an undecodable message.
    ParseError(Option<Error>),
    /// The initial connection or its authentication failed.
    Error(Error),
    AttemptReconnect,
    Reconnect,
    /// The reconnect budget is exhausted; the pool is destroyed.
    ReconnectFailed(Error),
    Destroyed,
}

impl Display for PoolEvent {
    fn fmt(&self, fmt: &mut Formatter) -> Result<(), FmtError> {
        match *self {
            PoolEvent::Connect => fmt.write_str("POOL CONNECT"),
            PoolEvent::Close(ref err) => write_with_cause(fmt, "POOL CLOSE", err),
            PoolEvent::Timeout(ref err) => write_with_cause(fmt, "POOL TIMEOUT", err),
            PoolEvent::ParseError(ref err) => write_with_cause(fmt, "POOL PARSE ERROR", err),
            PoolEvent::Error(ref err) => write!(fmt, "POOL ERROR: {}", err),
            PoolEvent::AttemptReconnect => fmt.write_str("POOL ATTEMPT RECONNECT"),
            PoolEvent::Reconnect => fmt.write_str("POOL RECONNECT"),
            PoolEvent::ReconnectFailed(ref err) => write!(fmt, "POOL RECONNECT FAILED: {}", err),
            PoolEvent::Destroyed => fmt.write_str("POOL DESTROYED"),
        }
    }
}

fn write_with_cause(fmt: &mut Formatter, name: &str, err: &Option<Error>) -> Result<(), FmtError> {
    match *err {
        Some(ref err) => write!(fmt, "{}: {}", name, err),
        None => fmt.write_str(name),
    }
}

/// The role a node plays in the replica set lists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ServerRole {
    Primary,
    Secondary,
    Arbiter,
}

impl Display for ServerRole {
    fn fmt(&self, fmt: &mut Formatter) -> Result<(), FmtError> {
        fmt.write_str(match *self {
            ServerRole::Primary => "primary",
            ServerRole::Secondary => "secondary",
            ServerRole::Arbiter => "arbiter",
        })
    }
}

/// Membership notifications published by a replica set topology.
#[derive(Debug, Clone)]
pub enum TopologyEvent<N> {
    Joined { role: ServerRole, node: N },
    Left { role: ServerRole, node: N },
    TopologyDescriptionChanged(TopologyDescriptionChangedEvent),
}
