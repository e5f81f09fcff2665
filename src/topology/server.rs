use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

use super::handshake::HandshakeResult;

/// Describes the server role within a server set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ServerType {
    /// Standalone server.
    Standalone,
    /// Shard router.
    Mongos,
    /// Named as primary by another member but not yet heard from.
    PossiblePrimary,
    /// Replica set primary.
    RSPrimary,
    /// Replica set secondary.
    RSSecondary,
    /// Replica set arbiter.
    RSArbiter,
    /// Replica set member of some other type.
    RSOther,
    /// Replica set ghost member.
    RSGhost,
    /// Server type is currently unknown.
    Unknown,
}

impl ServerType {
    pub fn as_str(&self) -> &'static str {
        match *self {
            ServerType::Standalone => "Standalone",
            ServerType::Mongos => "Mongos",
            ServerType::PossiblePrimary => "PossiblePrimary",
            ServerType::RSPrimary => "RSPrimary",
            ServerType::RSSecondary => "RSSecondary",
            ServerType::RSArbiter => "RSArbiter",
            ServerType::RSOther => "RSOther",
            ServerType::RSGhost => "RSGhost",
            ServerType::Unknown => "Unknown",
        }
    }
}

impl FromStr for ServerType {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "Standalone" => ServerType::Standalone,
            "Mongos" => ServerType::Mongos,
            "PossiblePrimary" => ServerType::PossiblePrimary,
            "RSPrimary" => ServerType::RSPrimary,
            "RSSecondary" => ServerType::RSSecondary,
            "RSArbiter" => ServerType::RSArbiter,
            "RSOther" => ServerType::RSOther,
            "RSGhost" => ServerType::RSGhost,
            _ => ServerType::Unknown,
        })
    }
}

impl fmt::Display for ServerType {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(self.as_str())
    }
}

/// A snapshot of one node used in topology descriptions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerDescription {
    pub address: String,
    pub server_type: ServerType,
    pub hosts: Vec<String>,
    pub arbiters: Vec<String>,
    pub passives: Vec<String>,
    pub set_name: Option<String>,
}

impl ServerDescription {
    /// An unknown description for `address`.
    pub fn new(address: &str) -> ServerDescription {
        ServerDescription {
            address: address.to_owned(),
            server_type: ServerType::Unknown,
            hosts: Vec::new(),
            arbiters: Vec::new(),
            passives: Vec::new(),
            set_name: None,
        }
    }

    pub fn from_handshake(address: &str, handshake: &HandshakeResult) -> ServerDescription {
        ServerDescription {
            address: address.to_owned(),
            server_type: handshake.server_type(),
            hosts: handshake.hosts.clone(),
            arbiters: handshake.arbiters.clone(),
            passives: handshake.passives.clone(),
            set_name: handshake.set_name.clone(),
        }
    }
}

/// A monitored node, as seen by the replica set state machine.
///
/// Nodes are handles: clones refer to the same underlying server and its connection pool.
pub trait Node: Clone {
    /// The normalized `host:port` address the node was reached under.
    fn name(&self) -> &str;

    /// The most recent handshake reply, if the last check succeeded.
    fn last_handshake(&self) -> Option<HandshakeResult>;

    fn is_connected(&self) -> bool;

    /// Tears down the node's connections.
    fn destroy(&self);

    fn equals(&self, other: &Self) -> bool {
        self.name() == other.name()
    }

    fn description(&self) -> ServerDescription {
        match self.last_handshake() {
            Some(ref handshake) => ServerDescription::from_handshake(self.name(), handshake),
            None => ServerDescription::new(self.name()),
        }
    }
}
