//! Topology snapshots and the per-address role diff emitted on change.
use uuid::Uuid;

use super::server::{ServerDescription, ServerType};
use super::TopologyType;

/// The set of role-holding members at one point in time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopologyDescription {
    pub topology_type: TopologyType,
    pub set_name: Option<String>,
    pub servers: Vec<ServerDescription>,
}

impl TopologyDescription {
    /// An unknown, empty topology.
    pub fn new() -> TopologyDescription {
        TopologyDescription {
            topology_type: TopologyType::Unknown,
            set_name: None,
            servers: Vec::new(),
        }
    }

    pub fn server(&self, address: &str) -> Option<&ServerDescription> {
        self.servers.iter().find(|server| server.address == address)
    }
}

impl Default for TopologyDescription {
    fn default() -> TopologyDescription {
        TopologyDescription::new()
    }
}

/// A role change for an address present in both descriptions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerDiff {
    pub address: String,
    pub from: ServerType,
    pub to: ServerType,
}

/// Lists every address whose role differs between `previous` and `current`.
///
/// Addresses that appear in only one of the two are not reported.
pub fn diff(previous: &TopologyDescription, current: &TopologyDescription) -> Vec<ServerDiff> {
    let mut changes = Vec::new();

    for prev in &previous.servers {
        for curr in current.servers.iter().filter(|curr| curr.address == prev.address) {
            if prev.server_type != curr.server_type {
                changes.push(ServerDiff {
                    address: prev.address.clone(),
                    from: prev.server_type,
                    to: curr.server_type,
                });
            }
        }
    }

    changes
}

/// Published after every update that changed set membership.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopologyDescriptionChangedEvent {
    pub topology_id: Uuid,
    pub previous_description: TopologyDescription,
    pub new_description: TopologyDescription,
    pub diff: Vec<ServerDiff>,
}
