//! Replica set topology tracking.
//!
//! `ReplicaSetTopology` consumes handshake results one node at a time and keeps a single
//! consistent view of the set: the primary, the members holding each role, and the highest
//! election id and set version seen. Election markers guard against accepting a stale
//! primary after a failover.
pub mod description;
pub mod handshake;
pub mod server;

pub use self::description::{diff, ServerDiff, TopologyDescription, TopologyDescriptionChangedEvent};
pub use self::handshake::{ElectionId, HandshakeResult};
pub use self::server::{Node, ServerDescription, ServerType};

use serde_derive::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::apm::{Listener, ServerRole, TopologyEvent};
use crate::connstring::ConnectionString;
use crate::error::{Error, Result};

/// Describes the type of topology for a server set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TopologyType {
    Single,
    ReplicaSetNoPrimary,
    ReplicaSetWithPrimary,
    Sharded,
    Unknown,
}

impl FromStr for TopologyType {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "Single" => TopologyType::Single,
            "ReplicaSetNoPrimary" => TopologyType::ReplicaSetNoPrimary,
            "ReplicaSetWithPrimary" => TopologyType::ReplicaSetWithPrimary,
            "Sharded" => TopologyType::Sharded,
            _ => TopologyType::Unknown,
        })
    }
}

impl fmt::Display for TopologyType {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(match *self {
            TopologyType::Single => "Single",
            TopologyType::ReplicaSetNoPrimary => "ReplicaSetNoPrimary",
            TopologyType::ReplicaSetWithPrimary => "ReplicaSetWithPrimary",
            TopologyType::Sharded => "Sharded",
            TopologyType::Unknown => "Unknown",
        })
    }
}

/// Options for a `ReplicaSetTopology`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReplicaSetOptions {
    /// The replica set name members must report.
    pub set_name: Option<String>,
    /// Identifies the topology in change events. Generated when absent.
    pub topology_id: Option<Uuid>,
}

impl ReplicaSetOptions {
    pub fn new(set_name: &str) -> ReplicaSetOptions {
        ReplicaSetOptions {
            set_name: Some(set_name.to_owned()),
            topology_id: None,
        }
    }

    /// Reads the `replicaSet` option.
    pub fn from_connection_string(config: &ConnectionString) -> ReplicaSetOptions {
        ReplicaSetOptions {
            set_name: config.replica_set().cloned(),
            topology_id: None,
        }
    }
}

/// What the topology has recorded about one address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetMember {
    pub server_type: ServerType,
    pub election_id: Option<ElectionId>,
    pub set_version: Option<i64>,
    pub set_name: Option<String>,
}

impl SetMember {
    fn unknown() -> SetMember {
        SetMember::with_type(ServerType::Unknown)
    }

    fn with_type(server_type: ServerType) -> SetMember {
        SetMember {
            server_type,
            election_id: None,
            set_version: None,
            set_name: None,
        }
    }

    fn from_handshake(server_type: ServerType, handshake: &HandshakeResult) -> SetMember {
        SetMember {
            server_type,
            election_id: handshake.election_id.clone(),
            set_version: handshake.set_version,
            set_name: handshake.set_name.clone(),
        }
    }
}

// True when `version` is known and older than `max`.
fn older_version(version: Option<i64>, max: i64) -> bool {
    version.map_or(false, |version| version < max)
}

fn remove_from<N: Node>(node: &N, list: &mut Vec<N>) -> bool {
    match list.iter().position(|member| member.equals(node)) {
        Some(pos) => {
            list.remove(pos);
            true
        }
        None => false,
    }
}

fn in_list<N: Node>(node: &N, list: &[N]) -> bool {
    list.iter().any(|member| member.name() == node.name())
}

/// The replica set state machine.
pub struct ReplicaSetTopology<N: Node> {
    id: Uuid,
    topology_type: TopologyType,
    set_name: Option<String>,
    primary: Option<N>,
    secondaries: Vec<N>,
    arbiters: Vec<N>,
    passives: Vec<N>,
    ghosts: Vec<N>,
    unknown_servers: Vec<String>,
    set: HashMap<String, SetMember>,
    max_election_id: Option<ElectionId>,
    max_set_version: i64,
    // The description published with the last change event.
    description: TopologyDescription,
    listener: Listener<TopologyEvent<N>>,
}

impl<N: Node> fmt::Debug for ReplicaSetTopology<N> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ReplicaSetTopology")
            .field("id", &self.id)
            .field("topology_type", &self.topology_type)
            .field("set_name", &self.set_name)
            .field("primary", &self.primary.as_ref().map(|node| node.name().to_owned()))
            .field("secondaries", &self.secondaries.len())
            .field("arbiters", &self.arbiters.len())
            .field("passives", &self.passives.len())
            .finish()
    }
}

impl<N: Node> ReplicaSetTopology<N> {
    pub fn new(options: ReplicaSetOptions) -> ReplicaSetTopology<N> {
        ReplicaSetTopology {
            id: options.topology_id.unwrap_or_else(Uuid::new_v4),
            topology_type: TopologyType::ReplicaSetNoPrimary,
            set_name: options.set_name,
            primary: None,
            secondaries: Vec::new(),
            arbiters: Vec::new(),
            passives: Vec::new(),
            ghosts: Vec::new(),
            unknown_servers: Vec::new(),
            set: HashMap::new(),
            max_election_id: None,
            max_set_version: 0,
            description: TopologyDescription::new(),
            listener: Listener::new(),
        }
    }

    /// Registers a hook for membership and description change events.
    pub fn add_hook<H: FnMut(&TopologyEvent<N>) + 'static>(&mut self, hook: H) {
        self.listener.add_hook(hook);
    }

    /// Folds the node's latest handshake into the topology.
    ///
    /// Returns true when set membership changed.
    pub fn update(&mut self, node: &N) -> bool {
        let name = node.name().to_owned();
        let handshake = node.last_handshake();

        if let Some(ref handshake) = handshake {
            for address in handshake.members() {
                let unclassified = self
                    .set
                    .get(address)
                    .map_or(true, |member| member.server_type == ServerType::Unknown);
                if unclassified && !self.unknown_servers.contains(address) {
                    self.unknown_servers.push(address.clone());
                }
                self.set.entry(address.clone()).or_insert_with(SetMember::unknown);
            }
        }

        let handshake = match handshake {
            Some(handshake) => handshake,
            None => {
                if !self.unknown_servers.contains(&name) {
                    self.set.insert(name.clone(), SetMember::unknown());
                    self.unknown_servers.push(name);
                }
                return false;
            }
        };

        if handshake.msg.as_ref().map_or(false, |msg| msg == "isdbgrid") {
            debug!(address = %name, "ignoring sharding router");
            return false;
        }

        // Hidden members and members without any role.
        if handshake.set_name.is_some()
            && (handshake.hidden
                || (!handshake.is_master
                    && !handshake.is_secondary
                    && !handshake.arbiter_only
                    && !handshake.passive))
        {
            self.set.insert(
                name,
                SetMember {
                    set_name: handshake.set_name.clone(),
                    ..SetMember::with_type(ServerType::RSOther)
                },
            );
            self.learn_set_name(&handshake);
            self.reset_topology_type();
            return false;
        }

        if handshake.is_replica_set {
            self.set.insert(name, SetMember::with_type(ServerType::RSGhost));
            if !in_list(node, &self.ghosts) {
                self.ghosts.push(node.clone());
            }
            self.learn_set_name(&handshake);
            self.reset_topology_type();
            return false;
        }

        if handshake.is_master && handshake.set_name.is_none() {
            self.topology_type = if self.primary.is_some() {
                TopologyType::ReplicaSetWithPrimary
            } else {
                TopologyType::Unknown
            };
            warn!(address = %name, "removing standalone server from replica set");
            self.remove(node, true);
            return false;
        }

        // Maintenance mode.
        if !handshake.is_master && !handshake.is_secondary && !handshake.arbiter_only {
            self.remove(node, true);
            return false;
        }

        if let Some(ref me) = handshake.me {
            if *me != name {
                warn!(address = %name, me = %me, "seed address does not match the address the server reports");
                self.topology_type = match self.primary {
                    Some(ref primary) if !primary.equals(node) => TopologyType::ReplicaSetWithPrimary,
                    _ => TopologyType::ReplicaSetNoPrimary,
                };
                return false;
            }
        }

        if handshake.is_master && handshake.set_name.is_some() {
            return match self.primary.clone() {
                None => self.accept_first_primary(node, &handshake),
                Some(current) => self.replace_primary(node, current, &handshake),
            };
        }

        if self.primary.is_none() {
            if let Some(ref possible) = handshake.primary {
                self.set
                    .insert(possible.clone(), SetMember::with_type(ServerType::PossiblePrimary));
            }
        }

        if self.matches_set_name(&handshake) {
            if handshake.is_secondary && handshake.passive && !in_list(node, &self.passives) {
                return self.join_as_secondary(node, &handshake, true);
            }

            if handshake.is_secondary && !handshake.passive && !in_list(node, &self.secondaries) {
                return self.join_as_secondary(node, &handshake, false);
            }

            if handshake.arbiter_only && !in_list(node, &self.arbiters) {
                self.add_to_role(node, &handshake, ServerType::RSArbiter);
                self.arbiters.push(node.clone());
                self.reset_topology_type();
                self.learn_set_name(&handshake);
                self.remove_unknown(&name);

                info!(address = %name, "arbiter joined");
                self.listener.emit(&TopologyEvent::Joined {
                    role: ServerRole::Arbiter,
                    node: node.clone(),
                });
                self.emit_description_changed();
                return true;
            }
        }

        if self.set.get(&name).map_or(false, |member| member.server_type == ServerType::RSPrimary) {
            if let Some(primary) = self.primary.take() {
                info!(address = %primary.name(), "primary stepped down");
                self.set.insert(name, SetMember::unknown());
                self.listener.emit(&TopologyEvent::Left {
                    role: ServerRole::Primary,
                    node: primary.clone(),
                });
                primary.destroy();
            }
            self.topology_type = TopologyType::ReplicaSetNoPrimary;
            return false;
        }

        self.reset_topology_type();
        false
    }

    fn accept_first_primary(&mut self, node: &N, handshake: &HandshakeResult) -> bool {
        if let (Some(configured), Some(reported)) = (self.set_name.as_ref(), handshake.set_name.as_ref()) {
            if configured != reported {
                warn!(
                    address = %node.name(),
                    configured = %configured,
                    reported = %reported,
                    "primary reports a different replica set name"
                );
                self.topology_type = TopologyType::ReplicaSetNoPrimary;
                return false;
            }
        }

        if let Some(ref election_id) = handshake.election_id {
            let stale = match self.max_election_id {
                Some(ref max) if max > election_id => true,
                Some(ref max) if max == election_id => older_version(handshake.set_version, self.max_set_version),
                _ => false,
            };

            if stale {
                debug!(address = %node.name(), election_id = %election_id, "rejecting stale primary");
                self.topology_type = TopologyType::ReplicaSetNoPrimary;
                return false;
            }

            self.max_election_id = Some(election_id.clone());
            if let Some(version) = handshake.set_version {
                self.max_set_version = version;
            }
        }

        self.install_primary(node, handshake);
        true
    }

    fn replace_primary(&mut self, node: &N, current: N, handshake: &HandshakeResult) -> bool {
        let recorded = self
            .set
            .get(current.name())
            .cloned()
            .unwrap_or_else(SetMember::unknown);

        if current.equals(node) && recorded.set_name == handshake.set_name {
            return false;
        }

        if let Some(ref current_set_name) = recorded.set_name {
            if Some(current_set_name) != handshake.set_name.as_ref() {
                self.topology_type = if current.equals(node) {
                    TopologyType::ReplicaSetNoPrimary
                } else {
                    TopologyType::ReplicaSetWithPrimary
                };
                return false;
            }
        }

        match (recorded.election_id.as_ref(), handshake.election_id.as_ref()) {
            (Some(current_id), Some(claimed_id)) => {
                if current_id > claimed_id {
                    debug!(address = %node.name(), "rejecting primary with an older election id");
                    return false;
                }
                let newer_version = match (recorded.set_version, handshake.set_version) {
                    (Some(current_version), Some(claimed_version)) => current_version > claimed_version,
                    _ => false,
                };
                if current_id == claimed_id && newer_version {
                    debug!(address = %node.name(), "rejecting primary with an older set version");
                    return false;
                }
            }
            (None, Some(_)) => {
                if older_version(handshake.set_version, self.max_set_version) {
                    return false;
                }
            }
            _ => (),
        }

        match (self.max_election_id.clone(), handshake.election_id.as_ref()) {
            (Some(max), Some(claimed_id)) => {
                if max > *claimed_id || older_version(handshake.set_version, self.max_set_version) {
                    debug!(address = %node.name(), "rejecting primary behind the newest election");
                    return false;
                }
                self.max_election_id = Some(claimed_id.clone());
                if let Some(version) = handshake.set_version {
                    self.max_set_version = version;
                }
            }
            (None, Some(claimed_id)) => {
                self.max_election_id = Some(claimed_id.clone());
                if let Some(version) = handshake.set_version {
                    self.max_set_version = version;
                }
            }
            (_, None) => {
                if let Some(version) = handshake.set_version {
                    self.max_set_version = version;
                }
            }
        }

        self.set.insert(current.name().to_owned(), SetMember::unknown());
        info!(old = %current.name(), new = %node.name(), "primary replaced");
        self.listener.emit(&TopologyEvent::Left {
            role: ServerRole::Primary,
            node: current.clone(),
        });
        current.destroy();
        self.primary = None;

        self.install_primary(node, handshake);
        true
    }

    fn install_primary(&mut self, node: &N, handshake: &HandshakeResult) {
        let name = node.name().to_owned();

        self.primary = Some(node.clone());
        self.set
            .insert(name.clone(), SetMember::from_handshake(ServerType::RSPrimary, handshake));
        self.topology_type = TopologyType::ReplicaSetWithPrimary;
        self.learn_set_name(handshake);
        self.remove_unknown(&name);
        remove_from(node, &mut self.secondaries);
        remove_from(node, &mut self.passives);
        remove_from(node, &mut self.arbiters);
        remove_from(node, &mut self.ghosts);

        info!(address = %name, "primary joined");
        self.listener.emit(&TopologyEvent::Joined {
            role: ServerRole::Primary,
            node: node.clone(),
        });
        self.emit_description_changed();
    }

    // A primary now reporting secondary has its old primary reference destroyed before it
    // joins the secondaries.
    fn join_as_secondary(&mut self, node: &N, handshake: &HandshakeResult, passive: bool) -> bool {
        let name = node.name().to_owned();

        self.add_to_role(node, handshake, ServerType::RSSecondary);
        if passive {
            self.passives.push(node.clone());
        } else {
            self.secondaries.push(node.clone());
        }

        self.reset_topology_type();
        self.learn_set_name(handshake);
        self.remove_unknown(&name);

        let demoted = match self.primary {
            Some(ref primary) => primary.name() == name,
            None => false,
        };
        if demoted {
            if let Some(primary) = self.primary.take() {
                info!(address = %name, "primary became a secondary");
                primary.destroy();
                self.listener.emit(&TopologyEvent::Left {
                    role: ServerRole::Primary,
                    node: primary,
                });
            }
            self.topology_type = TopologyType::ReplicaSetNoPrimary;
        }

        info!(address = %name, passive, "secondary joined");
        self.listener.emit(&TopologyEvent::Joined {
            role: ServerRole::Secondary,
            node: node.clone(),
        });
        self.emit_description_changed();
        true
    }

    // Records the role in the member map and takes the node out of every role list.
    // The caller appends it to the list for its new role.
    fn add_to_role(&mut self, node: &N, handshake: &HandshakeResult, server_type: ServerType) {
        self.set
            .insert(node.name().to_owned(), SetMember::from_handshake(server_type, handshake));

        remove_from(node, &mut self.secondaries);
        remove_from(node, &mut self.passives);
        remove_from(node, &mut self.arbiters);
        remove_from(node, &mut self.ghosts);
    }

    fn learn_set_name(&mut self, handshake: &HandshakeResult) {
        if let Some(ref set_name) = handshake.set_name {
            self.set_name = Some(set_name.clone());
        }
    }

    fn matches_set_name(&self, handshake: &HandshakeResult) -> bool {
        match (self.set_name.as_ref(), handshake.set_name.as_ref()) {
            (Some(ours), Some(theirs)) => ours == theirs,
            _ => false,
        }
    }

    fn reset_topology_type(&mut self) {
        self.topology_type = if self.primary.is_some() {
            TopologyType::ReplicaSetWithPrimary
        } else {
            TopologyType::ReplicaSetNoPrimary
        };
    }

    fn remove_unknown(&mut self, address: &str) {
        self.unknown_servers.retain(|unknown| unknown != address);
    }

    /// Drops a node from every role list.
    ///
    /// A node that still holds a role and is connected is kept unless `force` is set.
    pub fn remove(&mut self, node: &N, force: bool) {
        if !force {
            let reachable = self
                .primary
                .iter()
                .chain(self.secondaries.iter())
                .chain(self.arbiters.iter())
                .chain(self.passives.iter())
                .any(|member| member.equals(node) && member.is_connected());
            if reachable {
                debug!(address = %node.name(), "keeping reachable node");
                return;
            }
        }

        let name = node.name().to_owned();
        if let Some(member) = self.set.get_mut(&name) {
            *member = SetMember::unknown();
        }

        let mut role = None;

        if self.primary.as_ref().map_or(false, |primary| primary.equals(node)) {
            self.primary = None;
            self.topology_type = TopologyType::ReplicaSetNoPrimary;
            role = Some(ServerRole::Primary);
        }

        if remove_from(node, &mut self.secondaries) {
            role = Some(ServerRole::Secondary);
        }
        if remove_from(node, &mut self.arbiters) {
            role = Some(ServerRole::Arbiter);
        }
        if remove_from(node, &mut self.passives) {
            role = Some(ServerRole::Secondary);
        }
        remove_from(node, &mut self.ghosts);
        self.remove_unknown(&name);

        if let Some(role) = role {
            info!(address = %name, role = %role, "node left");
            self.listener.emit(&TopologyEvent::Left {
                role,
                node: node.clone(),
            });
        }
    }

    /// Destroys every tracked node and forgets all membership.
    pub fn destroy(&mut self) {
        if let Some(primary) = self.primary.take() {
            primary.destroy();
        }

        for node in self
            .secondaries
            .drain(..)
            .chain(self.arbiters.drain(..))
            .chain(self.passives.drain(..))
            .chain(self.ghosts.drain(..))
        {
            node.destroy();
        }

        self.unknown_servers.clear();
        self.set.clear();
    }

    /// The primary, secondaries, optionally arbiters, then passives.
    pub fn all_servers(&self, ignore_arbiters: bool) -> Vec<N> {
        let mut servers: Vec<N> = self.primary.iter().cloned().collect();
        servers.extend(self.secondaries.iter().cloned());
        if !ignore_arbiters {
            servers.extend(self.arbiters.iter().cloned());
        }
        servers.extend(self.passives.iter().cloned());
        servers
    }

    pub fn has_primary(&self) -> bool {
        self.primary.is_some()
    }

    pub fn has_secondary(&self) -> bool {
        !self.secondaries.is_empty()
    }

    pub fn has_primary_and_secondary(&self) -> bool {
        self.has_primary() && self.has_secondary()
    }

    pub fn is_primary(&self, address: &str) -> bool {
        self.primary.as_ref().map_or(false, |primary| primary.name() == address)
    }

    pub fn is_secondary(&self, address: &str) -> bool {
        self.secondaries.iter().any(|node| node.name() == address)
    }

    pub fn is_passive(&self, address: &str) -> bool {
        self.passives.iter().any(|node| node.name() == address)
    }

    /// Whether the address has ever been recorded in the member map.
    pub fn contains(&self, address: &str) -> bool {
        self.set.contains_key(address)
    }

    /// The role-holding node reached under `address`.
    pub fn get(&self, address: &str) -> Option<&N> {
        self.primary
            .iter()
            .chain(self.secondaries.iter())
            .chain(self.arbiters.iter())
            .chain(self.passives.iter())
            .chain(self.ghosts.iter())
            .find(|node| node.name() == address)
    }

    pub fn member(&self, address: &str) -> Option<&SetMember> {
        self.set.get(address)
    }

    pub fn primary(&self) -> Option<&N> {
        self.primary.as_ref()
    }

    pub fn secondaries(&self) -> &[N] {
        &self.secondaries
    }

    pub fn arbiters(&self) -> &[N] {
        &self.arbiters
    }

    pub fn passives(&self) -> &[N] {
        &self.passives
    }

    pub fn ghosts(&self) -> &[N] {
        &self.ghosts
    }

    /// Discovered addresses that have not been classified yet.
    pub fn unknown_servers(&self) -> &[String] {
        &self.unknown_servers
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn topology_type(&self) -> TopologyType {
        self.topology_type
    }

    pub fn set_name(&self) -> Option<&str> {
        self.set_name.as_ref().map(|name| name.as_str())
    }

    pub fn max_election_id(&self) -> Option<&ElectionId> {
        self.max_election_id.as_ref()
    }

    pub fn max_set_version(&self) -> i64 {
        self.max_set_version
    }

    /// A snapshot of the role-holding members.
    ///
    /// The published type only counts primaries and secondaries: a primary without any
    /// secondary is reported as `Unknown`, whatever `topology_type` currently holds.
    pub fn description(&self) -> TopologyDescription {
        let mut servers = Vec::new();

        let roles = self
            .primary
            .iter()
            .map(|node| (node, ServerType::RSPrimary))
            .chain(self.secondaries.iter().map(|node| (node, ServerType::RSSecondary)))
            .chain(self.arbiters.iter().map(|node| (node, ServerType::RSArbiter)))
            .chain(self.passives.iter().map(|node| (node, ServerType::RSSecondary)));

        for (node, server_type) in roles {
            let mut description = node.description();
            description.server_type = server_type;
            servers.push(description);
        }

        let topology_type = if self.has_primary_and_secondary() {
            TopologyType::ReplicaSetWithPrimary
        } else if !self.has_primary() && self.has_secondary() {
            TopologyType::ReplicaSetNoPrimary
        } else {
            TopologyType::Unknown
        };

        TopologyDescription {
            topology_type,
            set_name: self.set_name.clone(),
            servers,
        }
    }

    fn emit_description_changed(&mut self) {
        if !self.listener.has_hooks() {
            return;
        }

        let description = self.description();
        let event = TopologyDescriptionChangedEvent {
            topology_id: self.id,
            diff: diff(&self.description, &description),
            previous_description: self.description.clone(),
            new_description: description.clone(),
        };

        self.listener
            .emit(&TopologyEvent::TopologyDescriptionChanged(event));
        self.description = description;
    }
}
