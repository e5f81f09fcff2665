//! Parsed handshake (isMaster) replies.
use bson::{oid, Bson};
use chrono::{DateTime, Utc};

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use crate::connstring;
use crate::error::Error::{ArgumentError, ResponseError};
use crate::error::Result;

use super::server::ServerType;

/// A replica set election generation marker.
///
/// Compared byte by byte; when one id is a prefix of the other, the shorter one is smaller.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ElectionId(Vec<u8>);

impl ElectionId {
    pub fn new(bytes: Vec<u8>) -> ElectionId {
        ElectionId(bytes)
    }

    pub fn from_hex(hex: &str) -> Result<ElectionId> {
        hex::decode(hex)
            .map(ElectionId)
            .map_err(|err| ArgumentError(format!("invalid election id '{}': {}", hex, err)))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Ord for ElectionId {
    fn cmp(&self, other: &ElectionId) -> Ordering {
        let len = self.0.len().min(other.0.len());
        for i in 0..len {
            match self.0[i].cmp(&other.0[i]) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

impl PartialOrd for ElectionId {
    fn partial_cmp(&self, other: &ElectionId) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<oid::ObjectId> for ElectionId {
    fn from(id: oid::ObjectId) -> ElectionId {
        ElectionId(id.bytes().to_vec())
    }
}

impl fmt::Display for ElectionId {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(&hex::encode(&self.0))
    }
}

impl fmt::Debug for ElectionId {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "ElectionId({})", self)
    }
}

/// The result of a handshake with one node. Addresses are normalized to `host:port`.
#[derive(Clone, Debug, PartialEq)]
pub struct HandshakeResult {
    pub ok: bool,
    pub is_master: bool,
    pub is_secondary: bool,
    pub arbiter_only: bool,
    pub passive: bool,
    pub hidden: bool,
    /// Set by members that have not yet joined a replica set configuration.
    pub is_replica_set: bool,
    pub set_name: Option<String>,
    pub set_version: Option<i64>,
    pub election_id: Option<ElectionId>,
    pub hosts: Vec<String>,
    pub passives: Vec<String>,
    pub arbiters: Vec<String>,
    pub me: Option<String>,
    /// The node's opinion of who the primary is.
    pub primary: Option<String>,
    /// "isdbgrid" for sharding routers.
    pub msg: Option<String>,
    pub tags: BTreeMap<String, String>,
    pub local_time: Option<DateTime<Utc>>,
    pub min_wire_version: i64,
    pub max_wire_version: i64,
}

impl Default for HandshakeResult {
    fn default() -> HandshakeResult {
        HandshakeResult {
            ok: true,
            is_master: false,
            is_secondary: false,
            arbiter_only: false,
            passive: false,
            hidden: false,
            is_replica_set: false,
            set_name: None,
            set_version: None,
            election_id: None,
            hosts: Vec::new(),
            passives: Vec::new(),
            arbiters: Vec::new(),
            me: None,
            primary: None,
            msg: None,
            tags: BTreeMap::new(),
            local_time: None,
            min_wire_version: 0,
            max_wire_version: 0,
        }
    }
}

fn get_bool(doc: &bson::Document, key: &str) -> bool {
    match doc.get(key) {
        Some(&Bson::Boolean(b)) => b,
        _ => false,
    }
}

fn get_i64(doc: &bson::Document, key: &str) -> Option<i64> {
    match doc.get(key) {
        Some(&Bson::I32(v)) => Some(i64::from(v)),
        Some(&Bson::I64(v)) => Some(v),
        Some(&Bson::FloatingPoint(v)) => Some(v as i64),
        _ => None,
    }
}

fn get_string(doc: &bson::Document, key: &str) -> Option<String> {
    match doc.get(key) {
        Some(&Bson::String(ref s)) => Some(s.to_owned()),
        _ => None,
    }
}

fn get_addresses(doc: &bson::Document, key: &str) -> Vec<String> {
    match doc.get(key) {
        Some(&Bson::Array(ref arr)) => arr
            .iter()
            .filter_map(|bson| match *bson {
                Bson::String(ref s) => Some(connstring::normalize_address(s)),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

impl HandshakeResult {
    /// Parses an isMaster or hello reply.
    pub fn from_document(doc: &bson::Document) -> Result<HandshakeResult> {
        let ok = match doc.get("ok") {
            Some(&Bson::I32(v)) => v != 0,
            Some(&Bson::I64(v)) => v != 0,
            Some(&Bson::FloatingPoint(v)) => v != 0.0,
            Some(&Bson::Boolean(b)) => b,
            _ => return Err(ResponseError("handshake reply does not contain `ok`.".to_owned())),
        };

        let mut result = HandshakeResult {
            ok,
            is_master: get_bool(doc, "ismaster") || get_bool(doc, "isWritablePrimary"),
            is_secondary: get_bool(doc, "secondary"),
            arbiter_only: get_bool(doc, "arbiterOnly"),
            passive: get_bool(doc, "passive"),
            hidden: get_bool(doc, "hidden"),
            is_replica_set: get_bool(doc, "isreplicaset"),
            set_name: get_string(doc, "setName"),
            set_version: get_i64(doc, "setVersion"),
            hosts: get_addresses(doc, "hosts"),
            passives: get_addresses(doc, "passives"),
            arbiters: get_addresses(doc, "arbiters"),
            me: get_string(doc, "me").map(|me| connstring::normalize_address(&me)),
            primary: get_string(doc, "primary").map(|p| connstring::normalize_address(&p)),
            msg: get_string(doc, "msg"),
            min_wire_version: get_i64(doc, "minWireVersion").unwrap_or(0),
            max_wire_version: get_i64(doc, "maxWireVersion").unwrap_or(0),
            ..HandshakeResult::default()
        };

        if let Some(&Bson::UtcDatetime(ref datetime)) = doc.get("localTime") {
            result.local_time = Some(*datetime);
        }

        if let Some(&Bson::Document(ref tags)) = doc.get("tags") {
            for (k, v) in tags.iter() {
                if let Bson::String(ref tag) = *v {
                    result.tags.insert(k.to_owned(), tag.to_owned());
                }
            }
        }

        result.election_id = match doc.get("electionId") {
            Some(&Bson::ObjectId(ref id)) => Some(ElectionId::from(id.clone())),
            Some(&Bson::Document(ref inner)) => match inner.get("$oid") {
                Some(&Bson::String(ref s)) => Some(ElectionId::from_hex(s)?),
                _ => None,
            },
            _ => None,
        };

        Ok(result)
    }

    /// Classifies this reply on its own, without regard to the rest of the set.
    pub fn server_type(&self) -> ServerType {
        if !self.ok {
            return ServerType::Unknown;
        }

        if self.msg.as_ref().map_or(false, |msg| msg == "isdbgrid") {
            return ServerType::Mongos;
        }

        if self.is_replica_set {
            return ServerType::RSGhost;
        }

        if self.set_name.is_none() {
            return ServerType::Standalone;
        }

        if self.hidden {
            ServerType::RSOther
        } else if self.is_master {
            ServerType::RSPrimary
        } else if self.is_secondary {
            ServerType::RSSecondary
        } else if self.arbiter_only {
            ServerType::RSArbiter
        } else {
            ServerType::RSOther
        }
    }

    /// Every member address the node reported, hosts first.
    pub fn members(&self) -> impl Iterator<Item = &String> {
        self.hosts.iter().chain(self.arbiters.iter()).chain(self.passives.iter())
    }
}
