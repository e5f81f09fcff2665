//! The four disjoint connection buckets a pool sorts its sockets into.
use std::collections::VecDeque;
use std::fmt;

use crate::pool::connection::ConnectionId;

/// Where a live connection currently sits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Bucket {
    /// Idle and ready for dispatch.
    Available,
    /// Carrying an in-flight operation.
    InUse,
    /// Opened but not yet usable.
    Connecting,
    /// Established during a credential rotation; re-authenticated once it ends.
    NonAuthenticated,
}

impl fmt::Display for Bucket {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(match *self {
            Bucket::Available => "available",
            Bucket::InUse => "in use",
            Bucket::Connecting => "connecting",
            Bucket::NonAuthenticated => "non-authenticated",
        })
    }
}

/// Owned bucket sets. Inserting a connection always removes it from its previous bucket,
/// so a connection is never listed twice.
#[derive(Debug, Default)]
pub struct Buckets {
    available: VecDeque<ConnectionId>,
    in_use: Vec<ConnectionId>,
    connecting: Vec<ConnectionId>,
    non_authenticated: Vec<ConnectionId>,
}

impl Buckets {
    pub fn new() -> Buckets {
        Buckets::default()
    }

    /// Moves `id` into `bucket`, returning the bucket it left.
    pub fn insert(&mut self, id: ConnectionId, bucket: Bucket) -> Option<Bucket> {
        let previous = self.remove(id);

        match bucket {
            Bucket::Available => self.available.push_back(id),
            Bucket::InUse => self.in_use.push(id),
            Bucket::Connecting => self.connecting.push(id),
            Bucket::NonAuthenticated => self.non_authenticated.push(id),
        }

        previous
    }

    /// Removes `id` from whichever bucket holds it.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Bucket> {
        if let Some(pos) = self.available.iter().position(|c| *c == id) {
            self.available.remove(pos);
            return Some(Bucket::Available);
        }

        if remove_from(&mut self.in_use, id) {
            Some(Bucket::InUse)
        } else if remove_from(&mut self.connecting, id) {
            Some(Bucket::Connecting)
        } else if remove_from(&mut self.non_authenticated, id) {
            Some(Bucket::NonAuthenticated)
        } else {
            None
        }
    }

    pub fn locate(&self, id: ConnectionId) -> Option<Bucket> {
        if self.available.contains(&id) {
            Some(Bucket::Available)
        } else if self.in_use.contains(&id) {
            Some(Bucket::InUse)
        } else if self.connecting.contains(&id) {
            Some(Bucket::Connecting)
        } else if self.non_authenticated.contains(&id) {
            Some(Bucket::NonAuthenticated)
        } else {
            None
        }
    }

    /// Pops the longest-idle available connection.
    pub fn pop_available(&mut self) -> Option<ConnectionId> {
        self.available.pop_front()
    }

    /// Removes every available connection from view.
    pub fn take_available(&mut self) -> Vec<ConnectionId> {
        self.available.drain(..).collect()
    }

    pub fn take_non_authenticated(&mut self) -> Vec<ConnectionId> {
        self.non_authenticated.drain(..).collect()
    }

    pub fn in_use(&self) -> &[ConnectionId] {
        &self.in_use
    }

    pub fn len(&self, bucket: Bucket) -> usize {
        match bucket {
            Bucket::Available => self.available.len(),
            Bucket::InUse => self.in_use.len(),
            Bucket::Connecting => self.connecting.len(),
            Bucket::NonAuthenticated => self.non_authenticated.len(),
        }
    }

    pub fn total(&self) -> usize {
        self.available.len() + self.in_use.len() + self.connecting.len() + self.non_authenticated.len()
    }

    pub fn clear(&mut self) {
        self.available.clear();
        self.in_use.clear();
        self.connecting.clear();
        self.non_authenticated.clear();
    }
}

fn remove_from(list: &mut Vec<ConnectionId>, id: ConnectionId) -> bool {
    match list.iter().position(|c| *c == id) {
        Some(pos) => {
            list.remove(pos);
            true
        }
        None => false,
    }
}
