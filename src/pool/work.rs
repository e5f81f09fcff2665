//! Queued operations and their completion.
use bitflags::bitflags;

use std::fmt;
use std::time::Duration;

use crate::error::Result;
use crate::pool::connection::ConnectionId;

bitflags! {
    /// Represents the bit vector of dispatch flags for a queued write.
    pub struct WorkFlags: u8 {
        /// Return the connection to the pool as soon as the payload is written.
        const IMMEDIATE_RELEASE = 0b00000001;
        /// Background topology polling; jumps the queue and fails fast.
        const MONITORING        = 0b00000010;
        /// The reply is a command document and is checked for server errors.
        const COMMAND           = 0b00000100;
        /// The server sends no reply; a callback is optional.
        const NO_RESPONSE       = 0b00001000;
    }
}

/// Options accepted by `ConnectionPool::write`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriteOptions {
    pub immediate_release: bool,
    pub monitoring: bool,
    pub command: bool,
    pub no_response: bool,
    /// Overrides the socket timeout until the reply arrives.
    pub socket_timeout: Option<Duration>,
}

impl WriteOptions {
    pub fn new() -> WriteOptions {
        WriteOptions::default()
    }

    pub fn command() -> WriteOptions {
        WriteOptions {
            command: true,
            ..WriteOptions::default()
        }
    }

    pub fn monitoring() -> WriteOptions {
        WriteOptions {
            monitoring: true,
            command: true,
            ..WriteOptions::default()
        }
    }

    pub fn with_socket_timeout(mut self, timeout: Duration) -> WriteOptions {
        self.socket_timeout = Some(timeout);
        self
    }

    pub fn with_immediate_release(mut self) -> WriteOptions {
        self.immediate_release = true;
        self
    }

    pub fn with_no_response(mut self) -> WriteOptions {
        self.no_response = true;
        self
    }

    pub fn flags(&self) -> WorkFlags {
        let mut flags = WorkFlags::empty();

        if self.immediate_release {
            flags.insert(WorkFlags::IMMEDIATE_RELEASE);
        }

        if self.monitoring {
            flags.insert(WorkFlags::MONITORING);
        }

        if self.command {
            flags.insert(WorkFlags::COMMAND);
        }

        if self.no_response {
            flags.insert(WorkFlags::NO_RESPONSE);
        }

        flags
    }
}

/// Wire-encoded bytes for one operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    Single(Vec<u8>),
    Multiple(Vec<Vec<u8>>),
}

impl Payload {
    pub fn buffers(&self) -> Vec<&[u8]> {
        match *self {
            Payload::Single(ref buf) => vec![&buf[..]],
            Payload::Multiple(ref bufs) => bufs.iter().map(|b| &b[..]).collect(),
        }
    }
}

impl From<Vec<u8>> for Payload {
    fn from(buf: Vec<u8>) -> Payload {
        Payload::Single(buf)
    }
}

impl From<Vec<Vec<u8>>> for Payload {
    fn from(bufs: Vec<Vec<u8>>) -> Payload {
        Payload::Multiple(bufs)
    }
}

/// The reply delivered to a write callback.
#[derive(Clone, Debug, PartialEq)]
pub struct CommandResult {
    /// The first reply document; empty for writes that expect no reply.
    pub document: bson::Document,
    pub connection: ConnectionId,
}

impl CommandResult {
    pub fn new(document: bson::Document, connection: ConnectionId) -> CommandResult {
        CommandResult {
            document,
            connection,
        }
    }

    pub(crate) fn acknowledged(connection: ConnectionId) -> CommandResult {
        CommandResult::new(bson::Document::new(), connection)
    }
}

/// Completion callback for a write. Invoked exactly once.
pub type Callback = Box<dyn FnOnce(Result<CommandResult>)>;

/// A queued or in-flight operation.
pub struct WorkItem {
    pub(crate) payload: Payload,
    pub(crate) callback: Option<Callback>,
    pub(crate) flags: WorkFlags,
    pub(crate) socket_timeout: Option<Duration>,
    /// Whether a pool-wide credential rotation was running at dispatch.
    pub(crate) authenticating: bool,
    /// The pool's auth epoch at dispatch.
    pub(crate) auth_epoch: Option<u64>,
}

impl WorkItem {
    pub(crate) fn new(payload: Payload, options: &WriteOptions, callback: Option<Callback>) -> WorkItem {
        WorkItem {
            payload,
            callback,
            flags: options.flags(),
            socket_timeout: options.socket_timeout,
            authenticating: false,
            auth_epoch: None,
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.flags.contains(WorkFlags::MONITORING)
    }

    /// The connection goes back to the pool right after the write.
    pub fn releases_immediately(&self) -> bool {
        self.flags
            .intersects(WorkFlags::IMMEDIATE_RELEASE | WorkFlags::NO_RESPONSE)
    }

    pub fn is_command(&self) -> bool {
        self.flags.contains(WorkFlags::COMMAND)
    }

    /// Stamps the dispatch-time auth status so stale credentials can be detected on reply.
    pub(crate) fn stamp(&mut self, authenticating: bool, auth_epoch: u64) {
        self.authenticating = authenticating;
        self.auth_epoch = Some(auth_epoch);
    }

    /// Whether the connection that carried this item must be re-authenticated before reuse.
    pub(crate) fn needs_reauthentication(&self, current_epoch: u64) -> bool {
        self.authenticating || self.auth_epoch.map_or(false, |epoch| epoch != current_epoch)
    }

    pub(crate) fn complete(self, result: Result<CommandResult>) {
        if let Some(callback) = self.callback {
            callback(result);
        }
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("flags", &self.flags)
            .field("socket_timeout", &self.socket_timeout)
            .field("authenticating", &self.authenticating)
            .field("auth_epoch", &self.auth_epoch)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}
