//! The transport contract the pool drives.

use std::fmt;
use std::io;
use std::time::Duration;

use crate::error::Error;
use crate::pool::options::PoolOptions;

/// Pool-assigned identity of a single socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "conn-{}", self.0)
    }
}

/// A decoded reply read off a socket.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Message {
    pub response_to: i32,
    pub documents: Vec<bson::Document>,
}

impl Message {
    pub fn new(documents: Vec<bson::Document>) -> Message {
        Message {
            response_to: 0,
            documents,
        }
    }

    /// The first document of the reply, which carries command results.
    pub fn first(&self) -> Option<&bson::Document> {
        self.documents.first()
    }
}

/// Notifications a transport reports for one connection.
///
/// The reactor delivers these to `ConnectionPool::handle_event` tagged with the id the pool
/// handed to `ConnectionFactory::create`. Events for an id the pool no longer tracks are
/// discarded, which is how listeners are detached before a socket is destroyed.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Connect,
    Message(Message),
    Error(Error),
    Close,
    Timeout,
    ParseError(String),
}

/// A single socket to one node.
pub trait Connection {
    /// Starts connecting; completion is reported as `ConnectionEvent::Connect`.
    fn connect(&mut self);

    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Closes the socket. No events are delivered afterwards.
    fn destroy(&mut self);

    fn is_connected(&self) -> bool;

    fn set_socket_timeout(&mut self, timeout: Duration);

    fn reset_socket_timeout(&mut self);

    /// Allows the reactor to exit while this socket is still open.
    fn unref(&mut self);
}

/// Creates transport connections for a pool.
pub trait ConnectionFactory {
    type Connection: Connection;

    fn create(&mut self, id: ConnectionId, options: &PoolOptions) -> Self::Connection;
}
