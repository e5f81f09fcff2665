//! MongoDB core errors.
use bson::{self, Bson};
use thiserror::Error;

use std::io;
use std::sync::Arc;

use crate::pool::PoolState;

/// A type for results generated by the driver core.
pub type Result<T> = ::std::result::Result<T, Error>;

/// The error type for pool, authentication and topology operations.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Invalid options, a missing callback or an unknown mechanism.
    #[error("{0}")]
    ArgumentError(String),
    /// The caller attempted an operation the pool state does not permit.
    #[error("connection in unlawful state {state} ({operation})")]
    InvalidState {
        state: PoolState,
        operation: &'static str,
    },
    /// The pool is destroying or destroyed.
    #[error("pool destroyed")]
    PoolDestroyed,
    /// A monitoring operation could not be served by any connection.
    #[error("no connection available for monitoring")]
    NoConnectionAvailable,
    #[error("connection {0} closed")]
    ConnectionClosed(String),
    #[error("connection {0} timed out")]
    ConnectionTimeout(String),
    /// The transport could not decode a reply.
    #[error("parse error: {0}")]
    ParseError(String),
    #[error("{0}")]
    IoError(Arc<io::Error>),
    /// A well-formed reply that signals server-side failure.
    #[error("server error ({code}): {message}")]
    ServerError {
        code: i32,
        message: String,
        document: bson::Document,
    },
    #[error("authentication failed: {0}")]
    AuthenticationError(String),
    #[error("failed to reconnect after {attempts} attempts with interval {interval_ms} ms")]
    ReconnectFailed {
        attempts: u32,
        interval_ms: u64,
        cause: Option<Box<Error>>,
    },
    /// A reply that does not have the expected shape.
    #[error("{0}")]
    ResponseError(String),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::IoError(Arc::new(err))
    }
}

impl Error {
    /// Returns true for errors raised by the transport rather than by the server.
    pub fn is_network_error(&self) -> bool {
        match *self {
            Error::ConnectionClosed(_)
            | Error::ConnectionTimeout(_)
            | Error::ParseError(_)
            | Error::IoError(_) => true,
            _ => false,
        }
    }

    /// Inspects a command reply and returns the server error it signals, if any.
    ///
    /// A reply fails when `ok` is zero or when it carries `$err`, `errmsg` or `code`.
    pub fn from_command_document(doc: &bson::Document) -> Option<Error> {
        let not_ok = match doc.get("ok") {
            Some(&Bson::I32(v)) => v == 0,
            Some(&Bson::I64(v)) => v == 0,
            Some(&Bson::FloatingPoint(v)) => v == 0.0,
            Some(&Bson::Boolean(b)) => !b,
            _ => false,
        };

        let message = match (doc.get("$err"), doc.get("errmsg")) {
            (Some(&Bson::String(ref s)), _) | (_, Some(&Bson::String(ref s))) => Some(s.to_owned()),
            _ => None,
        };

        let code = match doc.get("code") {
            Some(&Bson::I32(c)) => Some(c),
            Some(&Bson::I64(c)) => Some(c as i32),
            Some(&Bson::FloatingPoint(c)) => Some(c as i32),
            _ => None,
        };

        if !not_ok && message.is_none() && code.is_none() {
            return None;
        }

        Some(Error::ServerError {
            code: code.unwrap_or(0),
            message: message.unwrap_or_else(|| String::from("command failed")),
            document: doc.clone(),
        })
    }

    /// Inspects a legacy query reply, which only fails through `$err`.
    pub fn from_query_document(doc: &bson::Document) -> Option<Error> {
        match doc.get("$err") {
            Some(&Bson::String(ref message)) => Some(Error::ServerError {
                code: match doc.get("code") {
                    Some(&Bson::I32(c)) => c,
                    _ => 0,
                },
                message: message.to_owned(),
                document: doc.clone(),
            }),
            _ => None,
        }
    }
}
