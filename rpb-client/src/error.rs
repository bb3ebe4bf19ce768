//! # Client Errors
//!
//! Purpose: One error type for every public operation, so callers can branch
//! on "absent", "conflicting", "transport broke" and "store said no".
//!
//! ## Design Principles
//! 1. **Named Failures**: Each failure class has its own variant.
//! 2. **Partial Results Survive**: `NotFound` carries the tombstone object
//!    so its vector clock can seed a later write.
//! 3. **Fatal vs Transient**: `is_fatal` tells the pool when to drop every
//!    connection instead of just the one that failed.

use std::io;
use std::time::Duration;

use rpb_common::{FrameError, MessageCode};
use thiserror::Error;

use crate::object::RObject;

/// Result type for the client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network or IO failure while reading/writing.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The endpoint could not be resolved to a socket address.
    #[error("cannot resolve {addr}: {source}")]
    Resolve {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// A connection attempt was refused or timed out.
    #[error("cannot connect to {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Pool size must be at least one.
    #[error("bad connection count: {0}")]
    BadConnectionCount(usize),

    /// No connection became available within the configured wait.
    #[error("no connection available after {0:?}")]
    AcquireTimeout(Duration),

    /// The store closed the connection while a response was pending.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// Fewer than five header bytes arrived before the stream ended.
    #[error("response too short: {read} of 5 header bytes")]
    ShortResponse { read: usize },

    /// The frame header was malformed.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// A payload did not decode into the expected message.
    #[error("decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    /// The store answered with an error response.
    #[error("{message}")]
    Server { message: String, code: u32 },

    /// The store answered with a message code the request cannot produce.
    #[error("unexpected response code {actual} (expected {expected})")]
    UnexpectedResponse { expected: MessageCode, actual: u8 },

    /// The key holds no value. The object still carries the tombstone clock.
    #[error("object not found: {}/{}", .0.bucket(), .0.key())]
    NotFound(Box<RObject>),

    /// Bucket names cannot be empty.
    #[error("bucket name is empty")]
    EmptyBucketName,

    /// The operation needs a key but the object has none yet.
    #[error("object has no key")]
    EmptyKey,

    /// No resolver was supplied for a conflicted value.
    #[error("resolve not implemented")]
    ResolveNotImplemented,

    /// The destination for sibling copies has the wrong length.
    #[error("sibling count mismatch: expected {expected}, got {actual}")]
    SiblingCountMismatch { expected: usize, actual: usize },

    /// An application resolver failed.
    #[error("resolution failed: {0}")]
    Resolution(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A model or relation was used before being bound to a stored object.
    #[error("model is not initialized")]
    ModelNotInitialized,

    /// A document field held a value of the wrong shape.
    #[error("field {field} has the wrong type: {reason}")]
    TypeMismatch { field: String, reason: String },

    /// Document body was not valid JSON.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A counter adjustment does not fit in an `i64`.
    #[error("counter adjustment {amount} overflows")]
    CounterOverflow { amount: i64 },

    /// A data type fetch returned a different type than requested.
    #[error("data type mismatch: expected {expected}, store holds {actual}")]
    DataTypeMismatch {
        expected: &'static str,
        actual: String,
    },

    /// The object lacks the chunk metadata of a stored file.
    #[error("{0} is not a chunked file")]
    NotFile(String),
}

impl ClientError {
    /// Wraps an application error raised while resolving siblings.
    pub fn resolution(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        ClientError::Resolution(err.into())
    }

    /// Returns true when the key holds no value.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }

    /// Returns true when the whole pool must be reconnected.
    pub fn is_fatal(&self) -> bool {
        match self {
            ClientError::ConnectionClosed => true,
            ClientError::Io(err) => is_fatal_io(err),
            _ => false,
        }
    }

    /// Returns true when the store itself rejected the request.
    pub fn is_server(&self) -> bool {
        matches!(self, ClientError::Server { .. })
    }

    /// Consumes a `NotFound` error and returns the tombstone object.
    pub fn into_tombstone(self) -> Option<RObject> {
        match self {
            ClientError::NotFound(object) => Some(*object),
            _ => None,
        }
    }
}

pub(crate) fn is_fatal_io(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
    )
}
