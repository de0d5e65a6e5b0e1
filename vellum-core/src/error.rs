//! Error taxonomy shared by every layer of the engine.

use std::time::Duration;

use crate::object::ObjectId;

/// Result type for vellum operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur across storage, history and sync operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("object not found: {0}")]
    ObjectNotFound(ObjectId),

    #[error("corrupt object: {0}")]
    CorruptObject(String),

    #[error("malformed commit: {0}")]
    MalformedCommit(String),

    #[error("malformed history: parent chain revisits {0}")]
    MalformedHistory(ObjectId),

    #[error("unknown branch: {0}")]
    UnknownBranch(String),

    #[error("HEAD is detached; check out a named branch first")]
    DetachedHead,

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("no remote history for branch {0}")]
    NoRemoteHistory(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection lost")]
    ConnectionLost,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
