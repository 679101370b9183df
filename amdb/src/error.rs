//! Error taxonomy shared by every pillar of the engine.
//!
//! `NotFound` is a routine signal returned by reads/deletes of absent keys,
//! not a fatal condition. `Corruption` and `DurabilityFailure` are fatal:
//! callers must not paper over them.

use thiserror::Error;

pub type CResult<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Read or delete of a key that does not exist in the live set.
    #[error("not found")]
    NotFound,

    /// The caller's token does not carry the permission the operation needs.
    #[error("permission denied")]
    PermissionDenied,

    /// A bounded lock acquisition elapsed before the lock became available.
    #[error("lock acquisition timed out")]
    LockTimeout,

    /// The caller's lock was released by the deadlock sweeper to break a cycle.
    #[error("aborted to break a deadlock")]
    DeadlockAborted,

    /// `flush` could not persist acknowledged writes. Fatal: the engine
    /// should refuse further writes until reopened.
    #[error("durability failure: {0}")]
    DurabilityFailure(String),

    /// Recovery found a Merkle root mismatch or a truncated log frame.
    #[error("corruption detected: {0}")]
    Corruption(String),

    /// Key/value exceeded length bounds, a user already exists, or a
    /// similar precondition failed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Catch-all for serialization/internal invariant failures that don't
    /// fit the taxonomy above.
    #[error("internal error: {0}")]
    Internal(String),

    /// A parse failure while decoding a persisted or wire value.
    #[error("parse error: {0}")]
    Parse(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Parse(err.to_string())
    }
}
