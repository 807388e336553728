//! Error types for walkv.

use std::io;
use thiserror::Error;

/// Result type alias for walkv operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for database operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// I/O error from file operations.
    #[error("I/O error: {0}")]
    Io(String),

    /// Unexpected invariant violation.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Zero-length key supplied.
    #[error("the key is empty")]
    KeyIsEmpty,

    /// Index miss or tombstone on read.
    #[error("key not found in database")]
    KeyNotFound,

    /// The advisory file lock is held by another process.
    #[error("the database directory is used by another process")]
    DatabaseIsUsing,

    /// Mutation attempted on a read-only batch.
    #[error("the batch is read only")]
    ReadOnlyBatch,

    /// Second commit on the same batch.
    #[error("the batch is committed")]
    BatchCommitted,

    /// Any operation after close.
    #[error("the database is closed")]
    DatabaseClosed,

    /// Reserved for compaction.
    #[error("the merge operation is running")]
    MergeRunning,

    /// Unrecognized action from an external caller.
    #[error("unknown action")]
    UnknownAction,

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Chunk checksum mismatch.
    #[error("invalid CRC: expected {expected:#x}, got {actual:#x}")]
    CrcMismatch { expected: u32, actual: u32 },

    /// Data plus chunk header exceeds the segment size.
    #[error("the data size can't be larger than the segment size")]
    ValueTooLarge,

    /// A chunk position references a segment that is not open.
    #[error("segment file {0} not found")]
    SegmentNotFound(u32),

    /// Read or write on a closed segment file.
    #[error("the segment file is closed")]
    SegmentClosed,

    /// Data corruption detected.
    #[error("corruption detected: {0}")]
    Corruption(String),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl Error {
    /// Create a corruption error with the given message.
    pub fn corruption<S: Into<String>>(msg: S) -> Self {
        Error::Corruption(msg.into())
    }

    /// Create an internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Error::Internal(msg.into())
    }

    /// Numeric error code reported to external callers.
    ///
    /// Kinds without a dedicated code map to the internal code 10001.
    pub fn code(&self) -> u32 {
        match self {
            Error::KeyIsEmpty => 10002,
            Error::KeyNotFound => 10003,
            Error::DatabaseIsUsing => 10004,
            Error::ReadOnlyBatch => 10005,
            Error::BatchCommitted => 10006,
            Error::DatabaseClosed => 10007,
            Error::MergeRunning => 10008,
            Error::UnknownAction => 10009,
            _ => 10001,
        }
    }

    /// Check if this error indicates on-disk corruption.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_) | Error::CrcMismatch { .. })
    }
}
