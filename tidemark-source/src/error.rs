//! Log-source error types.

use tidemark_core::ShardId;
use thiserror::Error;

/// Result type for log-source operations.
pub type SourceResult<T> = Result<T, SourceError>;

/// Errors that can occur while querying the log source.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The log service could not be reached.
    #[error("log source unavailable: {operation}: {message}")]
    Unavailable {
        /// The operation that failed.
        operation: &'static str,
        /// Error message.
        message: String,
    },

    /// The shard is not known to the log source.
    #[error("unknown shard {shard_id}")]
    UnknownShard {
        /// The unknown shard.
        shard_id: ShardId,
    },

    /// The cursor does not belong to this shard or cannot be decoded.
    #[error("invalid cursor {cursor:?} for {shard_id}")]
    InvalidCursor {
        /// The shard the cursor was presented for.
        shard_id: ShardId,
        /// The rejected cursor.
        cursor: String,
    },
}

impl SourceError {
    /// Returns true if this is a transport failure worth retrying.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}
