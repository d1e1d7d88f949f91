//! Coordination error types.

use thiserror::Error;

/// Result type for coordination-store operations.
pub type CoordResult<T> = Result<T, CoordError>;

/// Errors that can occur while talking to the coordination store.
///
/// Lock contention and already-closed ranges are NOT errors: they come back
/// as `Ok(false)` from `ShardLock::try_lock` and `OffsetStore::try_mark_range_end`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoordError {
    /// Transport or session failure. Callers retry at a higher layer.
    #[error("coordination store unavailable: {operation} {path}: {message}")]
    Unavailable {
        /// The operation that failed.
        operation: &'static str,
        /// The path being accessed.
        path: String,
        /// Error message.
        message: String,
    },

    /// Atomic create found an existing node.
    #[error("node already exists: {path}")]
    NodeExists {
        /// The path that already exists.
        path: String,
    },

    /// Node does not exist.
    #[error("node not found: {path}")]
    NotFound {
        /// The missing path.
        path: String,
    },

    /// Non-recursive delete of a node that still has children.
    #[error("node not empty: {path}")]
    NotEmpty {
        /// The path that still has children.
        path: String,
    },

    /// Path is not valid store syntax.
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath {
        /// The rejected path.
        path: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A project or logstore name cannot be embedded in a path.
    #[error("invalid {name} {value:?}: {reason}")]
    InvalidPathComponent {
        /// Which component was rejected.
        name: &'static str,
        /// The rejected value.
        value: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A stored record could not be decoded.
    #[error("corrupt record at {path}: {reason}")]
    CorruptRecord {
        /// The record path.
        path: String,
        /// What was wrong with it.
        reason: &'static str,
    },

    /// A request violated a configured limit.
    #[error("limit violated: {0}")]
    Limit(#[from] tidemark_core::Error),

    /// Checkpoint layout could not be initialized.
    #[error(
        "failed to initialize checkpoint layout under {root}: committed progress lives \
         only in the coordination store, so it must be reachable before the source can start"
    )]
    Bootstrap {
        /// The project/logstore-scoped checkpoint root.
        root: String,
        /// The underlying store failure.
        #[source]
        source: Box<CoordError>,
    },
}

impl CoordError {
    /// Returns true if this is a transport failure worth retrying.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}
