//! Planner and configuration error types.

use thiserror::Error;
use tidemark_coord::CoordError;
use tidemark_core::ShardId;
use tidemark_source::SourceError;

/// Result type for planner operations.
pub type PlannerResult<T> = Result<T, PlannerError>;

/// Errors raised while validating source options.
///
/// Every variant names the offending option so the message alone tells the
/// operator what to fix.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A mandatory option was not supplied.
    #[error("missing required option '{name}'")]
    MissingOption {
        /// The missing option key.
        name: &'static str,
    },

    /// An option was supplied but could not be used.
    #[error("invalid value {value:?} for option '{name}': {reason}")]
    InvalidOption {
        /// The option key.
        name: &'static str,
        /// The rejected value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Errors that can occur while planning or committing batches.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlannerError {
    /// Coordination-store failure.
    #[error(transparent)]
    Coord(#[from] CoordError),

    /// Log-source failure.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Invalid options.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A configured limit was exceeded.
    #[error(transparent)]
    Limit(#[from] tidemark_core::Error),

    /// The log source omitted a shard it was asked about.
    #[error("log source returned no position for {shard_id}")]
    MissingPosition {
        /// The shard without a position.
        shard_id: ShardId,
    },
}

impl PlannerError {
    /// Returns true if the failure is transient and the call may be retried.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        match self {
            Self::Coord(e) => e.is_unavailable(),
            Self::Source(e) => e.is_unavailable(),
            _ => false,
        }
    }
}
