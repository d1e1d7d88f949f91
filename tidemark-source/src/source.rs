//! Log-source abstraction.
//!
//! The log service owns the cursors; Tidemark only asks it where things are.
//! Every answer pairs an opaque cursor with its temporal bound (epoch seconds).

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use tidemark_core::{ProgressToken, ShardId, ShardPosition};

use crate::error::SourceResult;

/// Positions keyed by shard.
pub type ShardPositions = BTreeMap<ShardId, ShardPosition>;

// -----------------------------------------------------------------------------
// LogSource Trait
// -----------------------------------------------------------------------------

/// Position queries against a partitioned log.
///
/// A cursor returned for bound `b` points at the first record whose timestamp
/// is after `b`, so the records between the cursors of bounds `a` and `b` are
/// exactly those with timestamps in `(a, b]`.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Lists every shard currently known to the source.
    async fn list_shards(&self) -> SourceResult<Vec<ShardId>>;

    /// Returns the oldest retained position of each shard.
    async fn fetch_earliest(&self, shard_ids: &[ShardId]) -> SourceResult<ShardPositions>;

    /// Returns the newest position of each shard.
    async fn fetch_latest(&self, shard_ids: &[ShardId]) -> SourceResult<ShardPositions>;

    /// Returns each shard's cursor for temporal bound `bound`.
    async fn fetch_at(&self, shard_ids: &[ShardId], bound: u64) -> SourceResult<ShardPositions>;

    /// Returns the temporal bound of a cursor.
    async fn cursor_time(&self, shard_id: ShardId, cursor: &ProgressToken) -> SourceResult<u64>;

    /// Counts the records of a shard with timestamps in `(from_bound, to_bound]`.
    async fn count_records(&self, shard_id: ShardId, from_bound: u64, to_bound: u64)
        -> SourceResult<u64>;
}

// -----------------------------------------------------------------------------
// Source Identity
// -----------------------------------------------------------------------------

/// Full identity of a log-source client: endpoint plus credentials.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SourceIdentity {
    /// Service endpoint.
    pub endpoint: String,
    /// Credential id.
    pub access_key_id: String,
    /// Credential secret. Never printed.
    pub access_key_secret: String,
}

impl SourceIdentity {
    /// Creates a new identity.
    #[must_use]
    pub fn new(
        endpoint: impl Into<String>,
        access_key_id: impl Into<String>,
        access_key_secret: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            access_key_id: access_key_id.into(),
            access_key_secret: access_key_secret.into(),
        }
    }
}

impl fmt::Debug for SourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceIdentity")
            .field("endpoint", &self.endpoint)
            .field("access_key_id", &self.access_key_id)
            .field("access_key_secret", &"<redacted>")
            .finish()
    }
}
