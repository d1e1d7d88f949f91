//! Shard offset reader.
//!
//! Turns the log source's position queries into the views the planner needs,
//! and shapes throughput with a single shared temporal bound per batch.
//!
//! # Why one bound for all shards
//!
//! Capping by a shared bound instead of per-shard budgets keeps planning
//! simple and makes batch latency predictable. Per-shard fairness is not
//! perfect: a busy shard can take most of the cap in a given batch.

use std::sync::Arc;

use tidemark_core::{Limits, ProgressToken, ShardId};
use tracing::debug;

use crate::error::SourceResult;
use crate::source::{LogSource, ShardPositions};

/// Reads shard positions from a log source.
#[derive(Clone)]
pub struct ShardOffsetReader {
    source: Arc<dyn LogSource>,
    limits: Limits,
}

impl ShardOffsetReader {
    /// Creates a reader over `source`.
    #[must_use]
    pub fn new(source: Arc<dyn LogSource>) -> Self {
        Self::with_limits(source, Limits::new())
    }

    /// Creates a reader with explicit limits.
    #[must_use]
    pub fn with_limits(source: Arc<dyn LogSource>, limits: Limits) -> Self {
        Self { source, limits }
    }

    /// Lists every shard the source currently knows.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the source cannot be reached.
    pub async fn list_shards(&self) -> SourceResult<Vec<ShardId>> {
        self.source.list_shards().await
    }

    /// Returns the earliest retained position of each shard.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` or `UnknownShard` from the source.
    pub async fn fetch_earliest_positions(
        &self,
        shard_ids: &[ShardId],
    ) -> SourceResult<ShardPositions> {
        if shard_ids.is_empty() {
            return Ok(ShardPositions::new());
        }
        self.source.fetch_earliest(shard_ids).await
    }

    /// Returns the latest position of each shard, or of all known shards.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` or `UnknownShard` from the source.
    pub async fn fetch_latest_positions(
        &self,
        shard_ids: Option<&[ShardId]>,
    ) -> SourceResult<ShardPositions> {
        let all;
        let shard_ids = match shard_ids {
            Some(ids) => ids,
            None => {
                all = self.source.list_shards().await?;
                &all
            }
        };
        if shard_ids.is_empty() {
            return Ok(ShardPositions::new());
        }
        self.source.fetch_latest(shard_ids).await
    }

    /// Returns each shard's position at temporal bound `bound`.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` or `UnknownShard` from the source.
    pub async fn fetch_positions_at(
        &self,
        shard_ids: &[ShardId],
        bound: u64,
    ) -> SourceResult<ShardPositions> {
        if shard_ids.is_empty() {
            return Ok(ShardPositions::new());
        }
        self.source.fetch_at(shard_ids, bound).await
    }

    /// Returns the temporal bound of a persisted cursor.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCursor` if the source does not recognise it.
    pub async fn cursor_time(&self, shard_id: ShardId, cursor: &ProgressToken) -> SourceResult<u64> {
        self.source.cursor_time(shard_id, cursor).await
    }

    /// Bounds how far the next batch may advance from `previous_bound`.
    ///
    /// Every shard is assumed to have consumed exactly up to `previous_bound`.
    /// Fetches the latest positions of all shards and delegates to
    /// [`ShardOffsetReader::rate_limit_from`].
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the source cannot be reached.
    pub async fn rate_limit(&self, previous_bound: u64, cap: Option<u64>) -> SourceResult<u64> {
        let latest = self.fetch_latest_positions(None).await?;
        self.rate_limit_from(&ShardPositions::new(), previous_bound, cap, &latest)
            .await
    }

    /// Bounds how far the next batch may advance, given already-fetched latest positions.
    ///
    /// Without a cap this is the latest bound across `latest`. With a cap it is
    /// the largest bound whose pending records, summed over all shards, fit in
    /// the cap. A shard's pending records are those after its entry in
    /// `starts`, or after `previous_bound` if it has none. The bound always
    /// moves at least one second past `previous_bound` when there is anything
    /// newer, so a cap smaller than one second of traffic slows the stream
    /// down but never stalls it.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the source cannot be reached.
    pub async fn rate_limit_from(
        &self,
        starts: &ShardPositions,
        previous_bound: u64,
        cap: Option<u64>,
        latest: &ShardPositions,
    ) -> SourceResult<u64> {
        let latest_bound = latest
            .values()
            .map(|p| p.bound)
            .max()
            .unwrap_or(previous_bound);

        let Some(cap) = cap else {
            return Ok(latest_bound);
        };
        if latest_bound <= previous_bound {
            return Ok(latest_bound);
        }

        let from: Vec<(ShardId, u64)> = latest
            .keys()
            .map(|&id| (id, starts.get(&id).map_or(previous_bound, |p| p.bound)))
            .collect();
        if self.count(&from, latest_bound).await? <= cap {
            return Ok(latest_bound);
        }

        // Invariant: count(lo) <= cap or lo is the progress floor; count(hi) > cap.
        let mut lo = previous_bound + 1;
        let mut hi = latest_bound;
        if self.count(&from, lo).await? > cap {
            debug!(previous_bound, cap, "Cap below one second of traffic; advancing by one");
            return Ok(lo);
        }

        let mut steps = 0u32;
        while lo + 1 < hi && steps < self.limits.rate_limit_steps_max {
            let mid = lo + (hi - lo) / 2;
            if self.count(&from, mid).await? <= cap {
                lo = mid;
            } else {
                hi = mid;
            }
            steps += 1;
        }

        // TigerStyle: Assert postcondition.
        debug_assert!(lo > previous_bound && lo <= latest_bound);
        debug!(previous_bound, latest_bound, bound = lo, cap, "Rate-limited batch bound");
        Ok(lo)
    }

    /// Records pending up to `to_bound`, summed over `(shard, from_bound)` pairs.
    async fn count(&self, from: &[(ShardId, u64)], to_bound: u64) -> SourceResult<u64> {
        let mut total = 0u64;
        for &(shard_id, from_bound) in from {
            if to_bound <= from_bound {
                continue;
            }
            total = total.saturating_add(
                self.source
                    .count_records(shard_id, from_bound, to_bound)
                    .await?,
            );
        }
        Ok(total)
    }
}

impl std::fmt::Debug for ShardOffsetReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardOffsetReader")
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
