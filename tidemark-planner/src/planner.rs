//! Batch offset planner.
//!
//! Computes the per-shard `(start, end)` range of the next batch. The planner
//! has two states: **uninitialized** until its first successful plan, then
//! **steady** forever after.
//!
//! Start positions come from, in order of preference:
//!
//! 1. the previous batch's end positions passed in by the engine,
//! 2. the planner's own last plan (steady state),
//! 3. committed offsets recovered from the coordination store,
//! 4. the starting-position policy (first run of a fresh checkpoint).
//!
//! Shards missing from the chosen start set are newly discovered and always
//! start from their earliest retained position, so nothing is skipped at
//! discovery time. Shards that disappear from the log source are dropped from
//! the plan without a tombstone.

use std::collections::BTreeMap;
use std::sync::Arc;

use tidemark_core::{Limits, ProgressToken, ShardId, ShardPosition};
use tidemark_source::{ShardOffsetReader, ShardPositions, SourceError};
use tracing::{debug, info, warn};

use crate::cap::LiveCap;
use crate::config::StartingPosition;
use crate::error::{PlannerError, PlannerResult};

// -----------------------------------------------------------------------------
// Plan Types
// -----------------------------------------------------------------------------

/// The range of one shard in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardRange {
    /// First position of the batch (exclusive temporal bound).
    pub start: ShardPosition,
    /// Last position of the batch (inclusive temporal bound).
    pub end: ShardPosition,
}

impl ShardRange {
    /// Returns true if the range holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start.cursor == self.end.cursor
    }
}

/// Per-shard ranges of one batch. Ephemeral; rebuilt every batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardRangePlan {
    /// Temporal upper bound shared by every range.
    pub bound: u64,
    /// Ranges keyed by shard.
    pub ranges: BTreeMap<ShardId, ShardRange>,
}

impl ShardRangePlan {
    /// End positions of every range, the start set of the following batch.
    #[must_use]
    pub fn end_positions(&self) -> ShardPositions {
        self.ranges
            .iter()
            .map(|(&shard_id, range)| (shard_id, range.end.clone()))
            .collect()
    }

    /// End cursor of one shard.
    #[must_use]
    pub fn end_token(&self, shard_id: ShardId) -> Option<&ProgressToken> {
        self.ranges.get(&shard_id).map(|r| &r.end.cursor)
    }

    /// Returns true if no shard has anything to read.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.values().all(ShardRange::is_empty)
    }
}

#[derive(Debug)]
enum PlannerState {
    Uninitialized,
    Steady { last: ShardRangePlan },
}

// -----------------------------------------------------------------------------
// Planner
// -----------------------------------------------------------------------------

/// Plans the shard ranges of successive batches.
pub struct BatchOffsetPlanner {
    reader: ShardOffsetReader,
    starting_position: StartingPosition,
    /// Committed positions recovered from the coordination store.
    recovered: ShardPositions,
    cap: Arc<LiveCap>,
    limits: Limits,
    state: PlannerState,
}

impl BatchOffsetPlanner {
    /// Creates an uninitialized planner.
    #[must_use]
    pub fn new(
        reader: ShardOffsetReader,
        starting_position: StartingPosition,
        cap: Arc<LiveCap>,
    ) -> Self {
        Self::with_limits(reader, starting_position, cap, Limits::new())
    }

    /// Creates an uninitialized planner with explicit limits.
    #[must_use]
    pub fn with_limits(
        reader: ShardOffsetReader,
        starting_position: StartingPosition,
        cap: Arc<LiveCap>,
        limits: Limits,
    ) -> Self {
        Self {
            reader,
            starting_position,
            recovered: ShardPositions::new(),
            cap,
            limits,
            state: PlannerState::Uninitialized,
        }
    }

    /// Returns the live cap shared with the dynamic-config watcher.
    #[must_use]
    pub const fn live_cap(&self) -> &Arc<LiveCap> {
        &self.cap
    }

    /// Returns true once the first plan has been produced.
    #[must_use]
    pub const fn is_steady(&self) -> bool {
        matches!(self.state, PlannerState::Steady { .. })
    }

    /// Returns the last plan produced, if any.
    #[must_use]
    pub const fn last_plan(&self) -> Option<&ShardRangePlan> {
        match &self.state {
            PlannerState::Uninitialized => None,
            PlannerState::Steady { last } => Some(last),
        }
    }

    /// Seeds start positions from committed offsets.
    ///
    /// Each token's temporal bound is looked up in the log source. Tokens of
    /// shards the source no longer knows are skipped.
    ///
    /// # Errors
    ///
    /// Returns `Source` if the log source is unreachable or rejects a cursor.
    pub async fn recover(
        &mut self,
        committed: &BTreeMap<ShardId, ProgressToken>,
    ) -> PlannerResult<()> {
        for (&shard_id, cursor) in committed {
            match self.reader.cursor_time(shard_id, cursor).await {
                Ok(bound) => {
                    self.recovered
                        .insert(shard_id, ShardPosition::new(bound, cursor.clone()));
                }
                Err(SourceError::UnknownShard { .. }) => {
                    warn!(shard = %shard_id, "Committed offset for a retired shard; skipping");
                }
                Err(e) => return Err(e.into()),
            }
        }
        info!(shards = self.recovered.len(), "Recovered committed offsets");
        Ok(())
    }

    /// Plans the next batch.
    ///
    /// `previous` is the end of the previous batch as realized by the engine.
    /// Without it the planner continues from its own last plan, or from
    /// recovered/initial positions on the first call.
    ///
    /// # Errors
    ///
    /// Returns `Source` if the log source fails, `Limit` if the shard count
    /// exceeds the configured maximum.
    pub async fn plan_next_batch(
        &mut self,
        previous: Option<&ShardPositions>,
    ) -> PlannerResult<ShardRangePlan> {
        let latest = self.reader.fetch_latest_positions(None).await?;
        self.limits.check_shards_per_plan(latest.len())?;
        let shard_ids: Vec<ShardId> = latest.keys().copied().collect();

        let from = match (previous, &self.state) {
            (Some(previous), _) => previous.clone(),
            (None, PlannerState::Steady { last }) => last.end_positions(),
            (None, PlannerState::Uninitialized) => self.initial_positions(&shard_ids).await?,
        };

        // Newly discovered shards start from the beginning.
        let discovered: Vec<ShardId> = shard_ids
            .iter()
            .copied()
            .filter(|id| !from.contains_key(id))
            .collect();
        let earliest = self.reader.fetch_earliest_positions(&discovered).await?;
        if !discovered.is_empty() {
            info!(shards = ?discovered, "Discovered new shards; starting from earliest");
        }

        let mut starts = ShardPositions::new();
        for &shard_id in &shard_ids {
            let start = match from.get(&shard_id) {
                Some(position) => position.clone(),
                None => position_of(&earliest, shard_id)?.clone(),
            };
            starts.insert(shard_id, start);
        }

        // Everything up to the last plan's bound has been handed out already.
        let latest_bound = latest.values().map(|p| p.bound).max().unwrap_or(0);
        let previous_bound = match &self.state {
            PlannerState::Steady { last } => last.bound,
            PlannerState::Uninitialized => starts
                .values()
                .map(|p| p.bound)
                .min()
                .unwrap_or(latest_bound),
        };
        let cap = self.cap.get();
        let bound = self
            .reader
            .rate_limit_from(&starts, previous_bound, cap, &latest)
            .await?
            .max(previous_bound);

        let ends = self.end_positions(&latest, bound).await?;

        let mut ranges = BTreeMap::new();
        for (shard_id, start) in starts {
            let mut end = position_of(&ends, shard_id)?.clone();
            if end.bound < start.bound {
                // Already past the new bound: nothing to read this batch.
                end = start.clone();
            }
            ranges.insert(shard_id, ShardRange { start, end });
        }

        let plan = ShardRangePlan { bound, ranges };

        // TigerStyle: Assert postcondition.
        debug_assert!(plan.ranges.values().all(|r| r.end.bound >= r.start.bound));
        debug_assert_eq!(plan.ranges.len(), shard_ids.len());

        debug!(
            bound,
            previous_bound,
            cap = ?cap,
            shards = plan.ranges.len(),
            "Planned batch"
        );
        self.state = PlannerState::Steady { last: plan.clone() };
        Ok(plan)
    }

    /// Start positions for a planner that has never planned.
    async fn initial_positions(&self, shard_ids: &[ShardId]) -> PlannerResult<ShardPositions> {
        if !self.recovered.is_empty() {
            // Resuming: shards without a committed offset are new.
            return Ok(self.recovered.clone());
        }

        match &self.starting_position {
            StartingPosition::Earliest => Ok(self.reader.fetch_earliest_positions(shard_ids).await?),
            StartingPosition::Latest => {
                Ok(self.reader.fetch_latest_positions(Some(shard_ids)).await?)
            }
            StartingPosition::Explicit(bounds) => {
                let mut positions = ShardPositions::new();
                for &shard_id in shard_ids {
                    if let Some(&bound) = bounds.get(&shard_id) {
                        let at = self.reader.fetch_positions_at(&[shard_id], bound).await?;
                        positions.insert(shard_id, position_of(&at, shard_id)?.clone());
                    }
                }
                // Unlisted shards are left out and start from earliest.
                Ok(positions)
            }
        }
    }

    /// End positions at `bound`, reusing the latest fetch where it already reaches it.
    async fn end_positions(&self, latest: &ShardPositions, bound: u64) -> PlannerResult<ShardPositions> {
        let behind: Vec<ShardId> = latest
            .iter()
            .filter(|(_, p)| p.bound > bound)
            .map(|(&id, _)| id)
            .collect();
        let mut ends = self.reader.fetch_positions_at(&behind, bound).await?;
        for (&shard_id, position) in latest {
            ends.entry(shard_id).or_insert_with(|| position.clone());
        }
        Ok(ends)
    }
}

impl std::fmt::Debug for BatchOffsetPlanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchOffsetPlanner")
            .field("starting_position", &self.starting_position)
            .field("recovered", &self.recovered.len())
            .field("cap", &self.cap.get())
            .field("steady", &self.is_steady())
            .finish_non_exhaustive()
    }
}

fn position_of(positions: &ShardPositions, shard_id: ShardId) -> PlannerResult<&ShardPosition> {
    positions
        .get(&shard_id)
        .ok_or(PlannerError::MissingPosition { shard_id })
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
