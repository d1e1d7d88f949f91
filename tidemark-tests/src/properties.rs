//! Invariants over a chain of batch plans.
//!
//! Feed every successful plan to [`PlanChainChecker::observe`] in order; it
//! records a [`Violation`] for each broken invariant instead of panicking so
//! a DST run can report everything it found for a seed.

use tidemark_core::{ProgressToken, ShardId};
use tidemark_planner::ShardRangePlan;
use tidemark_source::ShardPositions;

/// A broken plan-chain invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// A continuing shard did not start where the previous batch ended.
    StartMismatch {
        /// The shard.
        shard_id: ShardId,
        /// End cursor of the previous batch.
        expected: ProgressToken,
        /// Start cursor of this batch.
        actual: ProgressToken,
    },
    /// A range ends before it starts.
    EndBeforeStart {
        /// The shard.
        shard_id: ShardId,
        /// Start bound.
        start: u64,
        /// End bound.
        end: u64,
    },
    /// The shared bound moved backwards.
    BoundRegressed {
        /// Previous plan's bound.
        previous: u64,
        /// This plan's bound.
        current: u64,
    },
    /// A batch admitted more records than the cap without being at the progress floor.
    CapExceeded {
        /// This plan's bound.
        bound: u64,
        /// Records in the batch.
        records: u64,
        /// The cap in force.
        cap: u64,
    },
}

/// Checks successive plans of one planner.
#[derive(Debug, Default)]
pub struct PlanChainChecker {
    previous_ends: ShardPositions,
    previous_bound: Option<u64>,
    violations: Vec<Violation>,
    plans: u64,
}

impl PlanChainChecker {
    /// Creates an empty checker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks `plan`, which admitted `records` records under `cap`.
    pub fn observe(&mut self, plan: &ShardRangePlan, records: u64, cap: Option<u64>) {
        for (&shard_id, range) in &plan.ranges {
            if range.end.bound < range.start.bound {
                self.violations.push(Violation::EndBeforeStart {
                    shard_id,
                    start: range.start.bound,
                    end: range.end.bound,
                });
            }
            if let Some(previous) = self.previous_ends.get(&shard_id) {
                if previous.cursor != range.start.cursor {
                    self.violations.push(Violation::StartMismatch {
                        shard_id,
                        expected: previous.cursor.clone(),
                        actual: range.start.cursor.clone(),
                    });
                }
            }
        }

        if let Some(previous) = self.previous_bound {
            if plan.bound < previous {
                self.violations.push(Violation::BoundRegressed {
                    previous,
                    current: plan.bound,
                });
            }
        }

        // A plan one second past the previous bound may exceed the cap.
        let floor = self
            .previous_bound
            .or_else(|| plan.ranges.values().map(|r| r.start.bound).min())
            .map_or(0, |b| b + 1);
        if let Some(cap) = cap {
            if records > cap && plan.bound > floor {
                self.violations.push(Violation::CapExceeded {
                    bound: plan.bound,
                    records,
                    cap,
                });
            }
        }

        self.previous_ends = plan.end_positions();
        self.previous_bound = Some(plan.bound);
        self.plans += 1;
    }

    /// Returns true if no invariant has been broken.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    /// Returns every violation found so far.
    #[must_use]
    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// Number of plans observed.
    #[must_use]
    pub const fn plans(&self) -> u64 {
        self.plans
    }
}
