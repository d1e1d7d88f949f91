//! Batch offset planning for Tidemark.
//!
//! This crate turns shard positions into batches and commits their progress:
//!
//! - [`BatchOffsetPlanner`]: computes per-shard `(start, end)` ranges for the
//!   next batch, discovers new shards and caps batch size.
//! - [`DynamicConfigWatcher`]: hot-applies the per-batch cap from a document
//!   in the coordination store.
//! - [`ProgressCoordinator`]: the engine-facing facade for plan, commit and
//!   recovery.
//! - [`SourceOptions`]: validated options built from the engine's string map.
//!
//! # Example
//!
//! ```ignore
//! let options = SourceOptions::from_map(&engine_options)?;
//! let coordinator = ProgressCoordinator::open(options, &sessions, &clients).await?;
//!
//! let plan = coordinator.plan_next_batch(None).await?;
//! for (shard, range) in &plan.ranges {
//!     coordinator.commit_range_end(*shard, batch_id, &range.end.cursor).await?;
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod cap;
pub mod config;
mod coordinator;
mod dynamic;
mod error;
mod planner;

pub use cap::LiveCap;
pub use config::{SourceOptions, StartingPosition, DYNAMIC_CONFIG_PATH_DEFAULT};
pub use coordinator::ProgressCoordinator;
pub use dynamic::{
    DynamicConfigHandle, DynamicConfigOutcome, DynamicConfigWatcher, DYNAMIC_CONFIG_VERSION,
};
pub use error::{ConfigError, PlannerError, PlannerResult};
pub use planner::{BatchOffsetPlanner, ShardRange, ShardRangePlan};
