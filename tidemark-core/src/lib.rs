//! Tidemark Core - Strongly-typed identifiers and shared primitives for Tidemark.
//!
//! Tidemark tracks how far each shard of a partitioned log has been consumed
//! and coordinates exclusive access to that progress through an external
//! hierarchical coordination store. This crate holds the pieces every other
//! Tidemark crate agrees on.
//!
//! # Design Principles (TigerStyle)
//!
//! - **Strongly-typed IDs**: Prevent mixing up `ShardId` with `BatchId`
//! - **Opaque cursors**: `ProgressToken` is never interpreted outside the log source
//! - **Explicit limits**: Lease durations, plan sizes and searches are bounded
//! - **No unsafe code**: Safety > Performance

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod cache;
mod error;
mod limits;
mod types;

pub use cache::InstanceCache;
pub use error::{Error, Result};
pub use limits::Limits;
pub use types::{now_epoch_secs, BatchId, ProgressToken, ShardId, ShardPosition};
