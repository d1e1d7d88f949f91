//! Tidemark Tests - Deterministic Simulation Testing for Tidemark.
//!
//! Cross-component DST and integration tests. Every suite runs against the
//! in-memory `SimulatedCoordStore` and `SimulatedLogSource`, so a failing seed
//! replays exactly.
//!
//! ## Test Organization
//!
//! **DST Tests** (`*_dst.rs`): Deterministic simulation with fault injection
//! - `offset_dst`: offset and range-end bookkeeping under store faults
//! - `planner_dst`: batch planning over random traffic, caps and source faults
//!
//! **Integration Tests** (`*_tests.rs`): Multi-component integration
//! - `lock_tests`: shard lock exclusion across sessions
//! - `session_tests`: process-wide session and client caches
//! - `coordinator_tests`: open/plan/commit/resume through the facade
//!
//! **Support Modules**:
//! - `properties`: plan-chain invariant checker
//! - `scenarios`: seeds and source shapes
//!
//! ## Naming Conventions
//!
//! - DST tests: `test_dst_<component>_<scenario>`
//! - Integration tests: `test_<component>_<scenario>`
//! - Unit tests: Inline in each crate under `#[cfg(test)]`

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod properties;
pub mod scenarios;

// DST test modules (deterministic simulation with fault injection).
#[cfg(test)]
mod offset_dst;
#[cfg(test)]
mod planner_dst;

#[cfg(test)]
mod session_tests;
