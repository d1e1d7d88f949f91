//! Coordination-store bookkeeping for Tidemark.
//!
//! This crate owns everything Tidemark keeps in the external hierarchical
//! coordination store:
//!
//! - **Path layout** ([`CoordPaths`]): the fixed directory scheme for offsets,
//!   locks and per-batch range markers. It is the sole recovery source.
//! - **Shard locks** ([`ShardLock`]): advisory leases built on atomic
//!   create-if-absent plus a stored expiry, reclaimed cooperatively.
//! - **Offsets** ([`OffsetStore`]): per-shard committed cursors and write-once
//!   range-end markers that make concurrent commits converge.
//! - **Sessions** ([`CoordSessions`]): process-wide, identity-keyed session and
//!   lock-helper caches with transparent reconnect after teardown.
//!
//! # Testing
//!
//! [`SimulatedCoordStore`] implements [`CoordStore`] in memory with
//! deterministic fault injection and watch delivery:
//!
//! ```ignore
//! use tidemark_coord::{CoordStoreFaultConfig, SimulatedCoordStore};
//!
//! let store = SimulatedCoordStore::with_faults(seed, CoordStoreFaultConfig::flaky());
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod error;
mod layout;
mod lock;
mod offset;
mod session;
mod simulated;
mod store;

pub use error::{CoordError, CoordResult};
pub use layout::CoordPaths;
pub use lock::{LeaseState, ShardLock};
pub use offset::OffsetStore;
pub use session::{
    CoordConnector, CoordEndpoint, CoordSessions, SimulatedConnector, SESSION_TIMEOUT_DEFAULT,
};
pub use simulated::{CoordStoreFaultConfig, SimulatedCoordStore};
pub use store::{join, CoordStore, WatchEvent, WatchEventKind, WatchReceiver};
