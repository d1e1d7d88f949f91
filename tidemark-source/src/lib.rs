//! Log-source access for Tidemark.
//!
//! The log service owns every cursor. This crate asks it where shards begin
//! and end, maps temporal bounds to cursors, and decides how far a batch may
//! advance under a record cap:
//!
//! - [`LogSource`]: position queries against a partitioned log.
//! - [`ShardOffsetReader`]: earliest/latest/at-bound views and rate limiting.
//! - [`SourceClients`]: identity-keyed client cache.
//!
//! [`SimulatedLogSource`] provides a deterministic in-memory log for tests.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod clients;
mod error;
mod reader;
mod simulated;
mod source;

pub use clients::{SimulatedSourceConnector, SourceClients, SourceConnector};
pub use error::{SourceError, SourceResult};
pub use reader::ShardOffsetReader;
pub use simulated::{LogSourceFaultConfig, SimulatedLogSource};
pub use source::{LogSource, ShardPositions, SourceIdentity};
