//! Coordination path layout.
//!
//! Maps `(checkpoint root, project, logstore)` to the fixed set of directories
//! Tidemark keeps in the coordination store:
//!
//! ```text
//! {root}/commit/{project}/{logstore}/offset/{shard}
//! {root}/commit/{project}/{logstore}/lock/{shard}
//! {root}/commit/{project}/{logstore}/rdd/{shard}/{batch}
//! ```
//!
//! This layout is the sole recovery source, so it must never change shape.

use tidemark_core::{BatchId, ShardId};

use crate::error::{CoordError, CoordResult};
use crate::store::{join, validate_path, SEPARATOR};

const COMMIT_DIR: &str = "commit";
const OFFSET_DIR: &str = "offset";
const LOCK_DIR: &str = "lock";
const RANGE_DIR: &str = "rdd";

/// Resolved directory paths for one project/logstore checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CoordPaths {
    scope: String,
    offset: String,
    lock: String,
    range: String,
}

impl CoordPaths {
    /// Resolves the layout for a checkpoint root and source identity.
    ///
    /// Project and logstore names are embedded as single path segments, so a
    /// name containing the separator, `..`, or nothing at all is rejected
    /// rather than escaped.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPath` for a malformed root and `InvalidPathComponent`
    /// for an unusable project or logstore name.
    pub fn new(checkpoint_root: &str, project: &str, logstore: &str) -> CoordResult<Self> {
        let root = if checkpoint_root.len() > 1 {
            checkpoint_root.trim_end_matches(SEPARATOR)
        } else {
            checkpoint_root
        };
        validate_path(root)?;
        check_component("project", project)?;
        check_component("logstore", logstore)?;

        let scope = join(&join(&join(root, COMMIT_DIR), project), logstore);
        let paths = Self {
            offset: join(&scope, OFFSET_DIR),
            lock: join(&scope, LOCK_DIR),
            range: join(&scope, RANGE_DIR),
            scope,
        };

        // TigerStyle: Assert postcondition.
        debug_assert!(validate_path(&paths.range).is_ok());
        Ok(paths)
    }

    /// The project/logstore-scoped root.
    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Directory of committed offset records.
    #[must_use]
    pub fn offset_dir(&self) -> &str {
        &self.offset
    }

    /// Directory of shard lock records.
    #[must_use]
    pub fn lock_dir(&self) -> &str {
        &self.lock
    }

    /// Directory of per-batch range-end records.
    #[must_use]
    pub fn range_dir(&self) -> &str {
        &self.range
    }

    /// The three directories created at bootstrap.
    #[must_use]
    pub fn directories(&self) -> [&str; 3] {
        [&self.offset, &self.lock, &self.range]
    }

    /// Path of a shard's committed offset.
    #[must_use]
    pub fn offset_path(&self, shard_id: ShardId) -> String {
        join(&self.offset, &shard_id.get().to_string())
    }

    /// Path of a shard's lock record.
    #[must_use]
    pub fn lock_path(&self, shard_id: ShardId) -> String {
        join(&self.lock, &shard_id.get().to_string())
    }

    /// Directory holding a shard's range-end records.
    #[must_use]
    pub fn shard_range_dir(&self, shard_id: ShardId) -> String {
        join(&self.range, &shard_id.get().to_string())
    }

    /// Path of the range-end record for one (shard, batch).
    #[must_use]
    pub fn range_end_path(&self, shard_id: ShardId, batch_id: BatchId) -> String {
        join(&self.shard_range_dir(shard_id), &batch_id.get().to_string())
    }
}

fn check_component(name: &'static str, value: &str) -> CoordResult<()> {
    let reject = |reason| {
        Err(CoordError::InvalidPathComponent {
            name,
            value: value.to_string(),
            reason,
        })
    };

    if value.trim().is_empty() {
        return reject("must not be empty");
    }
    if value.contains(SEPARATOR) {
        return reject("must not contain the path separator");
    }
    if value == "." || value == ".." {
        return reject("must not be a relative path segment");
    }
    Ok(())
}
