//! Durable per-shard offsets and write-once range-end markers.
//!
//! Two record kinds live under a checkpoint:
//!
//! - **Offset records** (`offset/{shard}`): the last committed cursor for a
//!   shard, overwritten on every commit.
//! - **Range-end records** (`rdd/{shard}/{batch}`): the end cursor the engine
//!   consumed for one (shard, batch). Written at most once; the first writer
//!   wins and everyone else observes `false`.
//!
//! Neither needs a lock: the write-once marker is what makes concurrent,
//! speculative committers for the same batch converge.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use tidemark_core::{BatchId, ProgressToken, ShardId};
use tracing::{debug, info, warn};

use crate::error::{CoordError, CoordResult};
use crate::layout::CoordPaths;
use crate::store::CoordStore;

/// Offset and range-end persistence for one checkpoint.
pub struct OffsetStore {
    store: Arc<dyn CoordStore>,
    paths: CoordPaths,
}

impl OffsetStore {
    /// Creates an offset store over the given layout.
    #[must_use]
    pub fn new(store: Arc<dyn CoordStore>, paths: CoordPaths) -> Self {
        Self { store, paths }
    }

    /// Returns the layout this store writes under.
    #[must_use]
    pub const fn paths(&self) -> &CoordPaths {
        &self.paths
    }

    // -------------------------------------------------------------------------
    // Bootstrap
    // -------------------------------------------------------------------------

    /// Creates the offset, lock and range directories, clearing any that exist.
    ///
    /// This is fresh-checkpoint initialization: prior state is discarded, not
    /// merged. Run it once per checkpoint lifetime, never on resume.
    ///
    /// # Errors
    ///
    /// Any store failure is wrapped in [`CoordError::Bootstrap`], which names
    /// the coordination-store dependency and keeps the original as its source.
    pub async fn ensure_layout(&self) -> CoordResult<()> {
        self.reset_directories()
            .await
            .map_err(|source| CoordError::Bootstrap {
                root: self.paths.scope().to_string(),
                source: Box::new(source),
            })?;

        info!(root = %self.paths.scope(), "Initialized checkpoint layout");
        Ok(())
    }

    async fn reset_directories(&self) -> CoordResult<()> {
        for dir in self.paths.directories() {
            if self.store.exists(dir).await? {
                self.store.delete_recursive(dir).await?;
                debug!(dir = %dir, "Cleared existing checkpoint directory");
            }
            self.store.create_persistent(dir, Bytes::new(), true).await?;
        }
        Ok(())
    }

    /// Returns true if all three checkpoint directories exist.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the store cannot be reached.
    pub async fn is_initialized(&self) -> CoordResult<bool> {
        for dir in self.paths.directories() {
            if !self.store.exists(dir).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Bootstraps the layout unless it already exists. Returns true if it bootstrapped.
    ///
    /// An existing layout means resume; its records are left alone.
    ///
    /// # Errors
    ///
    /// Any store failure is wrapped in [`CoordError::Bootstrap`].
    pub async fn initialize_if_absent(&self) -> CoordResult<bool> {
        let initialized = self
            .is_initialized()
            .await
            .map_err(|source| CoordError::Bootstrap {
                root: self.paths.scope().to_string(),
                source: Box::new(source),
            })?;
        if initialized {
            info!(root = %self.paths.scope(), "Resuming existing checkpoint");
            return Ok(false);
        }
        self.ensure_layout().await?;
        Ok(true)
    }

    // -------------------------------------------------------------------------
    // Offset Records
    // -------------------------------------------------------------------------

    /// Upserts the committed offset for a shard.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the store cannot be reached.
    pub async fn save_offset(&self, shard_id: ShardId, token: &ProgressToken) -> CoordResult<()> {
        let path = self.paths.offset_path(shard_id);
        let data = Bytes::copy_from_slice(token.as_bytes());

        match self.store.write_data(&path, data.clone()).await {
            Ok(()) => {}
            Err(CoordError::NotFound { .. }) => {
                match self.store.create_persistent(&path, data.clone(), true).await {
                    Ok(()) => {}
                    // Another committer created it first; ours still overwrites.
                    Err(CoordError::NodeExists { .. }) => {
                        self.store.write_data(&path, data).await?;
                    }
                    Err(e) => return Err(e),
                }
            }
            Err(e) => return Err(e),
        }

        debug!(shard = %shard_id, token = %token, "Saved offset");
        Ok(())
    }

    /// Reads the committed offset for a shard.
    ///
    /// Returns `None` if nothing was ever committed; an empty token comes back
    /// as `Some`.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the store cannot be reached, `CorruptRecord`
    /// if the record is not UTF-8.
    pub async fn read_offset(&self, shard_id: ShardId) -> CoordResult<Option<ProgressToken>> {
        let path = self.paths.offset_path(shard_id);
        self.store
            .read_data(&path)
            .await?
            .map(|raw| decode_token(&path, &raw))
            .transpose()
    }

    /// Reads every committed offset in the checkpoint.
    ///
    /// Children whose names are not shard numbers are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the store cannot be reached.
    pub async fn read_all_offsets(&self) -> CoordResult<BTreeMap<ShardId, ProgressToken>> {
        let mut offsets = BTreeMap::new();
        for child in self.store.get_children(self.paths.offset_dir()).await? {
            let Ok(raw_id) = child.parse::<u64>() else {
                warn!(child = %child, "Ignoring non-shard entry in offset directory");
                continue;
            };
            let shard_id = ShardId::new(raw_id);
            // A concurrent reset can remove it between list and read.
            if let Some(token) = self.read_offset(shard_id).await? {
                offsets.insert(shard_id, token);
            }
        }
        Ok(offsets)
    }

    // -------------------------------------------------------------------------
    // Range-End Records
    // -------------------------------------------------------------------------

    /// Closes the range of `(shard_id, batch_id)` at `token`, once.
    ///
    /// Returns `true` only for the call that performed the first write. Later
    /// callers get `false` and must read the existing record with
    /// [`OffsetStore::read_range_end`] rather than trust their own `token`.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the store cannot be reached.
    pub async fn try_mark_range_end(
        &self,
        shard_id: ShardId,
        batch_id: BatchId,
        token: &ProgressToken,
    ) -> CoordResult<bool> {
        let path = self.paths.range_end_path(shard_id, batch_id);
        let data = Bytes::copy_from_slice(token.as_bytes());

        // The token is the create payload, so the record is never visible empty.
        match self.store.create_persistent(&path, data, true).await {
            Ok(()) => {
                debug!(shard = %shard_id, batch = %batch_id, token = %token, "Closed range");
                Ok(true)
            }
            Err(CoordError::NodeExists { .. }) => {
                warn!(shard = %shard_id, batch = %batch_id, "Range already closed by another committer");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Reads the end cursor of a closed range.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the range was never closed, `Unavailable` if the
    /// store cannot be reached.
    pub async fn read_range_end(
        &self,
        shard_id: ShardId,
        batch_id: BatchId,
    ) -> CoordResult<ProgressToken> {
        let path = self.paths.range_end_path(shard_id, batch_id);
        match self.store.read_data(&path).await? {
            Some(raw) => decode_token(&path, &raw),
            None => Err(CoordError::NotFound { path }),
        }
    }

    /// Deletes the range-end record of `(shard_id, batch_id)`. Absent is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the store cannot be reached.
    pub async fn cleanup_range(&self, shard_id: ShardId, batch_id: BatchId) -> CoordResult<()> {
        self.store
            .delete(&self.paths.range_end_path(shard_id, batch_id))
            .await?;
        debug!(shard = %shard_id, batch = %batch_id, "Cleaned up range");
        Ok(())
    }

    /// Lists the shards that have range-end records, ascending.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the store cannot be reached.
    pub async fn range_shards(&self) -> CoordResult<Vec<ShardId>> {
        let children = match self.store.get_children(self.paths.range_dir()).await {
            Ok(children) => children,
            Err(CoordError::NotFound { .. }) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut shards: Vec<ShardId> = children
            .iter()
            .filter_map(|c| c.parse::<u64>().ok())
            .map(ShardId::new)
            .collect();
        shards.sort_unstable();
        Ok(shards)
    }

    /// Lists the batches with a closed range for a shard, ascending.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the store cannot be reached.
    pub async fn closed_batches(&self, shard_id: ShardId) -> CoordResult<Vec<BatchId>> {
        let dir = self.paths.shard_range_dir(shard_id);
        let children = match self.store.get_children(&dir).await {
            Ok(children) => children,
            Err(CoordError::NotFound { .. }) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut batches: Vec<BatchId> = children
            .iter()
            .filter_map(|c| c.parse::<u64>().ok())
            .map(BatchId::new)
            .collect();
        batches.sort_unstable();
        Ok(batches)
    }
}

impl std::fmt::Debug for OffsetStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OffsetStore")
            .field("paths", &self.paths)
            .finish_non_exhaustive()
    }
}

fn decode_token(path: &str, raw: &[u8]) -> CoordResult<ProgressToken> {
    std::str::from_utf8(raw)
        .map(ProgressToken::new)
        .map_err(|_| CoordError::CorruptRecord {
            path: path.to_string(),
            reason: "token is not valid UTF-8",
        })
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
