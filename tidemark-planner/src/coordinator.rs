//! Progress coordinator.
//!
//! The interface the execution engine talks to. It wires the coordination
//! store, the log source, the planner and the dynamic-config watcher for one
//! source, and exposes plan, commit and recovery calls.
//!
//! # Lifecycle
//!
//! [`ProgressCoordinator::open`] bootstraps a fresh checkpoint or resumes an
//! existing one. Bootstrap failures are fatal and carry the store error as
//! their source. After that, store and source failures are returned to the
//! caller for retry; nothing here retries internally.

use std::sync::{Arc, Mutex};

use tidemark_coord::{CoordError, CoordSessions, OffsetStore, ShardLock};
use tidemark_core::{BatchId, ProgressToken, ShardId};
use tidemark_source::{ShardOffsetReader, ShardPositions, SourceClients};
use tracing::{info, warn};

use crate::cap::LiveCap;
use crate::config::SourceOptions;
use crate::dynamic::{DynamicConfigHandle, DynamicConfigWatcher};
use crate::error::PlannerResult;
use crate::planner::{BatchOffsetPlanner, ShardRangePlan};

/// Progress bookkeeping for one streaming source.
pub struct ProgressCoordinator {
    options: SourceOptions,
    offsets: OffsetStore,
    lock: Arc<ShardLock>,
    planner: tokio::sync::Mutex<BatchOffsetPlanner>,
    cap: Arc<LiveCap>,
    watcher: Mutex<Option<DynamicConfigHandle>>,
    bootstrapped: bool,
}

impl ProgressCoordinator {
    /// Opens the coordinator, bootstrapping the checkpoint if it does not exist.
    ///
    /// On resume, committed offsets are read back and seed the planner.
    ///
    /// # Errors
    ///
    /// Returns `Config` for invalid options, `Coord(Bootstrap)` if the store
    /// cannot be reached while initializing, and `Source` if the log source
    /// fails during recovery.
    pub async fn open(
        options: SourceOptions,
        sessions: &CoordSessions,
        clients: &SourceClients,
    ) -> PlannerResult<Self> {
        options.validate()?;
        let paths = options.paths()?;

        let store = sessions
            .session(&options.coord)
            .await
            .map_err(|source| CoordError::Bootstrap {
                root: paths.scope().to_string(),
                source: Box::new(source),
            })?;
        let offsets = OffsetStore::new(Arc::clone(&store), paths.clone());
        let bootstrapped = offsets.initialize_if_absent().await?;
        let lock = sessions.shard_lock(&options.coord, &paths).await?;

        let source = clients.client(&options.source).await?;
        let cap = Arc::new(LiveCap::new(options.max_offsets_per_trigger));
        let mut planner = BatchOffsetPlanner::new(
            ShardOffsetReader::new(source),
            options.starting_position.clone(),
            Arc::clone(&cap),
        );
        if !bootstrapped {
            let committed = offsets.read_all_offsets().await?;
            planner.recover(&committed).await?;
        }

        let watcher = if options.dynamic_config_enabled {
            let watcher = Arc::new(DynamicConfigWatcher::new(
                options.project.clone(),
                options.logstore.clone(),
                Arc::clone(&cap),
            ));
            Some(watcher.start(store, options.dynamic_config_path.clone()).await?)
        } else {
            None
        };

        info!(
            root = %paths.scope(),
            bootstrapped,
            cap = ?cap.get(),
            dynamic_config = options.dynamic_config_enabled,
            "Opened progress coordinator"
        );

        Ok(Self {
            options,
            offsets,
            lock,
            planner: tokio::sync::Mutex::new(planner),
            cap,
            watcher: Mutex::new(watcher),
            bootstrapped,
        })
    }

    /// Returns the options this coordinator was opened with.
    #[must_use]
    pub const fn options(&self) -> &SourceOptions {
        &self.options
    }

    /// Returns true if `open` initialized a fresh checkpoint.
    #[must_use]
    pub const fn was_bootstrapped(&self) -> bool {
        self.bootstrapped
    }

    /// Returns the live per-batch cap.
    #[must_use]
    pub const fn live_cap(&self) -> &Arc<LiveCap> {
        &self.cap
    }

    /// Returns the offset store of this checkpoint.
    #[must_use]
    pub const fn offsets(&self) -> &OffsetStore {
        &self.offsets
    }

    /// Plans the next batch. See [`BatchOffsetPlanner::plan_next_batch`].
    ///
    /// # Errors
    ///
    /// Returns `Source` if the log source fails.
    pub async fn plan_next_batch(
        &self,
        previous: Option<&ShardPositions>,
    ) -> PlannerResult<ShardRangePlan> {
        self.planner.lock().await.plan_next_batch(previous).await
    }

    /// Records the end cursor the engine consumed for `(shard_id, batch_id)`.
    ///
    /// Returns `true` if this call closed the range; the shard's committed
    /// offset then advances to `token`. Returns `false` if the range was
    /// already closed. In that case the committed offset is brought up to the
    /// recorded winner's token when this is the shard's newest closed batch
    /// or no offset exists yet, so retrying a commit whose offset write
    /// failed still lands the offset. An older batch never rewrites the
    /// offset.
    ///
    /// # Errors
    ///
    /// Returns `Coord` if the store cannot be reached.
    pub async fn commit_range_end(
        &self,
        shard_id: ShardId,
        batch_id: BatchId,
        token: &ProgressToken,
    ) -> PlannerResult<bool> {
        if self
            .offsets
            .try_mark_range_end(shard_id, batch_id, token)
            .await?
        {
            self.offsets.save_offset(shard_id, token).await?;
            return Ok(true);
        }
        self.catch_up_offset(shard_id, batch_id).await?;
        Ok(false)
    }

    /// Saves the recorded end of a closed range as the offset if nothing newer has.
    async fn catch_up_offset(&self, shard_id: ShardId, batch_id: BatchId) -> PlannerResult<()> {
        let current = self.offsets.read_offset(shard_id).await?;
        let newest = self.offsets.closed_batches(shard_id).await?.last().copied();
        if current.is_some() && newest != Some(batch_id) {
            return Ok(());
        }

        let winner = self.offsets.read_range_end(shard_id, batch_id).await?;
        if current.as_ref() != Some(&winner) {
            self.offsets.save_offset(shard_id, &winner).await?;
            info!(shard = %shard_id, batch = %batch_id, token = %winner, "Caught up committed offset to closed range");
        }
        Ok(())
    }

    /// Reads the end cursor recorded for `(shard_id, batch_id)`.
    ///
    /// # Errors
    ///
    /// Returns `Coord(NotFound)` if the range was never closed.
    pub async fn range_end(
        &self,
        shard_id: ShardId,
        batch_id: BatchId,
    ) -> PlannerResult<ProgressToken> {
        Ok(self.offsets.read_range_end(shard_id, batch_id).await?)
    }

    /// Reads the last committed cursor of a shard.
    ///
    /// # Errors
    ///
    /// Returns `Coord` if the store cannot be reached.
    pub async fn last_committed_offset(
        &self,
        shard_id: ShardId,
    ) -> PlannerResult<Option<ProgressToken>> {
        Ok(self.offsets.read_offset(shard_id).await?)
    }

    /// Deletes the range-end records of a finished batch across all shards.
    ///
    /// # Errors
    ///
    /// Returns `Coord` if the store cannot be reached.
    pub async fn cleanup_batch(&self, batch_id: BatchId) -> PlannerResult<()> {
        for shard_id in self.offsets.range_shards().await? {
            self.offsets.cleanup_range(shard_id, batch_id).await?;
        }
        info!(batch = %batch_id, "Cleaned up batch ranges");
        Ok(())
    }

    /// Overwrites a shard's committed offset outside the batch cycle.
    ///
    /// Takes the shard lock for `lease_secs`, saves, and releases. Returns
    /// `false` without writing if another holder has the lock.
    ///
    /// # Errors
    ///
    /// Returns `Coord` if the store cannot be reached or the lease is out of
    /// bounds.
    pub async fn commit_out_of_band(
        &self,
        shard_id: ShardId,
        token: &ProgressToken,
        lease_secs: u64,
    ) -> PlannerResult<bool> {
        if !self.lock.try_lock(shard_id, lease_secs).await? {
            return Ok(false);
        }

        let saved = self.offsets.save_offset(shard_id, token).await;
        if let Err(e) = self.lock.unlock(shard_id).await {
            // The lease lapses on its own.
            warn!(shard = %shard_id, error = %e, "Failed to release shard lock");
        }
        saved?;
        info!(shard = %shard_id, token = %token, "Committed offset out of band");
        Ok(true)
    }

    /// Stops the dynamic-config watcher. Idempotent.
    pub fn shutdown(&self) {
        let handle = self.watcher.lock().ok().and_then(|mut w| w.take());
        if let Some(handle) = handle {
            handle.stop();
            info!(root = %self.offsets.paths().scope(), "Stopped dynamic config watcher");
        }
    }

    /// Returns true while the dynamic-config watcher is running.
    #[must_use]
    pub fn is_watching(&self) -> bool {
        self.watcher
            .lock()
            .ok()
            .is_some_and(|w| w.as_ref().is_some_and(|h| !h.is_finished()))
    }
}

impl Drop for ProgressCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ProgressCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressCoordinator")
            .field("paths", self.offsets.paths())
            .field("cap", &self.cap.get())
            .field("bootstrapped", &self.bootstrapped)
            .finish_non_exhaustive()
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StartingPosition;
    use crate::error::PlannerError;
    use tidemark_coord::{CoordStore, SimulatedConnector, SimulatedCoordStore};
    use tidemark_source::{
        LogSource, SimulatedLogSource, SimulatedSourceConnector, SourceIdentity,
    };

    const T0: u64 = 1_700_000_000;

    struct Harness {
        store: SimulatedCoordStore,
        source: SimulatedLogSource,
        sessions: CoordSessions,
        clients: SourceClients,
    }

    impl Harness {
        fn new() -> Self {
            let store = SimulatedCoordStore::new(42);
            let source = SimulatedLogSource::new(42);
            for raw in 0..2 {
                source.add_shard(ShardId::new(raw), T0);
                for s in 1..=10 {
                    source.append(ShardId::new(raw), T0 + s, 10);
                }
            }
            Self {
                sessions: CoordSessions::new(Arc::new(SimulatedConnector::new(store.clone()))),
                clients: SourceClients::new(Arc::new(SimulatedSourceConnector::new(source.clone()))),
                store,
                source,
            }
        }

        fn options(&self) -> SourceOptions {
            SourceOptions::new(
                "zk:2181",
                "/ckpt",
                "P",
                "S",
                SourceIdentity::new("https://logs.example", "id", "secret"),
            )
            .with_starting_position(StartingPosition::Earliest)
        }

        async fn open(&self, options: SourceOptions) -> PlannerResult<ProgressCoordinator> {
            ProgressCoordinator::open(options, &self.sessions, &self.clients).await
        }
    }

    #[tokio::test]
    async fn test_open_bootstraps_then_resumes() {
        let h = Harness::new();
        let first = h.open(h.options()).await.unwrap();
        assert!(first.was_bootstrapped());

        let plan = first.plan_next_batch(None).await.unwrap();
        for (&shard, range) in &plan.ranges {
            assert!(first.commit_range_end(shard, BatchId::new(1), &range.end.cursor).await.unwrap());
        }
        drop(first);

        let second = h.open(h.options()).await.unwrap();
        assert!(!second.was_bootstrapped());
        let resumed = second.plan_next_batch(None).await.unwrap();
        assert_eq!(resumed.end_positions().len(), 2);
        for (shard, range) in &resumed.ranges {
            assert_eq!(range.start, plan.ranges[shard].end);
        }
        assert!(h.store.peek("/ckpt/commit/P/S/rdd/0/1").is_some());
    }

    #[tokio::test]
    async fn test_commit_range_end_first_writer_wins() {
        let h = Harness::new();
        let coordinator = h.open(h.options()).await.unwrap();
        let shard = ShardId::new(0);
        let batch = BatchId::new(7);
        let a = ProgressToken::new("A");
        let b = ProgressToken::new("B");

        assert!(coordinator.commit_range_end(shard, batch, &a).await.unwrap());
        assert!(!coordinator.commit_range_end(shard, batch, &b).await.unwrap());
        assert_eq!(coordinator.range_end(shard, batch).await.unwrap(), a);
        assert_eq!(coordinator.last_committed_offset(shard).await.unwrap(), Some(a));
        assert_eq!(coordinator.last_committed_offset(ShardId::new(1)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_commit_retry_lands_offset_after_partial_commit() {
        let h = Harness::new();
        let coordinator = h.open(h.options()).await.unwrap();
        let shard = ShardId::new(0);
        let token = ProgressToken::new("end-token");

        // The range was closed but the offset write never happened.
        assert!(coordinator
            .offsets()
            .try_mark_range_end(shard, BatchId::new(1), &token)
            .await
            .unwrap());
        assert_eq!(coordinator.last_committed_offset(shard).await.unwrap(), None);

        assert!(!coordinator.commit_range_end(shard, BatchId::new(1), &token).await.unwrap());
        assert_eq!(coordinator.last_committed_offset(shard).await.unwrap(), Some(token));
    }

    #[tokio::test]
    async fn test_late_commit_of_older_batch_keeps_newer_offset() {
        let h = Harness::new();
        let coordinator = h.open(h.options()).await.unwrap();
        let shard = ShardId::new(0);
        let old = ProgressToken::new("old");
        let new = ProgressToken::new("new");

        assert!(coordinator.commit_range_end(shard, BatchId::new(1), &old).await.unwrap());
        assert!(coordinator.commit_range_end(shard, BatchId::new(2), &new).await.unwrap());
        assert!(!coordinator.commit_range_end(shard, BatchId::new(1), &old).await.unwrap());
        assert_eq!(coordinator.last_committed_offset(shard).await.unwrap(), Some(new));
    }

    #[tokio::test]
    async fn test_cleanup_batch_removes_only_that_batch() {
        let h = Harness::new();
        let coordinator = h.open(h.options()).await.unwrap();
        let t = ProgressToken::new("t");
        for raw in 0..2 {
            for batch in 1..=2 {
                coordinator
                    .commit_range_end(ShardId::new(raw), BatchId::new(batch), &t)
                    .await
                    .unwrap();
            }
        }

        coordinator.cleanup_batch(BatchId::new(1)).await.unwrap();
        for raw in 0..2 {
            assert_eq!(
                coordinator.offsets().closed_batches(ShardId::new(raw)).await.unwrap(),
                vec![BatchId::new(2)]
            );
        }
        assert!(matches!(
            coordinator.range_end(ShardId::new(0), BatchId::new(1)).await.unwrap_err(),
            PlannerError::Coord(CoordError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_commit_out_of_band_respects_lock() {
        let h = Harness::new();
        let coordinator = h.open(h.options()).await.unwrap();
        let shard = ShardId::new(1);
        let token = ProgressToken::new("oob");

        assert!(coordinator.commit_out_of_band(shard, &token, 30).await.unwrap());
        assert_eq!(coordinator.last_committed_offset(shard).await.unwrap(), Some(token.clone()));
        // Released afterwards.
        assert!(h.store.peek("/ckpt/commit/P/S/lock/1").is_none());

        // Someone else holds a live lease.
        let far_future = tidemark_core::now_epoch_secs() + 3_600;
        h.store.poke("/ckpt/commit/P/S/lock/1", far_future.to_string());
        let other = ProgressToken::new("other");
        assert!(!coordinator.commit_out_of_band(shard, &other, 30).await.unwrap());
        assert_eq!(coordinator.last_committed_offset(shard).await.unwrap(), Some(token));
    }

    #[tokio::test]
    async fn test_dynamic_config_drives_cap() {
        let h = Harness::new();
        let path = "/tidemark/dynamic_config";
        h.store.poke(path, r#"{"version":"v1","config":{"P":{"S":{"maxOffsetsPerTrigger":"20"}}}}"#);

        let options = h.options().with_max_offsets_per_trigger(1000).with_dynamic_config(true);
        let coordinator = h.open(options).await.unwrap();
        assert!(coordinator.is_watching());
        assert_eq!(coordinator.live_cap().get(), Some(20));

        // 20 records per second across both shards.
        assert_eq!(coordinator.plan_next_batch(None).await.unwrap().bound, T0 + 1);

        coordinator.shutdown();
        assert!(!coordinator.is_watching());
        coordinator.shutdown();
    }

    #[tokio::test]
    async fn test_bootstrap_failure_is_wrapped() {
        let h = Harness::new();
        h.store.fault_config().unreachable = true;

        let err = h.open(h.options()).await.unwrap_err();
        let PlannerError::Coord(CoordError::Bootstrap { root, source }) = err else {
            panic!("expected bootstrap error, got {err:?}");
        };
        assert_eq!(root, "/ckpt/commit/P/S");
        assert!(source.is_unavailable());
    }

    #[tokio::test]
    async fn test_invalid_names_rejected_before_connecting() {
        let h = Harness::new();
        let mut options = h.options();
        options.logstore = "a/b".to_string();
        let err = h.open(options).await.unwrap_err();
        assert!(matches!(
            err,
            PlannerError::Coord(CoordError::InvalidPathComponent { .. })
        ));
        assert_eq!(h.sessions.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_source_is_shared_with_engine_view() {
        let h = Harness::new();
        let coordinator = h.open(h.options()).await.unwrap();
        let plan = coordinator.plan_next_batch(None).await.unwrap();
        let latest = h.source.fetch_latest(&[ShardId::new(0)]).await.unwrap();
        assert_eq!(plan.ranges[&ShardId::new(0)].end, latest[&ShardId::new(0)]);
        assert!(h.store.exists("/ckpt/commit/P/S/offset").await.unwrap());
    }
}
