//! In-memory log source for deterministic simulation testing.
//!
//! Each shard is a sorted list of record timestamps (epoch seconds). A cursor
//! is the index of the next record to read, rendered as fixed-width hex so it
//! looks as opaque as a real one.

#![allow(clippy::significant_drop_tightening)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tidemark_core::{ProgressToken, ShardId, ShardPosition};

use crate::error::{SourceError, SourceResult};
use crate::source::{LogSource, ShardPositions};

// -----------------------------------------------------------------------------
// Fault Configuration
// -----------------------------------------------------------------------------

/// Fault configuration for the simulated log source.
#[derive(Debug, Clone, Default)]
pub struct LogSourceFaultConfig {
    /// Probability of any query failing (0.0 - 1.0).
    pub fetch_fail_rate: f64,
    /// Force next query to fail (one-shot).
    pub force_fetch_fail: bool,
}

impl LogSourceFaultConfig {
    /// No faults.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            fetch_fail_rate: 0.0,
            force_fetch_fail: false,
        }
    }

    /// Builder: set fetch fail rate.
    #[must_use]
    pub const fn with_fetch_fail_rate(mut self, rate: f64) -> Self {
        self.fetch_fail_rate = rate;
        self
    }
}

// -----------------------------------------------------------------------------
// Simulated Log Source
// -----------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct SimShard {
    created_at: u64,
    /// Record timestamps, non-decreasing.
    records: Vec<u64>,
}

impl SimShard {
    /// Index of the first record with timestamp after `bound`.
    fn index_after(&self, bound: u64) -> usize {
        self.records.partition_point(|&ts| ts <= bound)
    }

    /// Temporal bound of a cursor index.
    fn bound_of(&self, index: usize) -> u64 {
        match index {
            0 => self
                .records
                .first()
                .map_or(self.created_at, |&first| first.saturating_sub(1).min(self.created_at)),
            i => self.records[i - 1],
        }
    }
}

fn encode_cursor(index: usize) -> ProgressToken {
    ProgressToken::new(format!("{index:016x}"))
}

/// In-memory log source with fault injection.
///
/// Clones share state via `Arc` for multi-handle testing.
#[derive(Debug, Clone)]
pub struct SimulatedLogSource {
    shards: Arc<Mutex<BTreeMap<ShardId, SimShard>>>,
    fault_config: Arc<Mutex<LogSourceFaultConfig>>,
    seed: u64,
    counter: Arc<AtomicU64>,
}

impl SimulatedLogSource {
    /// Creates an empty source with no faults.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_faults(seed, LogSourceFaultConfig::none())
    }

    /// Creates an empty source with fault injection.
    #[must_use]
    pub fn with_faults(seed: u64, config: LogSourceFaultConfig) -> Self {
        Self {
            shards: Arc::new(Mutex::new(BTreeMap::new())),
            fault_config: Arc::new(Mutex::new(config)),
            seed,
            counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Creates a source with `shard_count` shards and random traffic.
    ///
    /// Each shard receives between zero and `max_per_sec` records in every
    /// second of `[start, start + secs)`, drawn from `seed`.
    #[must_use]
    pub fn with_random_traffic(
        seed: u64,
        shard_count: u64,
        start: u64,
        secs: u64,
        max_per_sec: u32,
    ) -> Self {
        let source = Self::new(seed);
        let mut rng = StdRng::seed_from_u64(seed);
        for raw in 0..shard_count {
            let shard_id = ShardId::new(raw);
            source.add_shard(shard_id, start);
            for second in start..start + secs {
                let count = rng.gen_range(0..=max_per_sec);
                source.append(shard_id, second, count);
            }
        }
        source
    }

    /// Returns fault config for modification.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    pub fn fault_config(&self) -> std::sync::MutexGuard<'_, LogSourceFaultConfig> {
        self.fault_config.lock().expect("fault config lock poisoned")
    }

    /// Adds an empty shard created at `created_at`. Existing shards are kept.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    pub fn add_shard(&self, shard_id: ShardId, created_at: u64) {
        let mut shards = self.shards.lock().expect("shards lock poisoned");
        shards.entry(shard_id).or_insert_with(|| SimShard {
            created_at,
            records: Vec::new(),
        });
    }

    /// Removes a shard, as if it had been retired.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    pub fn remove_shard(&self, shard_id: ShardId) {
        self.shards
            .lock()
            .expect("shards lock poisoned")
            .remove(&shard_id);
    }

    /// Appends `count` records stamped `timestamp` to a shard, creating it if needed.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned or `timestamp` precedes the shard's last record.
    pub fn append(&self, shard_id: ShardId, timestamp: u64, count: u32) {
        let mut shards = self.shards.lock().expect("shards lock poisoned");
        let shard = shards.entry(shard_id).or_insert_with(|| SimShard {
            created_at: timestamp.saturating_sub(1),
            records: Vec::new(),
        });

        // TigerStyle: Assert precondition.
        assert!(
            shard.records.last().map_or(true, |&last| last <= timestamp),
            "records must be appended in timestamp order"
        );
        shard
            .records
            .extend(std::iter::repeat(timestamp).take(count as usize));
    }

    /// Total records in a shard (bypasses faults, for assertions in tests).
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn record_count(&self, shard_id: ShardId) -> u64 {
        let shards = self.shards.lock().expect("shards lock poisoned");
        shards.get(&shard_id).map_or(0, |s| s.records.len() as u64)
    }

    /// Deterministic RNG for fault injection.
    fn should_inject_fault(&self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        if rate >= 1.0 {
            return true;
        }
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        let hash = self
            .seed
            .wrapping_add(counter)
            .wrapping_mul(0x9e37_79b9_7f4a_7c15);
        #[allow(clippy::cast_precision_loss)]
        let normalized = (hash as f64) / (u64::MAX as f64);
        normalized < rate
    }

    fn check_fault(&self, operation: &'static str) -> SourceResult<()> {
        let rate = {
            let mut config = self.fault_config();
            if std::mem::take(&mut config.force_fetch_fail) {
                return Err(SourceError::Unavailable {
                    operation,
                    message: "simulated failure (forced)".into(),
                });
            }
            config.fetch_fail_rate
        };
        if self.should_inject_fault(rate) {
            return Err(SourceError::Unavailable {
                operation,
                message: "simulated failure (random)".into(),
            });
        }
        Ok(())
    }

    fn positions<F>(&self, shard_ids: &[ShardId], mut index_of: F) -> SourceResult<ShardPositions>
    where
        F: FnMut(&SimShard) -> usize,
    {
        let shards = self.shards.lock().expect("shards lock poisoned");
        let mut out = ShardPositions::new();
        for &shard_id in shard_ids {
            let shard = shards
                .get(&shard_id)
                .ok_or(SourceError::UnknownShard { shard_id })?;
            let index = index_of(shard);
            out.insert(
                shard_id,
                ShardPosition {
                    bound: shard.bound_of(index),
                    cursor: encode_cursor(index),
                },
            );
        }
        Ok(out)
    }
}

#[async_trait]
impl LogSource for SimulatedLogSource {
    async fn list_shards(&self) -> SourceResult<Vec<ShardId>> {
        self.check_fault("list_shards")?;
        let shards = self.shards.lock().expect("shards lock poisoned");
        Ok(shards.keys().copied().collect())
    }

    async fn fetch_earliest(&self, shard_ids: &[ShardId]) -> SourceResult<ShardPositions> {
        self.check_fault("fetch_earliest")?;
        self.positions(shard_ids, |_| 0)
    }

    async fn fetch_latest(&self, shard_ids: &[ShardId]) -> SourceResult<ShardPositions> {
        self.check_fault("fetch_latest")?;
        self.positions(shard_ids, |shard| shard.records.len())
    }

    async fn fetch_at(&self, shard_ids: &[ShardId], bound: u64) -> SourceResult<ShardPositions> {
        self.check_fault("fetch_at")?;
        self.positions(shard_ids, |shard| shard.index_after(bound))
    }

    async fn cursor_time(&self, shard_id: ShardId, cursor: &ProgressToken) -> SourceResult<u64> {
        self.check_fault("cursor_time")?;
        let shards = self.shards.lock().expect("shards lock poisoned");
        let shard = shards
            .get(&shard_id)
            .ok_or(SourceError::UnknownShard { shard_id })?;
        let index = usize::from_str_radix(cursor.as_str(), 16)
            .ok()
            .filter(|&i| i <= shard.records.len())
            .ok_or_else(|| SourceError::InvalidCursor {
                shard_id,
                cursor: cursor.as_str().to_string(),
            })?;
        Ok(shard.bound_of(index))
    }

    async fn count_records(
        &self,
        shard_id: ShardId,
        from_bound: u64,
        to_bound: u64,
    ) -> SourceResult<u64> {
        self.check_fault("count_records")?;
        let shards = self.shards.lock().expect("shards lock poisoned");
        let shard = shards
            .get(&shard_id)
            .ok_or(SourceError::UnknownShard { shard_id })?;
        if to_bound <= from_bound {
            return Ok(0);
        }
        let count = shard.index_after(to_bound) - shard.index_after(from_bound);
        Ok(count as u64)
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
