//! Advisory, lease-based shard locks.
//!
//! The store only guarantees atomic creation, so a lock record carries its
//! own expiry (epoch seconds, decimal text). The next acquirer reads that
//! expiry and decides whether the previous holder's lease has lapsed. There
//! is no reaper: a lapsed or corrupt lock is reclaimed by whoever asks next.
//!
//! # Reclaim policy
//!
//! A stored expiry is compared with *now*, not with the expiry the new caller
//! is asking for. Comparing against the requested expiry would let any
//! caller asking for a longer lease take over a live one, so two concurrent
//! contenders could both win a never-lapsed lock.
//!
//! An unparsable expiry counts as reclaimable. Under clock skew between
//! writers this trades exclusivity for availability: a holder whose record
//! got mangled, or whose clock runs behind, can lose its lock early. The
//! read-then-overwrite reclaim is also not atomic, so two callers that both
//! observe the same lapsed lease can both win. Both are accepted in exchange
//! for never locking a shard out behind a crashed holder.

#![allow(clippy::significant_drop_tightening)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tidemark_core::{now_epoch_secs, Limits, ShardId};
use tracing::{debug, info, warn};

use crate::error::{CoordError, CoordResult};
use crate::layout::CoordPaths;
use crate::store::CoordStore;

// -----------------------------------------------------------------------------
// Lease State
// -----------------------------------------------------------------------------

/// What a freshly-read lock record says about a shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    /// No record.
    Unheld,
    /// A record whose expiry has passed.
    Lapsed {
        /// When the previous lease ended.
        expired_at: u64,
    },
    /// A record whose expiry cannot be parsed.
    Corrupt,
    /// Another holder's unexpired lease.
    HeldByOther {
        /// When that lease ends.
        expires_at: u64,
    },
    /// Our own unexpired lease.
    HeldBySelf {
        /// When our lease ends.
        expires_at: u64,
    },
}

impl LeaseState {
    /// Classifies a lock record.
    ///
    /// `stored` is the raw record (`None` if absent), `own_expiry` the expiry
    /// this process last wrote for the shard, if it believes it holds it.
    #[must_use]
    pub fn decide(stored: Option<&[u8]>, own_expiry: Option<u64>, now: u64) -> Self {
        let Some(raw) = stored else {
            return Self::Unheld;
        };
        let Some(expires_at) = parse_expiry(raw) else {
            return Self::Corrupt;
        };
        if expires_at <= now {
            return Self::Lapsed {
                expired_at: expires_at,
            };
        }
        if own_expiry == Some(expires_at) {
            Self::HeldBySelf { expires_at }
        } else {
            Self::HeldByOther { expires_at }
        }
    }

    /// Returns true if a caller may take the lock in this state.
    #[must_use]
    pub const fn is_acquirable(self) -> bool {
        !matches!(self, Self::HeldByOther { .. })
    }
}

fn parse_expiry(raw: &[u8]) -> Option<u64> {
    std::str::from_utf8(raw).ok()?.trim().parse().ok()
}

fn encode_expiry(expires_at: u64) -> Bytes {
    Bytes::from(expires_at.to_string())
}

// -----------------------------------------------------------------------------
// Shard Lock
// -----------------------------------------------------------------------------

/// Lease-based advisory lock over every shard of one checkpoint.
///
/// The only cross-process mutual exclusion in Tidemark. Offset and range
/// writes are safe without it; it guards progress mutated outside the normal
/// batch cycle.
pub struct ShardLock {
    store: Arc<dyn CoordStore>,
    paths: CoordPaths,
    limits: Limits,
    /// Expiry of each lease this instance currently believes it holds.
    held: Mutex<HashMap<ShardId, u64>>,
}

impl ShardLock {
    /// Creates a lock helper over the checkpoint's lock directory.
    #[must_use]
    pub fn new(store: Arc<dyn CoordStore>, paths: CoordPaths) -> Self {
        Self::with_limits(store, paths, Limits::new())
    }

    /// Creates a lock helper with explicit limits.
    #[must_use]
    pub fn with_limits(store: Arc<dyn CoordStore>, paths: CoordPaths, limits: Limits) -> Self {
        Self {
            store,
            paths,
            limits,
            held: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the layout this lock writes under.
    #[must_use]
    pub const fn paths(&self) -> &CoordPaths {
        &self.paths
    }

    /// Tries to take the lock on `shard_id` for `lease_secs`, using the wall clock.
    ///
    /// # Errors
    ///
    /// See [`ShardLock::try_lock_at`].
    pub async fn try_lock(&self, shard_id: ShardId, lease_secs: u64) -> CoordResult<bool> {
        self.try_lock_at(shard_id, lease_secs, now_epoch_secs()).await
    }

    /// Tries to take the lock on `shard_id` for `lease_secs` as of `now`.
    ///
    /// Returns `Ok(false)` when another holder's lease has not lapsed; that is
    /// contention, not failure.
    ///
    /// # Errors
    ///
    /// Returns `Limit` for a zero or over-long lease or one that would end
    /// past `u64::MAX`, and `Unavailable` if the store cannot be reached.
    pub async fn try_lock_at(
        &self,
        shard_id: ShardId,
        lease_secs: u64,
        now: u64,
    ) -> CoordResult<bool> {
        self.limits.check_lease_secs(lease_secs)?;

        let path = self.paths.lock_path(shard_id);
        let expires_at = now
            .checked_add(lease_secs)
            .ok_or(tidemark_core::Error::InvalidArgument {
                name: "now",
                reason: "lease would end past the representable time range",
            })?;

        // TigerStyle: Assert precondition.
        debug_assert!(expires_at > now, "lease must end in the future");

        if self.create(&path, expires_at).await? {
            self.remember(shard_id, expires_at);
            debug!(shard = %shard_id, expires_at, "Acquired shard lock");
            return Ok(true);
        }

        let stored = self.store.read_data(&path).await?;
        let state = LeaseState::decide(stored.as_deref(), self.own_expiry(shard_id), now);

        match state {
            LeaseState::HeldByOther { expires_at: theirs } => {
                debug!(shard = %shard_id, held_until = theirs, "Shard lock contended");
                self.forget(shard_id);
                return Ok(false);
            }
            LeaseState::Unheld => {
                // Released between our create and our read; race for it again.
                if !self.create(&path, expires_at).await? {
                    debug!(shard = %shard_id, "Lost shard lock race after release");
                    return Ok(false);
                }
                self.remember(shard_id, expires_at);
                debug!(shard = %shard_id, expires_at, "Acquired shard lock");
                return Ok(true);
            }
            LeaseState::Corrupt => {
                warn!(shard = %shard_id, path = %path, "Reclaiming shard lock with unreadable expiry");
            }
            LeaseState::Lapsed { expired_at } => {
                info!(shard = %shard_id, expired_at, "Reclaiming lapsed shard lock");
            }
            LeaseState::HeldBySelf { .. } => {
                debug!(shard = %shard_id, expires_at, "Renewing shard lock");
            }
        }

        self.store.write_data(&path, encode_expiry(expires_at)).await?;
        self.remember(shard_id, expires_at);
        Ok(true)
    }

    /// Releases the lock on `shard_id`. Releasing an unheld lock is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the store cannot be reached.
    pub async fn unlock(&self, shard_id: ShardId) -> CoordResult<()> {
        self.store.delete(&self.paths.lock_path(shard_id)).await?;
        self.forget(shard_id);
        debug!(shard = %shard_id, "Released shard lock");
        Ok(())
    }

    /// Reads the current lease state of a shard without changing it.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the store cannot be reached.
    pub async fn inspect_at(&self, shard_id: ShardId, now: u64) -> CoordResult<LeaseState> {
        let stored = self.store.read_data(&self.paths.lock_path(shard_id)).await?;
        Ok(LeaseState::decide(
            stored.as_deref(),
            self.own_expiry(shard_id),
            now,
        ))
    }

    /// Atomic create; `Ok(false)` if the record already exists.
    async fn create(&self, path: &str, expires_at: u64) -> CoordResult<bool> {
        match self
            .store
            .create_persistent(path, encode_expiry(expires_at), true)
            .await
        {
            Ok(()) => Ok(true),
            Err(CoordError::NodeExists { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn own_expiry(&self, shard_id: ShardId) -> Option<u64> {
        self.held
            .lock()
            .ok()
            .and_then(|held| held.get(&shard_id).copied())
    }

    fn remember(&self, shard_id: ShardId, expires_at: u64) {
        if let Ok(mut held) = self.held.lock() {
            held.insert(shard_id, expires_at);
        }
    }

    fn forget(&self, shard_id: ShardId) {
        if let Ok(mut held) = self.held.lock() {
            held.remove(&shard_id);
        }
    }
}

impl std::fmt::Debug for ShardLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardLock")
            .field("lock_dir", &self.paths.lock_dir())
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
