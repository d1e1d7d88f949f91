//! In-memory coordination store for deterministic simulation testing.
//!
//! Models the contract Tidemark relies on: atomic create-if-absent,
//! hierarchical children, idempotent delete, and per-path watches delivered
//! on a channel. Clones share the namespace; [`SimulatedCoordStore::new_session`]
//! shares it too but gets an independent "closed" flag, modelling a second
//! client session against the same ensemble.

#![allow(clippy::significant_drop_tightening)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{CoordError, CoordResult};
use crate::store::{
    parent_of, validate_path, CoordStore, WatchEvent, WatchEventKind, WatchReceiver, SEPARATOR,
};

// -----------------------------------------------------------------------------
// Fault Configuration
// -----------------------------------------------------------------------------

/// Fault configuration for the simulated coordination store.
#[derive(Debug, Clone, Default)]
pub struct CoordStoreFaultConfig {
    /// Probability of read operations (`exists`, `read_data`, `get_children`) failing.
    pub read_fail_rate: f64,
    /// Probability of mutating operations failing.
    pub write_fail_rate: f64,
    /// Force next read to fail (one-shot).
    pub force_read_fail: bool,
    /// Force next write to fail (one-shot).
    pub force_write_fail: bool,
    /// Every operation fails while set, as if the ensemble were unreachable.
    pub unreachable: bool,
}

impl CoordStoreFaultConfig {
    /// No faults (all operations succeed).
    #[must_use]
    pub const fn none() -> Self {
        Self {
            read_fail_rate: 0.0,
            write_fail_rate: 0.0,
            force_read_fail: false,
            force_write_fail: false,
            unreachable: false,
        }
    }

    /// Flaky configuration for stress testing.
    #[must_use]
    pub const fn flaky() -> Self {
        Self {
            read_fail_rate: 0.05,
            write_fail_rate: 0.05,
            force_read_fail: false,
            force_write_fail: false,
            unreachable: false,
        }
    }

    /// Builder: set read fail rate.
    #[must_use]
    pub const fn with_read_fail_rate(mut self, rate: f64) -> Self {
        self.read_fail_rate = rate;
        self
    }

    /// Builder: set write fail rate.
    #[must_use]
    pub const fn with_write_fail_rate(mut self, rate: f64) -> Self {
        self.write_fail_rate = rate;
        self
    }

    /// Builder: start unreachable.
    #[must_use]
    pub const fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }
}

// -----------------------------------------------------------------------------
// Simulated Store
// -----------------------------------------------------------------------------

#[derive(Debug)]
struct Namespace {
    /// Node data by absolute path. The root is implicit.
    nodes: Mutex<BTreeMap<String, Bytes>>,
    /// Subscribers by watched path.
    watchers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<WatchEvent>>>>,
    /// Fault configuration, shared by every session.
    fault_config: Mutex<CoordStoreFaultConfig>,
    /// RNG seed for deterministic faults.
    seed: u64,
    /// Operation counter for deterministic RNG.
    counter: AtomicU64,
}

/// In-memory coordination store with fault injection.
#[derive(Debug, Clone)]
pub struct SimulatedCoordStore {
    namespace: Arc<Namespace>,
    closed: Arc<AtomicBool>,
}

impl SimulatedCoordStore {
    /// Creates an empty store with no faults.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_faults(seed, CoordStoreFaultConfig::none())
    }

    /// Creates an empty store with fault injection.
    #[must_use]
    pub fn with_faults(seed: u64, config: CoordStoreFaultConfig) -> Self {
        Self {
            namespace: Arc::new(Namespace {
                nodes: Mutex::new(BTreeMap::new()),
                watchers: Mutex::new(HashMap::new()),
                fault_config: Mutex::new(config),
                seed,
                counter: AtomicU64::new(0),
            }),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Opens another session on the same namespace.
    #[must_use]
    pub fn new_session(&self) -> Self {
        Self {
            namespace: Arc::clone(&self.namespace),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns true once `close` has been called on this session.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns fault config for modification.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    pub fn fault_config(&self) -> std::sync::MutexGuard<'_, CoordStoreFaultConfig> {
        self.namespace
            .fault_config
            .lock()
            .expect("fault config lock poisoned")
    }

    /// Returns every node path, sorted (bypasses faults, for assertions in tests).
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        let nodes = self.namespace.nodes.lock().expect("nodes lock poisoned");
        nodes.keys().cloned().collect()
    }

    /// Reads a node directly (bypasses faults, for assertions in tests).
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn peek(&self, path: &str) -> Option<Bytes> {
        let nodes = self.namespace.nodes.lock().expect("nodes lock poisoned");
        nodes.get(path).cloned()
    }

    /// Writes a node directly, creating ancestors (bypasses faults, for test setup).
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    pub fn poke(&self, path: &str, data: impl Into<Bytes>) {
        let mut events = Vec::new();
        {
            let mut nodes = self.namespace.nodes.lock().expect("nodes lock poisoned");
            Self::create_ancestors(&mut nodes, path, &mut events);
            let kind = if nodes.contains_key(path) {
                WatchEventKind::DataChanged
            } else {
                WatchEventKind::Created
            };
            nodes.insert(path.to_string(), data.into());
            events.push(WatchEvent {
                path: path.to_string(),
                kind,
            });
        }
        self.notify(events);
    }

    /// Deterministic RNG for fault injection.
    ///
    /// Uses `(seed + counter) * M` formula for reproducible fault injection.
    fn should_inject_fault(&self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        if rate >= 1.0 {
            return true;
        }
        let counter = self.namespace.counter.fetch_add(1, Ordering::Relaxed);
        let hash = self
            .namespace
            .seed
            .wrapping_add(counter)
            .wrapping_mul(0x9e37_79b9_7f4a_7c15);
        #[allow(clippy::cast_precision_loss)]
        let normalized = (hash as f64) / (u64::MAX as f64);
        normalized < rate
    }

    fn check_fault(&self, operation: &'static str, path: &str, mutating: bool) -> CoordResult<()> {
        let unavailable = |message: &str| {
            Err(CoordError::Unavailable {
                operation,
                path: path.to_string(),
                message: message.to_string(),
            })
        };

        if self.is_closed() {
            return unavailable("session closed");
        }

        let rate = {
            let mut config = self.fault_config();
            if config.unreachable {
                return unavailable("connection refused (simulated)");
            }
            let forced = if mutating {
                std::mem::take(&mut config.force_write_fail)
            } else {
                std::mem::take(&mut config.force_read_fail)
            };
            if forced {
                return unavailable("simulated failure (forced)");
            }
            if mutating {
                config.write_fail_rate
            } else {
                config.read_fail_rate
            }
        };

        if self.should_inject_fault(rate) {
            return unavailable("simulated failure (random)");
        }
        Ok(())
    }

    fn exists_in(nodes: &BTreeMap<String, Bytes>, path: &str) -> bool {
        path == "/" || nodes.contains_key(path)
    }

    fn create_ancestors(
        nodes: &mut BTreeMap<String, Bytes>,
        path: &str,
        events: &mut Vec<WatchEvent>,
    ) {
        let mut missing = Vec::new();
        let mut cursor = parent_of(path);
        while let Some(parent) = cursor {
            if Self::exists_in(nodes, parent) {
                break;
            }
            missing.push(parent.to_string());
            cursor = parent_of(parent);
        }
        for ancestor in missing.into_iter().rev() {
            nodes.insert(ancestor.clone(), Bytes::new());
            events.push(WatchEvent {
                path: ancestor,
                kind: WatchEventKind::Created,
            });
        }
    }

    fn child_prefix(path: &str) -> String {
        if path == "/" {
            path.to_string()
        } else {
            format!("{path}{SEPARATOR}")
        }
    }

    fn descendants(nodes: &BTreeMap<String, Bytes>, path: &str) -> Vec<String> {
        let prefix = Self::child_prefix(path);
        nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, _)| k.clone())
            .collect()
    }

    fn notify(&self, events: Vec<WatchEvent>) {
        if events.is_empty() {
            return;
        }
        let mut watchers = self
            .namespace
            .watchers
            .lock()
            .expect("watchers lock poisoned");
        for event in events {
            if let Some(senders) = watchers.get_mut(&event.path) {
                senders.retain(|tx| tx.send(event.clone()).is_ok());
            }
        }
    }
}

#[async_trait]
impl CoordStore for SimulatedCoordStore {
    async fn exists(&self, path: &str) -> CoordResult<bool> {
        validate_path(path)?;
        self.check_fault("exists", path, false)?;
        let nodes = self.namespace.nodes.lock().expect("nodes lock poisoned");
        Ok(Self::exists_in(&nodes, path))
    }

    async fn create_persistent(
        &self,
        path: &str,
        data: Bytes,
        recursive: bool,
    ) -> CoordResult<()> {
        validate_path(path)?;
        self.check_fault("create_persistent", path, true)?;

        let mut events = Vec::new();
        {
            let mut nodes = self.namespace.nodes.lock().expect("nodes lock poisoned");
            if Self::exists_in(&nodes, path) {
                return Err(CoordError::NodeExists {
                    path: path.to_string(),
                });
            }
            match parent_of(path) {
                Some(parent) if !Self::exists_in(&nodes, parent) => {
                    if !recursive {
                        return Err(CoordError::NotFound {
                            path: parent.to_string(),
                        });
                    }
                    Self::create_ancestors(&mut nodes, path, &mut events);
                }
                _ => {}
            }
            nodes.insert(path.to_string(), data);
            events.push(WatchEvent {
                path: path.to_string(),
                kind: WatchEventKind::Created,
            });
        }
        self.notify(events);
        Ok(())
    }

    async fn read_data(&self, path: &str) -> CoordResult<Option<Bytes>> {
        validate_path(path)?;
        self.check_fault("read_data", path, false)?;
        let nodes = self.namespace.nodes.lock().expect("nodes lock poisoned");
        Ok(nodes.get(path).cloned())
    }

    async fn write_data(&self, path: &str, data: Bytes) -> CoordResult<()> {
        validate_path(path)?;
        self.check_fault("write_data", path, true)?;
        {
            let mut nodes = self.namespace.nodes.lock().expect("nodes lock poisoned");
            let Some(slot) = nodes.get_mut(path) else {
                return Err(CoordError::NotFound {
                    path: path.to_string(),
                });
            };
            *slot = data;
        }
        self.notify(vec![WatchEvent {
            path: path.to_string(),
            kind: WatchEventKind::DataChanged,
        }]);
        Ok(())
    }

    async fn get_children(&self, path: &str) -> CoordResult<Vec<String>> {
        validate_path(path)?;
        self.check_fault("get_children", path, false)?;
        let nodes = self.namespace.nodes.lock().expect("nodes lock poisoned");
        if !Self::exists_in(&nodes, path) {
            return Err(CoordError::NotFound {
                path: path.to_string(),
            });
        }
        let prefix = Self::child_prefix(path);
        Ok(Self::descendants(&nodes, path)
            .into_iter()
            .filter_map(|k| {
                let rest = &k[prefix.len()..];
                (!rest.contains(SEPARATOR)).then(|| rest.to_string())
            })
            .collect())
    }

    async fn delete(&self, path: &str) -> CoordResult<()> {
        validate_path(path)?;
        self.check_fault("delete", path, true)?;
        {
            let mut nodes = self.namespace.nodes.lock().expect("nodes lock poisoned");
            if !nodes.contains_key(path) {
                return Ok(());
            }
            if !Self::descendants(&nodes, path).is_empty() {
                return Err(CoordError::NotEmpty {
                    path: path.to_string(),
                });
            }
            nodes.remove(path);
        }
        self.notify(vec![WatchEvent {
            path: path.to_string(),
            kind: WatchEventKind::Deleted,
        }]);
        Ok(())
    }

    async fn delete_recursive(&self, path: &str) -> CoordResult<()> {
        validate_path(path)?;
        self.check_fault("delete_recursive", path, true)?;
        let mut events = Vec::new();
        {
            let mut nodes = self.namespace.nodes.lock().expect("nodes lock poisoned");
            let mut doomed = Self::descendants(&nodes, path);
            if path != "/" && nodes.contains_key(path) {
                doomed.push(path.to_string());
            }
            // Deepest first, so events read like a bottom-up delete.
            doomed.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
            for victim in doomed {
                nodes.remove(&victim);
                events.push(WatchEvent {
                    path: victim,
                    kind: WatchEventKind::Deleted,
                });
            }
        }
        self.notify(events);
        Ok(())
    }

    async fn subscribe(&self, path: &str) -> CoordResult<WatchReceiver> {
        validate_path(path)?;
        self.check_fault("subscribe", path, false)?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.namespace
            .watchers
            .lock()
            .expect("watchers lock poisoned")
            .entry(path.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }

    async fn close(&self) -> CoordResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_is_atomic_if_absent() {
        let store = SimulatedCoordStore::new(42);
        store
            .create_persistent("/a", Bytes::from_static(b"1"), false)
            .await
            .unwrap();

        let err = store
            .create_persistent("/a", Bytes::from_static(b"2"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordError::NodeExists { .. }));
        assert_eq!(store.peek("/a"), Some(Bytes::from_static(b"1")));
    }

    #[tokio::test]
    async fn test_create_requires_parent_unless_recursive() {
        let store = SimulatedCoordStore::new(42);
        let err = store
            .create_persistent("/a/b/c", Bytes::new(), false)
            .await
            .unwrap_err();
        assert_eq!(err, CoordError::NotFound { path: "/a/b".into() });

        store
            .create_persistent("/a/b/c", Bytes::from_static(b"x"), true)
            .await
            .unwrap();
        assert_eq!(store.paths(), vec!["/a", "/a/b", "/a/b/c"]);
        assert_eq!(store.peek("/a"), Some(Bytes::new()));
    }

    #[tokio::test]
    async fn test_read_absent_is_none_and_empty_is_some() {
        let store = SimulatedCoordStore::new(42);
        assert_eq!(store.read_data("/missing").await.unwrap(), None);

        store.create_persistent("/empty", Bytes::new(), false).await.unwrap();
        assert_eq!(store.read_data("/empty").await.unwrap(), Some(Bytes::new()));
    }

    #[tokio::test]
    async fn test_write_absent_fails() {
        let store = SimulatedCoordStore::new(42);
        let err = store
            .write_data("/nope", Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_children_are_direct_and_sorted() {
        let store = SimulatedCoordStore::new(42);
        store.poke("/r/b", "1");
        store.poke("/r/a", "2");
        store.poke("/r/a/deep", "3");
        store.poke("/rx", "4");

        assert_eq!(store.get_children("/r").await.unwrap(), vec!["a", "b"]);
        assert_eq!(store.get_children("/").await.unwrap(), vec!["r", "rx"]);
        assert!(store.get_children("/zzz").await.is_err());
    }

    #[tokio::test]
    async fn test_delete_semantics() {
        let store = SimulatedCoordStore::new(42);
        store.poke("/r/a/b", "1");

        // Absent is a no-op.
        store.delete("/r/none").await.unwrap();
        // Non-empty is refused.
        assert!(matches!(
            store.delete("/r/a").await.unwrap_err(),
            CoordError::NotEmpty { .. }
        ));

        store.delete_recursive("/r").await.unwrap();
        assert!(store.paths().is_empty());
        store.delete_recursive("/r").await.unwrap();
    }

    #[tokio::test]
    async fn test_watch_delivers_created_and_changed() {
        let store = SimulatedCoordStore::new(42);
        let mut rx = store.subscribe("/cfg").await.unwrap();

        store.poke("/cfg", "v1");
        store.write_data("/cfg", Bytes::from_static(b"v2")).await.unwrap();
        store.delete("/cfg").await.unwrap();

        let kinds: Vec<_> = [
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
        ]
        .into_iter()
        .map(|e| e.kind)
        .collect();
        assert_eq!(
            kinds,
            vec![
                WatchEventKind::Created,
                WatchEventKind::DataChanged,
                WatchEventKind::Deleted
            ]
        );
    }

    #[tokio::test]
    async fn test_closed_session_is_unavailable() {
        let store = SimulatedCoordStore::new(42);
        let other = store.new_session();
        store.close().await.unwrap();

        assert!(store.exists("/").await.unwrap_err().is_unavailable());
        assert!(other.exists("/").await.unwrap());
    }

    #[tokio::test]
    async fn test_forced_failure_is_one_shot() {
        let store = SimulatedCoordStore::new(42);
        store.fault_config().force_write_fail = true;

        let err = store
            .create_persistent("/a", Bytes::new(), false)
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
        store.create_persistent("/a", Bytes::new(), false).await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_fails_everything() {
        let store =
            SimulatedCoordStore::with_faults(7, CoordStoreFaultConfig::none().unreachable());
        assert!(store.exists("/").await.unwrap_err().is_unavailable());
        assert!(store.read_data("/a").await.unwrap_err().is_unavailable());

        store.fault_config().unreachable = false;
        assert!(store.exists("/").await.unwrap());
    }

    #[tokio::test]
    async fn test_probabilistic_failure() {
        let store = SimulatedCoordStore::with_faults(
            42,
            CoordStoreFaultConfig::none().with_read_fail_rate(1.0),
        );
        for _ in 0..10 {
            assert!(store.exists("/").await.is_err());
        }
    }
}
