//! Cached coordination-store sessions.
//!
//! Sessions and lock helpers are keyed by their full connection identity and
//! shared by every caller in the process. Establishing a session goes through
//! [`InstanceCache`], which serializes check-then-create so two callers never
//! open duplicate sessions for the same identity. After [`CoordSessions::teardown`]
//! the next access transparently reconnects.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use tidemark_core::InstanceCache;
use tracing::{info, warn};

use crate::error::{CoordError, CoordResult};
use crate::layout::CoordPaths;
use crate::lock::ShardLock;
use crate::simulated::SimulatedCoordStore;
use crate::store::CoordStore;

/// Default session timeout.
pub const SESSION_TIMEOUT_DEFAULT: Duration = Duration::from_secs(30);

// -----------------------------------------------------------------------------
// Endpoint
// -----------------------------------------------------------------------------

/// Full identity of a coordination-store connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CoordEndpoint {
    /// Connect string (host list).
    pub connect: String,
    /// Session timeout.
    pub session_timeout: Duration,
    /// Connection timeout.
    pub connection_timeout: Duration,
}

impl CoordEndpoint {
    /// Creates an endpoint; the connection timeout defaults to the session timeout.
    #[must_use]
    pub fn new(
        connect: impl Into<String>,
        session_timeout: Duration,
        connection_timeout: Option<Duration>,
    ) -> Self {
        Self {
            connect: connect.into(),
            session_timeout,
            connection_timeout: connection_timeout.unwrap_or(session_timeout),
        }
    }
}

// -----------------------------------------------------------------------------
// Connector
// -----------------------------------------------------------------------------

/// Opens sessions against a coordination store.
#[async_trait]
pub trait CoordConnector: Send + Sync {
    /// Connects to `endpoint`, honouring its timeouts.
    async fn connect(&self, endpoint: &CoordEndpoint) -> CoordResult<Arc<dyn CoordStore>>;
}

/// Connector handing out sessions on a shared [`SimulatedCoordStore`].
#[derive(Debug, Clone)]
pub struct SimulatedConnector {
    store: SimulatedCoordStore,
    connects: Arc<std::sync::atomic::AtomicU64>,
}

impl SimulatedConnector {
    /// Creates a connector over `store`.
    #[must_use]
    pub fn new(store: SimulatedCoordStore) -> Self {
        Self {
            store,
            connects: Arc::new(std::sync::atomic::AtomicU64::new(0)),
        }
    }

    /// Number of sessions opened so far.
    #[must_use]
    pub fn connect_count(&self) -> u64 {
        self.connects.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl CoordConnector for SimulatedConnector {
    async fn connect(&self, endpoint: &CoordEndpoint) -> CoordResult<Arc<dyn CoordStore>> {
        let session = self.store.new_session();
        // Probe so an unreachable ensemble fails the connect, not the first call.
        session.exists("/").await?;
        self.connects
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        info!(connect = %endpoint.connect, "Opened simulated coordination session");
        Ok(Arc::new(session))
    }
}

// -----------------------------------------------------------------------------
// Sessions
// -----------------------------------------------------------------------------

type LockKey = (CoordEndpoint, CoordPaths);

/// Process-wide cache of sessions and shard-lock helpers.
pub struct CoordSessions {
    connector: Arc<dyn CoordConnector>,
    sessions: InstanceCache<CoordEndpoint, dyn CoordStore>,
    locks: InstanceCache<LockKey, ShardLock>,
}

static SHARED: OnceLock<Arc<CoordSessions>> = OnceLock::new();

impl CoordSessions {
    /// Creates a private cache (tests, embedded use).
    #[must_use]
    pub fn new(connector: Arc<dyn CoordConnector>) -> Self {
        Self {
            connector,
            sessions: InstanceCache::new(),
            locks: InstanceCache::new(),
        }
    }

    /// Returns the process-wide cache, installing `connector` on first use.
    ///
    /// Later calls ignore their argument and return the installed instance.
    pub fn shared(connector: Arc<dyn CoordConnector>) -> Arc<Self> {
        Arc::clone(SHARED.get_or_init(|| Arc::new(Self::new(connector))))
    }

    /// Returns the cached session for `endpoint`, connecting if needed.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the connection cannot be established.
    pub async fn session(&self, endpoint: &CoordEndpoint) -> CoordResult<Arc<dyn CoordStore>> {
        self.sessions
            .get_or_try_init(endpoint, || self.connector.connect(endpoint))
            .await
    }

    /// Returns the cached lock helper for `(endpoint, paths)`.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the session cannot be established.
    pub async fn shard_lock(
        &self,
        endpoint: &CoordEndpoint,
        paths: &CoordPaths,
    ) -> CoordResult<Arc<ShardLock>> {
        let key = (endpoint.clone(), paths.clone());
        self.locks
            .get_or_try_init(&key, || async {
                let store = self.session(endpoint).await?;
                Ok::<_, CoordError>(Arc::new(ShardLock::new(store, paths.clone())))
            })
            .await
    }

    /// Closes and forgets the session for `endpoint` and its lock helpers.
    pub async fn teardown(&self, endpoint: &CoordEndpoint) {
        self.locks.retain(|(e, _)| e != endpoint).await;
        if let Some(session) = self.sessions.remove(endpoint).await {
            if let Err(e) = session.close().await {
                warn!(connect = %endpoint.connect, error = %e, "Failed to close coordination session");
            }
            info!(connect = %endpoint.connect, "Closed coordination session");
        }
    }

    /// Closes and forgets every cached session.
    pub async fn teardown_all(&self) {
        self.locks.drain().await;
        for session in self.sessions.drain().await {
            if let Err(e) = session.close().await {
                warn!(error = %e, "Failed to close coordination session");
            }
        }
    }

    /// Number of open sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.len().await
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
