//! Cached log-source clients.
//!
//! One client per full identity (endpoint plus credentials), shared by every
//! caller in the process. Rotating the secret yields a distinct identity and so
//! a distinct client.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tidemark_core::InstanceCache;
use tracing::info;

use crate::error::SourceResult;
use crate::simulated::SimulatedLogSource;
use crate::source::{LogSource, SourceIdentity};

/// Builds log-source clients.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    /// Creates a client for `identity`.
    async fn connect(&self, identity: &SourceIdentity) -> SourceResult<Arc<dyn LogSource>>;
}

/// Connector returning handles onto one shared [`SimulatedLogSource`].
#[derive(Debug, Clone)]
pub struct SimulatedSourceConnector {
    source: SimulatedLogSource,
    connects: Arc<AtomicU64>,
}

impl SimulatedSourceConnector {
    /// Creates a connector over `source`.
    #[must_use]
    pub fn new(source: SimulatedLogSource) -> Self {
        Self {
            source,
            connects: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of clients created so far.
    #[must_use]
    pub fn connect_count(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceConnector for SimulatedSourceConnector {
    async fn connect(&self, identity: &SourceIdentity) -> SourceResult<Arc<dyn LogSource>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        info!(endpoint = %identity.endpoint, key_id = %identity.access_key_id, "Created simulated log-source client");
        Ok(Arc::new(self.source.clone()))
    }
}

/// Process-wide cache of log-source clients.
pub struct SourceClients {
    connector: Arc<dyn SourceConnector>,
    clients: InstanceCache<SourceIdentity, dyn LogSource>,
}

static SHARED: OnceLock<Arc<SourceClients>> = OnceLock::new();

impl SourceClients {
    /// Creates a private cache.
    #[must_use]
    pub fn new(connector: Arc<dyn SourceConnector>) -> Self {
        Self {
            connector,
            clients: InstanceCache::new(),
        }
    }

    /// Returns the process-wide cache, installing `connector` on first use.
    pub fn shared(connector: Arc<dyn SourceConnector>) -> Arc<Self> {
        Arc::clone(SHARED.get_or_init(|| Arc::new(Self::new(connector))))
    }

    /// Returns the cached client for `identity`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns the connector's error; failures are not cached.
    pub async fn client(&self, identity: &SourceIdentity) -> SourceResult<Arc<dyn LogSource>> {
        self.clients
            .get_or_try_init(identity, || self.connector.connect(identity))
            .await
    }

    /// Forgets the client for `identity`.
    pub async fn teardown(&self, identity: &SourceIdentity) {
        if self.clients.remove(identity).await.is_some() {
            info!(endpoint = %identity.endpoint, "Dropped log-source client");
        }
    }

    /// Number of cached clients.
    pub async fn client_count(&self) -> usize {
        self.clients.len().await
    }
}
