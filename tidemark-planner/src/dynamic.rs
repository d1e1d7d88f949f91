//! Dynamic configuration.
//!
//! Watches one JSON document in the coordination store and hot-applies the
//! per-batch record cap of this source:
//!
//! ```json
//! {"version": "v1", "config": {"<project>": {"<logstore>": {"maxOffsetsPerTrigger": "500"}}}}
//! ```
//!
//! Only `v1` is understood. Anything unexpected is logged at `warn!` and
//! ignored: a bad document must never stop batch planning.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tidemark_coord::{CoordResult, CoordStore, WatchEventKind};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cap::LiveCap;
use crate::config::keys;

/// The only document version understood.
pub const DYNAMIC_CONFIG_VERSION: &str = "v1";

const EXPECTED_SHAPE: &str = r#"{"version":"v1","config":{"<project>":{"<logstore>":{"maxOffsetsPerTrigger":"<positive integer>"}}}}"#;

/// Sections of other sources stay untyped; only ours is inspected.
#[derive(Debug, Deserialize)]
struct DocumentV1 {
    #[serde(default)]
    config: HashMap<String, Value>,
}

/// What applying a document did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DynamicConfigOutcome {
    /// The live cap changed.
    Updated {
        /// Cap before the change.
        old: Option<u64>,
        /// Cap after the change.
        new: u64,
    },
    /// The document was valid but did not change the cap.
    Unchanged,
    /// The document was ignored.
    Ignored {
        /// Why it was ignored.
        reason: String,
    },
}

// -----------------------------------------------------------------------------
// Watcher
// -----------------------------------------------------------------------------

/// Applies dynamic-config documents to a [`LiveCap`].
#[derive(Debug)]
pub struct DynamicConfigWatcher {
    project: String,
    logstore: String,
    cap: Arc<LiveCap>,
}

impl DynamicConfigWatcher {
    /// Creates a watcher for one source's section of the document.
    #[must_use]
    pub fn new(project: impl Into<String>, logstore: impl Into<String>, cap: Arc<LiveCap>) -> Self {
        Self {
            project: project.into(),
            logstore: logstore.into(),
            cap,
        }
    }

    /// Parses a raw document and applies it.
    pub fn apply_document(&self, raw: &[u8]) -> DynamicConfigOutcome {
        let outcome = match self.parse(raw) {
            Ok(None) => DynamicConfigOutcome::Unchanged,
            Ok(Some(new)) => {
                let old = self.cap.swap(Some(new));
                if old == Some(new) {
                    DynamicConfigOutcome::Unchanged
                } else {
                    DynamicConfigOutcome::Updated { old, new }
                }
            }
            Err(reason) => DynamicConfigOutcome::Ignored { reason },
        };

        match &outcome {
            DynamicConfigOutcome::Updated { old, new } => info!(
                project = %self.project,
                logstore = %self.logstore,
                old = ?old,
                new,
                "Applied dynamic maxOffsetsPerTrigger"
            ),
            DynamicConfigOutcome::Unchanged => {
                debug!(project = %self.project, logstore = %self.logstore, "Dynamic config unchanged");
            }
            DynamicConfigOutcome::Ignored { reason } => warn!(
                project = %self.project,
                logstore = %self.logstore,
                reason = %reason,
                expected = EXPECTED_SHAPE,
                "Ignoring dynamic config document"
            ),
        }
        outcome
    }

    /// Extracts this source's cap, `None` if the document does not set one.
    fn parse(&self, raw: &[u8]) -> Result<Option<u64>, String> {
        let value: Value =
            serde_json::from_slice(raw).map_err(|e| format!("not valid JSON: {e}"))?;
        let version = value
            .get("version")
            .ok_or_else(|| "missing 'version'".to_string())?;
        if version.as_str() != Some(DYNAMIC_CONFIG_VERSION) {
            return Err(format!("unsupported version {version}"));
        }

        let doc: DocumentV1 =
            serde_json::from_value(value).map_err(|e| format!("malformed v1 document: {e}"))?;
        let Some(stores) = doc.config.get(&self.project) else {
            return Ok(None);
        };
        let stores = stores
            .as_object()
            .ok_or_else(|| format!("config.{} must be an object", self.project))?;
        let Some(options) = stores.get(&self.logstore) else {
            return Ok(None);
        };
        let options = options.as_object().ok_or_else(|| {
            format!("config.{}.{} must be an object", self.project, self.logstore)
        })?;
        let Some(raw_cap) = options.get(keys::MAX_OFFSETS_PER_TRIGGER) else {
            return Ok(None);
        };

        let cap = match raw_cap {
            Value::String(s) => s.trim().parse::<u64>().ok(),
            Value::Number(n) => n.as_u64(),
            _ => None,
        };
        match cap {
            Some(n) if n > 0 => Ok(Some(n)),
            _ => Err(format!(
                "{} must be a positive integer, got {raw_cap}",
                keys::MAX_OFFSETS_PER_TRIGGER
            )),
        }
    }

    /// Reads the document at `path` and applies it. An absent document changes nothing.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the store cannot be read.
    pub async fn refresh(&self, store: &dyn CoordStore, path: &str) -> CoordResult<DynamicConfigOutcome> {
        match store.read_data(path).await? {
            Some(raw) => Ok(self.apply_document(&raw)),
            None => Ok(DynamicConfigOutcome::Unchanged),
        }
    }

    /// Applies the current document, then keeps applying changes in a background task.
    ///
    /// The subscription is taken before the initial read so no change is missed.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the subscription or the initial read fails.
    pub async fn start(
        self: Arc<Self>,
        store: Arc<dyn CoordStore>,
        path: impl Into<String>,
    ) -> CoordResult<DynamicConfigHandle> {
        let path = path.into();
        let mut events = store.subscribe(&path).await?;
        self.refresh(store.as_ref(), &path).await?;
        info!(path = %path, project = %self.project, logstore = %self.logstore, "Watching dynamic config");

        let task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event.kind {
                    WatchEventKind::Created | WatchEventKind::DataChanged => {
                        if let Err(e) = self.refresh(store.as_ref(), &path).await {
                            warn!(path = %path, error = %e, "Failed to read dynamic config");
                        }
                    }
                    WatchEventKind::Deleted => {
                        debug!(path = %path, "Dynamic config deleted; keeping current cap");
                    }
                }
            }
            debug!(path = %path, "Dynamic config subscription closed");
        });
        Ok(DynamicConfigHandle { task })
    }
}

/// Running watch task. Dropping the handle stops it.
#[derive(Debug)]
pub struct DynamicConfigHandle {
    task: JoinHandle<()>,
}

impl DynamicConfigHandle {
    /// Stops the watch task.
    pub fn stop(self) {
        drop(self);
    }

    /// Returns true once the task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for DynamicConfigHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
