//! Coordination store abstraction.
//!
//! The store is a hierarchical namespace with atomic create-if-absent and
//! per-path change notification. Tidemark only consumes it; implementations
//! wrap a real service client or, for DST, [`crate::SimulatedCoordStore`].

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{CoordError, CoordResult};

/// Path separator of the store namespace.
pub const SEPARATOR: char = '/';

// -----------------------------------------------------------------------------
// Watch Events
// -----------------------------------------------------------------------------

/// Kind of change observed on a watched path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    /// The node was created.
    Created,
    /// The node's data was overwritten.
    DataChanged,
    /// The node was deleted.
    Deleted,
}

/// A change notification for one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    /// The watched path.
    pub path: String,
    /// What happened.
    pub kind: WatchEventKind,
}

/// Receiving end of a path subscription.
///
/// Events are delivered by the store client's own notification machinery,
/// asynchronously to whoever issued the store calls.
pub type WatchReceiver = mpsc::UnboundedReceiver<WatchEvent>;

// -----------------------------------------------------------------------------
// CoordStore Trait
// -----------------------------------------------------------------------------

/// Hierarchical coordination store.
///
/// Every call is one round trip. Nothing here retries; transport failures
/// surface as [`CoordError::Unavailable`].
#[async_trait]
pub trait CoordStore: Send + Sync {
    /// Checks whether a node exists.
    async fn exists(&self, path: &str) -> CoordResult<bool>;

    /// Creates a persistent node holding `data`.
    ///
    /// With `recursive`, missing ancestors are created empty. Fails with
    /// [`CoordError::NodeExists`] if the node itself already exists, and with
    /// [`CoordError::NotFound`] if the parent is missing and `recursive` is off.
    async fn create_persistent(&self, path: &str, data: Bytes, recursive: bool)
        -> CoordResult<()>;

    /// Reads a node's data. Returns `None` if the node does not exist.
    async fn read_data(&self, path: &str) -> CoordResult<Option<Bytes>>;

    /// Overwrites a node's data. Fails with [`CoordError::NotFound`] if absent.
    async fn write_data(&self, path: &str, data: Bytes) -> CoordResult<()>;

    /// Lists the names (not full paths) of a node's children, sorted.
    async fn get_children(&self, path: &str) -> CoordResult<Vec<String>>;

    /// Deletes a leaf node. Deleting an absent node is a no-op.
    async fn delete(&self, path: &str) -> CoordResult<()>;

    /// Deletes a node and everything below it. Absent nodes are a no-op.
    async fn delete_recursive(&self, path: &str) -> CoordResult<()>;

    /// Subscribes to creation, data-change and deletion events on `path`.
    async fn subscribe(&self, path: &str) -> CoordResult<WatchReceiver>;

    /// Closes the session. Later calls on this handle fail as unavailable.
    async fn close(&self) -> CoordResult<()> {
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Path helpers
// -----------------------------------------------------------------------------

/// Joins a child name onto a parent path.
#[must_use]
pub fn join(parent: &str, child: &str) -> String {
    if parent.ends_with(SEPARATOR) {
        format!("{parent}{child}")
    } else {
        format!("{parent}{SEPARATOR}{child}")
    }
}

/// Returns the parent of an absolute path, or `None` for the root.
#[must_use]
pub fn parent_of(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind(SEPARATOR) {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Checks that `path` is absolute, has no empty segments and no trailing separator.
///
/// # Errors
///
/// Returns [`CoordError::InvalidPath`] describing the first problem found.
pub fn validate_path(path: &str) -> CoordResult<()> {
    let invalid = |reason| {
        Err(CoordError::InvalidPath {
            path: path.to_string(),
            reason,
        })
    };

    if !path.starts_with(SEPARATOR) {
        return invalid("must be absolute");
    }
    if path == "/" {
        return Ok(());
    }
    if path.ends_with(SEPARATOR) {
        return invalid("must not end with a separator");
    }
    if path[1..].split(SEPARATOR).any(str::is_empty) {
        return invalid("must not contain empty segments");
    }
    Ok(())
}
