//! The `Store` trait: read/write/watch primitives against a hierarchical
//! key/value namespace.
//!
//! Implemented by [`crate::client::XenStore`] (the wire client) and
//! [`crate::memory::MemoryStore`] (in-process tree with the same watch
//! semantics).

use crate::error::Result;
use async_trait::async_trait;
use std::os::unix::io::RawFd;
use tracing::warn;

/// A change notification: the mutated path and the token the watch was
/// registered with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub path: String,
    pub token: String,
}

/// Read/write/watch primitives against the store.
///
/// Handles are shared read-mostly (`Arc<dyn Store>`); all methods take
/// `&self`. Watch events are consumed by a single logical consumer via
/// [`Store::next_event`], strictly in delivery order.
#[async_trait]
pub trait Store: Send + Sync {
    /// Read the value of a node.
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Write a value, creating intermediate nodes as needed.
    async fn write(&self, path: &str, value: &[u8]) -> Result<()>;

    /// Best-effort write for diagnostics: failures are logged, not returned.
    async fn write_weak(&self, path: &str, value: &[u8]) {
        if let Err(e) = self.write(path, value).await {
            warn!(path = %path, error = %e, "best-effort store write failed");
        }
    }

    /// List the child names of a node. Empty if the node has no children,
    /// `NotFound` if the node itself is absent.
    async fn directory(&self, path: &str) -> Result<Vec<String>>;

    /// Whether a node exists. Absence and I/O errors both yield false so
    /// that probing is never fatal.
    async fn exists(&self, path: &str) -> bool {
        self.directory(path).await.is_ok()
    }

    /// Read several child keys of `dir` as one consistent snapshot.
    ///
    /// Absent keys come back as `None`; store-level failures propagate.
    async fn gather(&self, dir: &str, keys: &[&str]) -> Result<Vec<Option<Vec<u8>>>>;

    /// Register a watch on a subtree. Duplicate registration of the same
    /// path + token is a no-op success.
    async fn watch(&self, path: &str, token: &str) -> Result<()>;

    /// Deregister a watch. Unknown registrations are a no-op success.
    async fn unwatch(&self, path: &str, token: &str) -> Result<()>;

    /// Block until the next watch event. Fails with `Closed` once the
    /// handle shuts down; this is the sole suspension point here.
    async fn next_event(&self) -> Result<WatchEvent>;

    /// The underlying event source for external poll loops, if the
    /// implementation has one. Readable once events have been queued;
    /// integrators read it to clear.
    fn event_fd(&self) -> Option<RawFd>;
}
