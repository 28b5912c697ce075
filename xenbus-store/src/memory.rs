//! In-process store with xenstore semantics.
//!
//! Backs the integration tests of store consumers and works as an embedded
//! store: writes create intermediate nodes, removal deletes a subtree, and
//! watches fire for the registered path and everything below it.

use crate::error::{Result, StoreError};
use crate::notify;
use crate::store::{Store, WatchEvent};
use async_trait::async_trait;
use std::collections::HashMap;
use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};
use std::sync::Mutex as StdMutex;
use tokio::sync::{Mutex, mpsc};

struct State {
    /// Node path -> value. Intermediate nodes exist with an empty value.
    nodes: HashMap<String, Vec<u8>>,
    /// Registered (path, token) pairs.
    watches: Vec<(String, String)>,
}

/// An in-memory hierarchical store.
pub struct MemoryStore {
    state: StdMutex<State>,
    event_tx: StdMutex<Option<mpsc::UnboundedSender<WatchEvent>>>,
    events: Mutex<mpsc::UnboundedReceiver<WatchEvent>>,
    event_fd: Option<OwnedFd>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        MemoryStore {
            state: StdMutex::new(State {
                nodes: HashMap::new(),
                watches: Vec::new(),
            }),
            event_tx: StdMutex::new(Some(tx)),
            events: Mutex::new(rx),
            event_fd: notify::new_event_fd().ok(),
        }
    }

    /// Remove a node and its entire subtree, notifying watchers.
    pub fn remove(&self, path: &str) {
        let path = normalize(path);
        let existed = {
            let mut state = self.state.lock().unwrap();
            let prefix = format!("{path}/");
            let before = state.nodes.len();
            state.nodes.retain(|p, _| p != &path && !p.starts_with(&prefix));
            state.nodes.len() != before
        };
        if existed {
            self.fire(&path);
        }
    }

    /// Close the event stream: pending and future `next_event` calls fail
    /// with `Closed`.
    pub fn close(&self) {
        self.event_tx.lock().unwrap().take();
    }

    fn fire(&self, path: &str) {
        let targets: Vec<WatchEvent> = {
            let state = self.state.lock().unwrap();
            state
                .watches
                .iter()
                .filter(|(wpath, _)| subtree_match(wpath, path))
                .map(|(_, token)| WatchEvent {
                    path: path.to_string(),
                    token: token.clone(),
                })
                .collect()
        };
        if targets.is_empty() {
            return;
        }
        let tx = self.event_tx.lock().unwrap();
        let Some(tx) = tx.as_ref() else { return };
        for event in targets {
            if tx.send(event).is_ok()
                && let Some(fd) = &self.event_fd
            {
                notify::signal(fd.as_raw_fd());
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let path = normalize(path);
        let state = self.state.lock().unwrap();
        state
            .nodes
            .get(&path)
            .cloned()
            .ok_or(StoreError::NotFound(path))
    }

    async fn write(&self, path: &str, value: &[u8]) -> Result<()> {
        let path = normalize(path);
        {
            let mut state = self.state.lock().unwrap();
            for ancestor in ancestors(&path) {
                state.nodes.entry(ancestor).or_default();
            }
            state.nodes.insert(path.clone(), value.to_vec());
        }
        self.fire(&path);
        Ok(())
    }

    async fn directory(&self, path: &str) -> Result<Vec<String>> {
        let path = normalize(path);
        let state = self.state.lock().unwrap();
        if !state.nodes.contains_key(&path) {
            return Err(StoreError::NotFound(path));
        }
        let prefix = format!("{path}/");
        let mut children: Vec<String> = state
            .nodes
            .keys()
            .filter_map(|p| p.strip_prefix(&prefix))
            .filter(|rest| !rest.contains('/'))
            .map(|rest| rest.to_string())
            .collect();
        children.sort();
        Ok(children)
    }

    async fn exists(&self, path: &str) -> bool {
        let path = normalize(path);
        self.state.lock().unwrap().nodes.contains_key(&path)
    }

    async fn gather(&self, dir: &str, keys: &[&str]) -> Result<Vec<Option<Vec<u8>>>> {
        // One lock scope is the snapshot.
        let state = self.state.lock().unwrap();
        Ok(keys
            .iter()
            .map(|key| state.nodes.get(&normalize(&format!("{dir}/{key}"))).cloned())
            .collect())
    }

    async fn watch(&self, path: &str, token: &str) -> Result<()> {
        let path = normalize(path);
        let mut state = self.state.lock().unwrap();
        let registration = (path, token.to_string());
        if !state.watches.contains(&registration) {
            state.watches.push(registration);
        }
        Ok(())
    }

    async fn unwatch(&self, path: &str, token: &str) -> Result<()> {
        let path = normalize(path);
        let mut state = self.state.lock().unwrap();
        state.watches.retain(|(p, t)| !(*p == path && t == token));
        Ok(())
    }

    async fn next_event(&self) -> Result<WatchEvent> {
        let mut events = self.events.lock().await;
        events.recv().await.ok_or(StoreError::Closed)
    }

    fn event_fd(&self) -> Option<RawFd> {
        self.event_fd.as_ref().map(|fd| fd.as_raw_fd())
    }
}

fn normalize(path: &str) -> String {
    path.trim_end_matches('/').to_string()
}

/// All proper ancestors of a path, nearest last.
fn ancestors(path: &str) -> Vec<String> {
    path.match_indices('/')
        .map(|(i, _)| path[..i].to_string())
        .collect()
}

/// A watch on `wpath` fires for a mutation of `path` when either is equal
/// to or an ancestor of the other (removals notify ancestor watches too).
fn subtree_match(wpath: &str, path: &str) -> bool {
    wpath == path
        || path.strip_prefix(wpath).is_some_and(|r| r.starts_with('/'))
        || wpath.strip_prefix(path).is_some_and(|r| r.starts_with('/'))
}
