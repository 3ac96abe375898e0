//! Per-target watch registries.
//!
//! Each connected target owns a [`StatusInfo`] with its own mutex guarding
//! the pending watches. The cache lock is always taken before this inner
//! lock, never after it, and the inner lock is never held across an await.

use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use parking_lot::Mutex;
use xds_core::Node;

use crate::discovery::{DeltaRequest, DeltaResponse, Request, Response};
use crate::stream::DeltaStreamState;
use crate::watch::{ResponseSink, WatchId, WatchRegistry};

/// Identifies one target registry.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatusKey {
    /// Namespace of the target.
    pub namespace: String,
    /// Node of the target.
    pub node_id: String,
}

impl StatusKey {
    /// Create a key.
    pub fn new(namespace: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            node_id: node_id.into(),
        }
    }
}

impl fmt::Display for StatusKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.node_id)
    }
}

/// A pending state of the world watch.
#[derive(Clone, Debug)]
pub struct ResponseWatch {
    /// The request to answer.
    pub request: Request,
    /// Where the answer goes.
    pub sink: ResponseSink<Response>,
}

/// A pending delta watch.
#[derive(Clone, Debug)]
pub struct DeltaResponseWatch {
    /// The request to answer.
    pub request: DeltaRequest,
    /// Where the answer goes.
    pub sink: ResponseSink<DeltaResponse>,
    /// Subscription state at the time the watch was opened.
    pub state: DeltaStreamState,
}

#[derive(Debug, Default)]
struct Watches {
    watches: HashMap<WatchId, ResponseWatch>,
    delta_watches: HashMap<WatchId, DeltaResponseWatch>,
    last_watch_request_time: Option<Instant>,
    last_delta_watch_request_time: Option<Instant>,
}

/// Watch registry of one target.
#[derive(Debug)]
pub struct StatusInfo {
    node: Node,
    key: StatusKey,
    inner: Mutex<Watches>,
}

impl StatusInfo {
    /// Create an empty registry for a node.
    pub fn new(node: Node, key: StatusKey) -> Self {
        Self {
            node,
            key,
            inner: Mutex::new(Watches::default()),
        }
    }

    /// The node as first seen.
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Registry key.
    pub fn key(&self) -> &StatusKey {
        &self.key
    }

    /// Number of pending state of the world watches.
    pub fn num_watches(&self) -> usize {
        self.inner.lock().watches.len()
    }

    /// Number of pending delta watches.
    pub fn num_delta_watches(&self) -> usize {
        self.inner.lock().delta_watches.len()
    }

    /// When the last state of the world watch was requested.
    pub fn last_watch_request_time(&self) -> Option<Instant> {
        self.inner.lock().last_watch_request_time
    }

    /// When the last delta watch was requested.
    pub fn last_delta_watch_request_time(&self) -> Option<Instant> {
        self.inner.lock().last_delta_watch_request_time
    }

    /// Whether a watch with this id is pending.
    pub fn has_watch(&self, id: WatchId) -> bool {
        let inner = self.inner.lock();
        inner.watches.contains_key(&id) || inner.delta_watches.contains_key(&id)
    }

    pub(crate) fn touch_watch_request(&self) {
        self.inner.lock().last_watch_request_time = Some(Instant::now());
    }

    pub(crate) fn touch_delta_watch_request(&self) {
        self.inner.lock().last_delta_watch_request_time = Some(Instant::now());
    }

    pub(crate) fn set_watch(&self, id: WatchId, watch: ResponseWatch) {
        self.inner.lock().watches.insert(id, watch);
    }

    pub(crate) fn set_delta_watch(&self, id: WatchId, watch: DeltaResponseWatch) {
        self.inner.lock().delta_watches.insert(id, watch);
    }

    /// Copy of the pending watches, taken so no lock is held while sending.
    pub(crate) fn watches(&self) -> Vec<(WatchId, ResponseWatch)> {
        self.inner
            .lock()
            .watches
            .iter()
            .map(|(id, watch)| (*id, watch.clone()))
            .collect()
    }

    pub(crate) fn delta_watches(&self) -> Vec<(WatchId, DeltaResponseWatch)> {
        self.inner
            .lock()
            .delta_watches
            .iter()
            .map(|(id, watch)| (*id, watch.clone()))
            .collect()
    }

    pub(crate) fn remove_sotw_watch(&self, id: WatchId) -> bool {
        self.inner.lock().watches.remove(&id).is_some()
    }

    pub(crate) fn remove_delta_watch(&self, id: WatchId) -> bool {
        self.inner.lock().delta_watches.remove(&id).is_some()
    }
}

impl WatchRegistry for StatusInfo {
    fn remove_watch(&self, id: WatchId) -> bool {
        let mut inner = self.inner.lock();
        inner.watches.remove(&id).is_some() || inner.delta_watches.remove(&id).is_some()
    }
}
