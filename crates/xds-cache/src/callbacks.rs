//! Stream lifecycle callbacks and node bookkeeping.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};
use xds_core::{Node, NodeKey, NodeResolver};

use crate::cache::ResourceCache;

/// Identifier the transport assigns to each stream.
pub type StreamId = u64;

/// Notifications from the transport about stream lifetimes.
///
/// All methods default to doing nothing.
#[async_trait]
pub trait StreamCallbacks: Send + Sync {
    /// A state of the world stream received its first request from `node`.
    async fn on_stream_open(&self, _stream_id: StreamId, _node: &Node) {}

    /// A state of the world stream of `node` closed.
    async fn on_stream_closed(&self, _stream_id: StreamId, _node: &Node) {}

    /// A delta stream received its first request from `node`.
    async fn on_delta_stream_open(&self, _stream_id: StreamId, _node: &Node) {}

    /// A delta stream of `node` closed.
    async fn on_delta_stream_closed(&self, _stream_id: StreamId, _node: &Node) {}
}

/// Nodes that have been seen and the streams they hold open.
///
/// Backed by `DashMap`; no map reference is held across an await.
#[derive(Debug, Default)]
pub struct NodeManager {
    nodes: DashMap<NodeKey, Instant>,
    streams: DashMap<NodeKey, HashSet<StreamId>>,
}

impl NodeManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sighting. Returns `true` the first time a node is seen.
    pub fn observe(&self, key: &NodeKey) -> bool {
        match self.nodes.entry(key.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(Instant::now());
                debug!(node = %key, "first sighting of node");
                true
            }
        }
    }

    /// When a node was first seen.
    pub fn first_seen(&self, key: &NodeKey) -> Option<Instant> {
        self.nodes.get(key).map(|entry| *entry)
    }

    /// Forget a sighting so the next one counts as first again.
    pub fn forget(&self, key: &NodeKey) -> bool {
        self.nodes.remove(key).is_some()
    }

    /// Record an open stream. Returns the node's open stream count.
    pub fn open_stream(&self, key: &NodeKey, stream_id: StreamId) -> usize {
        let mut streams = self.streams.entry(key.clone()).or_default();
        streams.insert(stream_id);
        streams.len()
    }

    /// Record a closed stream. Returns `true` if the node has no open
    /// streams left.
    pub fn close_stream(&self, key: &NodeKey, stream_id: StreamId) -> bool {
        if let Some(mut streams) = self.streams.get_mut(key) {
            streams.remove(&stream_id);
        }
        match self.streams.remove_if(key, |_, streams| streams.is_empty()) {
            Some(_) => true,
            None => !self.streams.contains_key(key),
        }
    }

    /// Number of open streams of a node.
    pub fn stream_count(&self, key: &NodeKey) -> usize {
        self.streams.get(key).map_or(0, |streams| streams.len())
    }

    /// Drop everything known about a node.
    pub fn deregister(&self, key: &NodeKey) {
        self.nodes.remove(key);
        self.streams.remove(key);
    }

    /// Number of known nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no node is known.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Known nodes, sorted.
    pub fn node_keys(&self) -> Vec<NodeKey> {
        let mut keys: Vec<NodeKey> = self.nodes.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }
}

/// Evicts a node's state when its last stream closes.
pub struct NodeCleanup {
    resolver: Arc<dyn NodeResolver>,
    nodes: Arc<NodeManager>,
    cache: Arc<ResourceCache>,
}

impl NodeCleanup {
    /// Create the callbacks.
    pub fn new(
        resolver: Arc<dyn NodeResolver>,
        nodes: Arc<NodeManager>,
        cache: Arc<ResourceCache>,
    ) -> Self {
        Self {
            resolver,
            nodes,
            cache,
        }
    }

    fn opened(&self, stream_id: StreamId, node: &Node) {
        let key = self.resolver.resolve(node);
        let open = self.nodes.open_stream(&key, stream_id);
        debug!(node = %key, stream_id, open, "stream opened");
    }

    async fn closed(&self, stream_id: StreamId, node: &Node) {
        let key = self.resolver.resolve(node);
        if !self.nodes.close_stream(&key, stream_id) {
            debug!(node = %key, stream_id, "stream closed, node still connected");
            return;
        }
        self.nodes.deregister(&key);
        self.cache.clear_node(&key).await;
        info!(node = %key, stream_id, "last stream closed, node evicted");
    }
}

impl fmt::Debug for NodeCleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeCleanup")
            .field("nodes", &self.nodes)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StreamCallbacks for NodeCleanup {
    async fn on_stream_open(&self, stream_id: StreamId, node: &Node) {
        self.opened(stream_id, node);
    }

    async fn on_stream_closed(&self, stream_id: StreamId, node: &Node) {
        self.closed(stream_id, node).await;
    }

    async fn on_delta_stream_open(&self, stream_id: StreamId, node: &Node) {
        self.opened(stream_id, node);
    }

    async fn on_delta_stream_closed(&self, stream_id: StreamId, node: &Node) {
        self.closed(stream_id, node).await;
    }
}
