//! Hooks run at the start of cache requests.
//!
//! A [`CacheHook`] is awaited before the cache takes its lock, so anything
//! it writes into the cache is visible to the request that triggered it.
//! [`OnDemandHook`] uses this to build a node's resources the first time
//! the node shows up.

use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use xds_core::{Node, NodeKey, NodeResolver, XdsResult};

use crate::cache::ResourceCache;
use crate::callbacks::NodeManager;
use crate::discovery::{DeltaRequest, Request};
use crate::request::UpdateResourcesRequest;

/// Observer of cache requests.
///
/// All methods default to doing nothing.
#[async_trait]
pub trait CacheHook: Send + Sync {
    /// Called before a state of the world watch is evaluated.
    async fn on_create_watch(&self, _request: &Request) {}

    /// Called before a delta watch is evaluated.
    async fn on_create_delta_watch(&self, _request: &DeltaRequest) {}

    /// Called before a fetch is answered.
    async fn on_fetch(&self, _request: &Request) {}
}

/// Produces the resources of a node.
#[async_trait]
pub trait ResourceBuilder: Send + Sync {
    /// Build the updates that bring `node`'s containers up to date.
    async fn build(&self, node: &NodeKey) -> XdsResult<UpdateResourcesRequest>;
}

/// Builds resources for a node the first time it is seen.
///
/// The hook must be [attached](OnDemandHook::attach) to the cache it
/// serves; it only keeps a weak reference so the cache can own it.
pub struct OnDemandHook {
    resolver: Arc<dyn NodeResolver>,
    builder: Arc<dyn ResourceBuilder>,
    nodes: Arc<NodeManager>,
    cache: OnceLock<Weak<ResourceCache>>,
}

impl OnDemandHook {
    /// Create a detached hook.
    pub fn new(
        resolver: Arc<dyn NodeResolver>,
        builder: Arc<dyn ResourceBuilder>,
        nodes: Arc<NodeManager>,
    ) -> Self {
        Self {
            resolver,
            builder,
            nodes,
            cache: OnceLock::new(),
        }
    }

    /// Point the hook at the cache it writes into.
    ///
    /// Returns `false` if the hook was already attached.
    pub fn attach(&self, cache: &Arc<ResourceCache>) -> bool {
        self.cache.set(Arc::downgrade(cache)).is_ok()
    }

    /// The node registry the hook records sightings in.
    pub fn nodes(&self) -> &Arc<NodeManager> {
        &self.nodes
    }

    async fn ensure_built(&self, node: &Node) {
        let key = self.resolver.resolve(node);
        if !self.nodes.observe(&key) {
            trace!(node = %key, "node already built");
            return;
        }

        let Some(cache) = self.cache.get().and_then(Weak::upgrade) else {
            warn!(node = %key, "on-demand hook is not attached to a cache");
            self.nodes.forget(&key);
            return;
        };

        let update = match self.builder.build(&key).await {
            Ok(update) => update,
            Err(err) => {
                warn!(node = %key, error = %err, "failed to build node resources");
                self.nodes.forget(&key);
                return;
            }
        };
        if update.is_empty() {
            debug!(node = %key, "builder produced no resources");
            return;
        }

        let changes = update.len();
        match cache
            .update_resources(&CancellationToken::new(), update)
            .await
        {
            Ok(()) => debug!(node = %key, changes, "built node resources on first request"),
            Err(err) => {
                warn!(node = %key, error = %err, "failed to apply node resources");
                self.nodes.forget(&key);
            }
        }
    }
}

impl fmt::Debug for OnDemandHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnDemandHook")
            .field("nodes", &self.nodes.len())
            .field("attached", &self.cache.get().is_some())
            .finish()
    }
}

#[async_trait]
impl CacheHook for OnDemandHook {
    async fn on_create_watch(&self, request: &Request) {
        self.ensure_built(&request.node).await;
    }

    async fn on_create_delta_watch(&self, request: &DeltaRequest) {
        self.ensure_built(&request.node).await;
    }

    async fn on_fetch(&self, request: &Request) {
        self.ensure_built(&request.node).await;
    }
}
