//! Cache trait and the namespace aware [`ResourceCache`].
//!
//! The cache stores one [`ResourcesContainer`] per [`ContainerKey`] and one
//! [`StatusInfo`] watch registry per connected target.
//!
//! ## Locking
//!
//! A single `tokio::sync::RwLock` guards containers and registries. Watch
//! creation and updates take it for writing and hold it while responses
//! are delivered, so a subscriber that does not drain its sink stalls the
//! whole cache until the send completes or is cancelled. Each registry has
//! its own inner mutex; the outer lock is always acquired first and the
//! inner one is never held across an await.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use xds_core::{
    BoxResource, DefaultNodeResolver, Node, NodeKey, NodeResolver, ResourceVersion, TlsMode,
    TypeUrl, XdsError, XdsResult,
};

use crate::config::CacheConfig;
use crate::container::ResourcesContainer;
use crate::delta::{prepare_delta, respond_delta, send_delta};
use crate::discovery::{DeltaRequest, DeltaResponse, Request, Response};
use crate::hooks::CacheHook;
use crate::request::{ContainerKey, UpdateResourcesRequest};
use crate::stats::CacheStats;
use crate::status::{DeltaResponseWatch, ResponseWatch, StatusInfo, StatusKey};
use crate::stream::{DeltaStreamState, StreamState};
use crate::watch::{CancelWatch, ResponseSink, WatchId, WatchIdGenerator};

/// Discovery side of an xDS cache.
///
/// Implemented by [`ResourceCache`] and [`LinearCache`](crate::LinearCache).
#[async_trait]
pub trait Cache: Send + Sync {
    /// Answer a state of the world request now, or open a watch that is
    /// answered once the requester's view is stale.
    ///
    /// Returns a no-op handle when the request was answered immediately.
    async fn create_watch(
        &self,
        request: Request,
        stream: &StreamState,
        sink: ResponseSink<Response>,
    ) -> XdsResult<CancelWatch>;

    /// Answer a delta request now, or open a watch.
    ///
    /// Returns `None` when a response was sent; `stream` then holds the new
    /// acknowledged baseline.
    async fn create_delta_watch(
        &self,
        request: DeltaRequest,
        stream: &mut DeltaStreamState,
        sink: ResponseSink<DeltaResponse>,
    ) -> XdsResult<Option<CancelWatch>>;

    /// Answer a request without registering a watch.
    ///
    /// Fails with [`XdsError::SkipFetch`] when the requester is current.
    async fn fetch(&self, request: &Request) -> XdsResult<Response>;
}

/// Whether an aggregated stream may be answered: a request that names
/// resources must name exactly the container's resources.
fn ads_allows(names: &[String], container: &ResourcesContainer) -> bool {
    if names.is_empty() {
        return true;
    }
    let requested: HashSet<&str> = names.iter().map(String::as_str).collect();
    requested.len() == container.len() && requested.iter().all(|name| container.contains(name))
}

#[derive(Debug, Default)]
struct NamespaceResources {
    by_type: HashMap<TypeUrl, ResourcesContainer>,
    clusters: HashMap<TlsMode, ResourcesContainer>,
}

impl NamespaceResources {
    fn is_empty(&self) -> bool {
        self.by_type.is_empty() && self.clusters.is_empty()
    }
}

#[derive(Debug, Default)]
struct CacheState {
    /// Listener containers by node id.
    lds_resources: HashMap<String, ResourcesContainer>,
    namespaces: HashMap<String, NamespaceResources>,
    /// Registries by namespace, then node id.
    status: HashMap<String, HashMap<String, Arc<StatusInfo>>>,
}

impl CacheState {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            lds_resources: HashMap::with_capacity(capacity),
            namespaces: HashMap::with_capacity(capacity),
            status: HashMap::with_capacity(capacity),
        }
    }

    fn container(&self, key: &ContainerKey) -> Option<&ResourcesContainer> {
        match key {
            ContainerKey::Listener { node_id } => self.lds_resources.get(node_id),
            ContainerKey::Cluster {
                namespace,
                tls_mode,
            } => self.namespaces.get(namespace)?.clusters.get(tls_mode),
            ContainerKey::Namespace {
                namespace,
                type_url,
            } => self.namespaces.get(namespace)?.by_type.get(type_url),
        }
    }

    fn container_mut(&mut self, key: &ContainerKey) -> Option<&mut ResourcesContainer> {
        match key {
            ContainerKey::Listener { node_id } => self.lds_resources.get_mut(node_id),
            ContainerKey::Cluster {
                namespace,
                tls_mode,
            } => self.namespaces.get_mut(namespace)?.clusters.get_mut(tls_mode),
            ContainerKey::Namespace {
                namespace,
                type_url,
            } => self.namespaces.get_mut(namespace)?.by_type.get_mut(type_url),
        }
    }

    fn container_entry(&mut self, key: &ContainerKey) -> &mut ResourcesContainer {
        let type_url = key.type_url();
        match key {
            ContainerKey::Listener { node_id } => self
                .lds_resources
                .entry(node_id.clone())
                .or_insert_with(|| ResourcesContainer::new(type_url)),
            ContainerKey::Cluster {
                namespace,
                tls_mode,
            } => self
                .namespaces
                .entry(namespace.clone())
                .or_default()
                .clusters
                .entry(*tls_mode)
                .or_insert_with(|| ResourcesContainer::new(type_url)),
            ContainerKey::Namespace {
                namespace,
                type_url: key_type,
            } => self
                .namespaces
                .entry(namespace.clone())
                .or_default()
                .by_type
                .entry(key_type.clone())
                .or_insert_with(|| ResourcesContainer::new(type_url)),
        }
    }

    fn status_entry(&mut self, key: &NodeKey, node: &Node) -> Arc<StatusInfo> {
        self.status
            .entry(key.namespace.clone())
            .or_default()
            .entry(key.node_id.clone())
            .or_insert_with(|| {
                debug!(node = %key, "registering target");
                Arc::new(StatusInfo::new(
                    node.clone(),
                    StatusKey::new(key.namespace.clone(), key.node_id.clone()),
                ))
            })
            .clone()
    }

    fn registries(&self) -> impl Iterator<Item = &Arc<StatusInfo>> {
        self.status.values().flat_map(HashMap::values)
    }
}

/// Resource cache partitioned by namespace, node and TLS mode.
///
/// Listener resources are stored per node, cluster resources per
/// namespace and TLS mode, and every other type per namespace.
///
/// # Example
///
/// ```rust
/// use xds_cache::{Cache, ResourceCache, ResponseSink, Request, StreamState, UpdateResourcesRequest};
/// use xds_core::{AnyResource, Node, TypeUrl};
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main]
/// # async fn main() -> xds_core::Result<()> {
/// let cache = ResourceCache::new();
///
/// let mut update = UpdateResourcesRequest::new();
/// update.add_namespace_resource(
///     "ns1",
///     TypeUrl::ROUTE,
///     AnyResource::from_bytes(TypeUrl::ROUTE, "local", vec![1]).boxed(),
/// );
/// cache.update_resources(&CancellationToken::new(), update).await?;
///
/// let (sink, mut rx) = ResponseSink::channel(1);
/// let request = Request::new(Node::new("envoy-1", "ns1"), TypeUrl::ROUTE);
/// cache.create_watch(request, &StreamState::new(), sink).await?;
///
/// let response = rx.recv().await.unwrap();
/// assert_eq!(response.resource_names(), vec!["local"]);
/// # Ok(())
/// # }
/// ```
pub struct ResourceCache {
    config: CacheConfig,
    state: RwLock<CacheState>,
    watch_ids: WatchIdGenerator,
    resolver: Arc<dyn NodeResolver>,
    hook: Option<Arc<dyn CacheHook>>,
    stats: CacheStats,
}

impl fmt::Debug for ResourceCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceCache")
            .field("config", &self.config)
            .field("watch_ids", &self.watch_ids)
            .field("hook", &self.hook.is_some())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Default for ResourceCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceCache {
    /// Create a cache with the default configuration and node resolver.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a cache with the given configuration.
    pub fn with_config(config: CacheConfig) -> Self {
        Self::builder().config(config).build()
    }

    /// Start building a cache.
    pub fn builder() -> CacheBuilder {
        CacheBuilder::default()
    }

    /// Get the configuration.
    #[inline]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Get the cache statistics.
    #[inline]
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    fn container_key(&self, node: &Node, type_url: &TypeUrl) -> ContainerKey {
        ContainerKey::resolve(&self.resolver.resolve(node), type_url)
    }

    /// Apply a batch of changes and answer every watch it makes stale.
    ///
    /// The cache stays locked for the whole call, including response
    /// delivery. Sends wait for sink capacity until either the subscriber's
    /// stream or `ctx` is cancelled. A failure to hash a resource stops the
    /// batch; containers changed before the failure keep their changes.
    pub async fn update_resources(
        &self,
        ctx: &CancellationToken,
        request: UpdateResourcesRequest,
    ) -> XdsResult<()> {
        let updates = request.into_updates();
        let mut state = self.state.write().await;

        for (key, update) in updates {
            let container = state.container_entry(&key);
            if let Err(err) = container.apply(update) {
                error!(
                    container = %key,
                    error = %err,
                    "update aborted, earlier containers in the batch remain applied"
                );
                return Err(err);
            }
            debug!(
                container = %key,
                version = %container.version(),
                resources = container.len(),
                "container updated"
            );
        }
        self.stats.record_update();

        self.respond_watches(&state, ctx).await?;
        self.respond_delta_watches(&mut state, ctx).await
    }

    async fn respond_watches(&self, state: &CacheState, ctx: &CancellationToken) -> XdsResult<()> {
        for status in state.registries() {
            for (id, watch) in status.watches() {
                let key = self.container_key(&watch.request.node, &watch.request.type_url);
                let Some(container) = state.container(&key) else {
                    continue;
                };
                if container.version().matches(&watch.request.version_info) {
                    continue;
                }
                if self.config.ads && !ads_allows(&watch.request.resource_names, container) {
                    self.stats.record_ads_suppression();
                    warn!(
                        watch_id = %id,
                        container = %key,
                        requested = watch.request.resource_names.len(),
                        "not responding on aggregated stream, requested names differ from container"
                    );
                    continue;
                }
                // Claim the watch so a concurrent cancel cannot race the send.
                if !status.remove_sotw_watch(id) {
                    continue;
                }

                let response = Response::new(
                    watch.request.clone(),
                    container.version().to_string(),
                    container.filtered(&watch.request.resource_names),
                );
                let sent = watch
                    .sink
                    .deliver(response, id, Some(ctx), self.config.slow_send_threshold)
                    .await;
                match sent {
                    Ok(()) => {
                        self.stats.record_response();
                        trace!(watch_id = %id, container = %key, version = %container.version(), "answered watch");
                    }
                    Err(XdsError::WatchClosed { .. }) => {
                        debug!(watch_id = %id, "subscriber gone, dropping watch");
                    }
                    Err(err) => {
                        status.set_watch(id, watch);
                        if ctx.is_cancelled() {
                            return Err(err);
                        }
                        debug!(watch_id = %id, error = %err, "send cancelled, watch kept");
                    }
                }
            }
        }
        Ok(())
    }

    async fn respond_delta_watches(
        &self,
        state: &mut CacheState,
        ctx: &CancellationToken,
    ) -> XdsResult<()> {
        let pending: Vec<(Arc<StatusInfo>, WatchId, DeltaResponseWatch)> = state
            .registries()
            .flat_map(|status| {
                status
                    .delta_watches()
                    .into_iter()
                    .map(move |(id, watch)| (status.clone(), id, watch))
            })
            .collect();
        if pending.is_empty() {
            return Ok(());
        }

        // Version maps are only built for containers that delta watches use.
        let keys: BTreeSet<ContainerKey> = pending
            .iter()
            .map(|(_, _, watch)| self.container_key(&watch.request.node, &watch.request.type_url))
            .collect();
        for key in &keys {
            if let Some(container) = state.container_mut(key) {
                if let Err(err) = container.ensure_version_map() {
                    error!(container = %key, error = %err, "failed to build version map");
                    return Err(err);
                }
            }
        }

        for (status, id, mut watch) in pending {
            let key = self.container_key(&watch.request.node, &watch.request.type_url);
            let Some(view) = state.container(&key).and_then(ResourcesContainer::delta_view) else {
                continue;
            };
            let Some(response) = prepare_delta(view, &watch.request, &watch.state) else {
                continue;
            };
            if !status.remove_delta_watch(id) {
                continue;
            }

            let sent = send_delta(
                response,
                &mut watch.state,
                &watch.sink,
                id,
                Some(ctx),
                self.config.slow_send_threshold,
            )
            .await;
            match sent {
                Ok(_) => {
                    self.stats.record_delta_response();
                    trace!(watch_id = %id, container = %key, "answered delta watch");
                }
                Err(XdsError::WatchClosed { .. }) => {
                    debug!(watch_id = %id, "delta subscriber gone, dropping watch");
                }
                Err(err) => {
                    status.set_delta_watch(id, watch);
                    if ctx.is_cancelled() {
                        return Err(err);
                    }
                    debug!(watch_id = %id, error = %err, "delta send cancelled, watch kept");
                }
            }
        }
        Ok(())
    }

    /// Targets with a registry, sorted.
    pub async fn get_status_keys(&self) -> Vec<StatusKey> {
        let state = self.state.read().await;
        let mut keys: Vec<StatusKey> = state.registries().map(|s| s.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Registry of a target.
    pub async fn status_info(&self, key: &StatusKey) -> Option<Arc<StatusInfo>> {
        let state = self.state.read().await;
        state.status.get(&key.namespace)?.get(&key.node_id).cloned()
    }

    /// Number of pending state of the world watches across all targets.
    pub async fn num_watches(&self) -> usize {
        let state = self.state.read().await;
        state.registries().map(|s| s.num_watches()).sum()
    }

    /// Number of pending delta watches across all targets.
    pub async fn num_delta_watches(&self) -> usize {
        let state = self.state.read().await;
        state.registries().map(|s| s.num_delta_watches()).sum()
    }

    /// Copy of the resources a node would be served for `type_url`.
    ///
    /// Cluster resources are looked up for the plaintext TLS mode. Returns
    /// an empty map if the container does not exist.
    pub async fn get_resources(
        &self,
        type_url: &TypeUrl,
        namespace: &str,
        node_id: &str,
    ) -> HashMap<String, BoxResource> {
        let key = ContainerKey::resolve(&NodeKey::new(namespace, node_id), type_url);
        self.container_resources(&key).await.unwrap_or_default()
    }

    /// Copy of a container's resources.
    pub async fn container_resources(
        &self,
        key: &ContainerKey,
    ) -> Option<HashMap<String, BoxResource>> {
        let state = self.state.read().await;
        state.container(key).map(ResourcesContainer::snapshot)
    }

    /// Current version of a container.
    pub async fn container_version(&self, key: &ContainerKey) -> Option<ResourceVersion> {
        let state = self.state.read().await;
        state.container(key).map(|c| c.version().clone())
    }

    /// Evict a node's registry and listener container.
    ///
    /// Pending watches of the node are dropped without a response.
    pub async fn clear_node(&self, key: &NodeKey) {
        let mut state = self.state.write().await;

        let mut removed_watches = 0;
        if let Some(nodes) = state.status.get_mut(&key.namespace) {
            if let Some(status) = nodes.remove(&key.node_id) {
                removed_watches = status.num_watches() + status.num_delta_watches();
            }
            if nodes.is_empty() {
                state.status.remove(&key.namespace);
            }
        }
        let removed_listeners = state.lds_resources.remove(&key.node_id).is_some();
        if state
            .namespaces
            .get(&key.namespace)
            .is_some_and(NamespaceResources::is_empty)
        {
            state.namespaces.remove(&key.namespace);
        }

        info!(
            node = %key,
            removed_watches,
            removed_listeners,
            "cleared node state"
        );
    }
}

#[async_trait]
impl Cache for ResourceCache {
    async fn create_watch(
        &self,
        request: Request,
        stream: &StreamState,
        sink: ResponseSink<Response>,
    ) -> XdsResult<CancelWatch> {
        if let Some(hook) = &self.hook {
            hook.on_create_watch(&request).await;
        }

        let node_key = self.resolver.resolve(&request.node);
        let key = ContainerKey::resolve(&node_key, &request.type_url);
        let mut state = self.state.write().await;
        let status = state.status_entry(&node_key, &request.node);
        status.touch_watch_request();

        if let Some(container) = state.container(&key) {
            let unseen = request
                .resource_names
                .iter()
                .any(|name| !stream.knows(&request.type_url, name) && container.contains(name));
            let stale = !container.version().matches(&request.version_info);

            if unseen || stale {
                if self.config.ads && !ads_allows(&request.resource_names, container) {
                    self.stats.record_ads_suppression();
                    warn!(
                        node = %node_key,
                        container = %key,
                        requested = request.resource_names.len(),
                        "not responding on aggregated stream, requested names differ from container"
                    );
                } else {
                    trace!(
                        node = %node_key,
                        container = %key,
                        unseen,
                        version = %container.version(),
                        "responding immediately"
                    );
                    let response = Response::new(
                        request.clone(),
                        container.version().to_string(),
                        container.filtered(&request.resource_names),
                    );
                    sink.deliver(
                        response,
                        WatchId::UNASSIGNED,
                        None,
                        self.config.slow_send_threshold,
                    )
                    .await?;
                    self.stats.record_response();
                    return Ok(CancelWatch::noop());
                }
            }
        }

        let id = self.watch_ids.next();
        debug!(
            watch_id = %id,
            node = %node_key,
            container = %key,
            version = %request.version_info,
            "open watch"
        );
        status.set_watch(id, ResponseWatch { request, sink });
        self.stats.record_watch();
        Ok(CancelWatch::new(&status, id))
    }

    async fn create_delta_watch(
        &self,
        request: DeltaRequest,
        stream: &mut DeltaStreamState,
        sink: ResponseSink<DeltaResponse>,
    ) -> XdsResult<Option<CancelWatch>> {
        if let Some(hook) = &self.hook {
            hook.on_create_delta_watch(&request).await;
        }

        let node_key = self.resolver.resolve(&request.node);
        let key = ContainerKey::resolve(&node_key, &request.type_url);
        let mut state = self.state.write().await;
        let status = state.status_entry(&node_key, &request.node);
        status.touch_delta_watch_request();

        let delayed = match state.container_mut(&key) {
            None => true,
            Some(container) => match container.ensure_version_map() {
                Err(err) => {
                    warn!(container = %key, error = %err, "failed to build version map, delaying delta response");
                    true
                }
                Ok(()) => match container.delta_view() {
                    Some(view) => respond_delta(
                        view,
                        &request,
                        stream,
                        &sink,
                        WatchId::UNASSIGNED,
                        None,
                        self.config.slow_send_threshold,
                    )
                    .await?
                    .is_none(),
                    None => true,
                },
            },
        };

        if !delayed {
            self.stats.record_delta_response();
            return Ok(None);
        }

        let id = self.watch_ids.next();
        debug!(
            watch_id = %id,
            node = %node_key,
            container = %key,
            wildcard = stream.is_wildcard(),
            "open delta watch"
        );
        status.set_delta_watch(
            id,
            DeltaResponseWatch {
                request,
                sink,
                state: stream.clone(),
            },
        );
        self.stats.record_delta_watch();
        Ok(Some(CancelWatch::new(&status, id)))
    }

    async fn fetch(&self, request: &Request) -> XdsResult<Response> {
        if let Some(hook) = &self.hook {
            hook.on_fetch(request).await;
        }

        let key = self.container_key(&request.node, &request.type_url);
        let state = self.state.read().await;
        let Some(container) = state.container(&key) else {
            self.stats.record_fetch_miss();
            return Err(XdsError::MissingSnapshot {
                type_url: request.type_url.to_string(),
                target: key.to_string(),
            });
        };

        if container.version().matches(&request.version_info) {
            self.stats.record_fetch_skip();
            trace!(container = %key, version = %request.version_info, "fetch skipped, requester is current");
            return Err(XdsError::SkipFetch {
                type_url: request.type_url.to_string(),
                version: request.version_info.clone(),
            });
        }

        self.stats.record_fetch_hit();
        Ok(Response::new(
            request.clone(),
            container.version().to_string(),
            container.filtered(&request.resource_names),
        ))
    }
}

/// Builder for [`ResourceCache`].
#[derive(Default)]
pub struct CacheBuilder {
    config: CacheConfig,
    resolver: Option<Arc<dyn NodeResolver>>,
    hook: Option<Arc<dyn CacheHook>>,
}

impl fmt::Debug for CacheBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheBuilder")
            .field("config", &self.config)
            .field("resolver", &self.resolver.is_some())
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

impl CacheBuilder {
    /// Enable or disable aggregated discovery mode.
    pub fn ads(mut self, ads: bool) -> Self {
        self.config.ads = ads;
        self
    }

    /// Set the initial capacity of the internal maps.
    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        self.config.initial_capacity = capacity;
        self
    }

    /// Set the delay after which a blocked send is logged.
    pub fn slow_send_threshold(mut self, threshold: std::time::Duration) -> Self {
        self.config.slow_send_threshold = threshold;
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the node resolver. Defaults to [`DefaultNodeResolver`].
    pub fn resolver(mut self, resolver: Arc<dyn NodeResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Set the hook awaited before each request is evaluated.
    pub fn hook(mut self, hook: Arc<dyn CacheHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Build the cache.
    pub fn build(self) -> ResourceCache {
        ResourceCache {
            state: RwLock::new(CacheState::with_capacity(self.config.initial_capacity)),
            config: self.config,
            watch_ids: WatchIdGenerator::default(),
            resolver: self
                .resolver
                .unwrap_or_else(|| Arc::new(DefaultNodeResolver)),
            hook: self.hook,
            stats: CacheStats::new(),
        }
    }
}
