//! Single-type cache with a flat resource map.
//!
//! [`LinearCache`] serves one resource type from one shared name to
//! resource map, optionally overlaid per node. Versions are counters rather
//! than opaque tokens: each resource remembers the counter value of its
//! last change, so a watch is only answered for names that actually
//! changed since the version the requester holds.
//!
//! Versions on the wire read `<prefix><shared>~<node>`. Anything that does
//! not parse is treated as completely stale.
//!
//! The resource lock is taken before the watch table lock and held while
//! responses are delivered. Cancel handles only take the watch table lock.

use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};
use xds_core::{BoxResource, TypeUrl, XdsError, XdsResult};

use crate::container::{build_version_map, content_hash};
use crate::delta::{prepare_delta, respond_delta, send_delta, DeltaView};
use crate::discovery::{DeltaRequest, DeltaResponse, Request, Response};
use crate::hooks::CacheHook;
use crate::stats::CacheStats;
use crate::status::DeltaResponseWatch;
use crate::stream::{DeltaStreamState, StreamState};
use crate::watch::{CancelWatch, ResponseSink, WatchId, WatchIdGenerator, WatchRegistry};
use crate::Cache;

/// Split a wire version into its shared and node counters.
fn parse_version(prefix: &str, version_info: &str) -> Option<(u64, u64)> {
    let rest = version_info.strip_prefix(prefix)?;
    let (shared, node) = rest.split_once('~')?;
    Some((shared.parse().ok()?, node.parse().ok()?))
}

/// One layer of resources with its own version counter.
#[derive(Debug, Default)]
struct ResourceLayer {
    resources: HashMap<String, BoxResource>,
    version: u64,
    /// Counter value of each name's last change.
    version_vector: HashMap<String, u64>,
    version_map: Option<HashMap<String, String>>,
}

impl ResourceLayer {
    fn with_resources(resources: Vec<BoxResource>) -> Self {
        let resources: HashMap<String, BoxResource> = resources
            .into_iter()
            .map(|r| (r.name().to_string(), r))
            .collect();
        let version_vector = resources.keys().map(|name| (name.clone(), 0)).collect();
        Self {
            resources,
            version_vector,
            ..Default::default()
        }
    }

    fn hash_upserts(&self, upserts: &[BoxResource]) -> XdsResult<Option<Vec<(String, String)>>> {
        if self.version_map.is_none() {
            return Ok(None);
        }
        upserts
            .iter()
            .map(|r| content_hash(r.as_ref()).map(|hash| (r.name().to_string(), hash)))
            .collect::<XdsResult<Vec<_>>>()
            .map(Some)
    }

    /// Apply upserts and removals under one version bump.
    ///
    /// With `keep_removed`, a removed name keeps its version vector entry so
    /// the removal itself counts as a change for that name.
    fn apply(
        &mut self,
        upserts: Vec<BoxResource>,
        removals: Vec<String>,
        keep_removed: bool,
    ) -> XdsResult<HashSet<String>> {
        let hashes = self.hash_upserts(&upserts)?;
        self.version += 1;
        let version = self.version;
        let mut modified = HashSet::with_capacity(upserts.len() + removals.len());

        for name in removals {
            self.resources.remove(&name);
            if let Some(map) = self.version_map.as_mut() {
                map.remove(&name);
            }
            if keep_removed {
                self.version_vector.insert(name.clone(), version);
            } else {
                self.version_vector.remove(&name);
            }
            modified.insert(name);
        }
        for resource in upserts {
            let name = resource.name().to_string();
            self.version_vector.insert(name.clone(), version);
            self.resources.insert(name.clone(), resource);
            modified.insert(name);
        }
        if let (Some(map), Some(hashes)) = (self.version_map.as_mut(), hashes) {
            map.extend(hashes);
        }
        Ok(modified)
    }

    /// Replace the whole layer under one version bump.
    fn replace(&mut self, resources: Vec<BoxResource>) -> XdsResult<HashSet<String>> {
        let hashes = self.hash_upserts(&resources)?;
        self.version += 1;
        let version = self.version;

        let mut modified: HashSet<String> = self.resources.keys().cloned().collect();
        self.resources.clear();
        self.version_vector.clear();
        for resource in resources {
            let name = resource.name().to_string();
            self.version_vector.insert(name.clone(), version);
            self.resources.insert(name.clone(), resource);
            modified.insert(name);
        }
        if let Some(hashes) = hashes {
            self.version_map = Some(hashes.into_iter().collect());
        }
        Ok(modified)
    }

    /// Remove every resource under one version bump, keeping a version
    /// vector entry for each. Returns whether anything was removed.
    fn clear(&mut self) -> bool {
        if self.resources.is_empty() {
            return false;
        }
        self.version += 1;
        for name in std::mem::take(&mut self.resources).into_keys() {
            self.version_vector.insert(name, self.version);
        }
        if let Some(map) = self.version_map.as_mut() {
            map.clear();
        }
        true
    }

    fn ensure_version_map(&mut self) -> XdsResult<()> {
        if self.version_map.is_none() {
            self.version_map = Some(build_version_map(&self.resources)?);
        }
        Ok(())
    }

    fn changed_since(&self, name: &str, seen: u64) -> bool {
        self.version_vector.get(name).is_some_and(|v| *v > seen)
    }
}

/// What one node sees: the shared layer with its overlay on top.
struct EffectiveView<'a> {
    resources: Cow<'a, HashMap<String, BoxResource>>,
    versions: Option<Cow<'a, HashMap<String, String>>>,
    version: String,
}

impl EffectiveView<'_> {
    fn delta_view(&self) -> Option<DeltaView<'_>> {
        self.versions.as_ref().map(|versions| DeltaView {
            resources: &*self.resources,
            versions: &**versions,
            system_version: &self.version,
        })
    }

    /// Resources named by `names` sorted by name, or all of them if
    /// `names` is empty.
    fn select(&self, names: &[String]) -> Vec<BoxResource> {
        let mut out: Vec<BoxResource> = if names.is_empty() {
            self.resources.values().cloned().collect()
        } else {
            names
                .iter()
                .filter_map(|name| self.resources.get(name).cloned())
                .collect()
        };
        out.sort_by(|a, b| a.name().cmp(b.name()));
        out.dedup_by(|a, b| a.name() == b.name());
        out
    }
}

fn overlay<'a, V: Clone>(
    base: &'a HashMap<String, V>,
    top: Option<&HashMap<String, V>>,
) -> Cow<'a, HashMap<String, V>> {
    match top {
        Some(top) if !top.is_empty() => {
            let mut merged = base.clone();
            merged.extend(top.iter().map(|(k, v)| (k.clone(), v.clone())));
            Cow::Owned(merged)
        }
        _ => Cow::Borrowed(base),
    }
}

#[derive(Debug, Default)]
struct LinearResources {
    shared: ResourceLayer,
    nodes: HashMap<String, ResourceLayer>,
}

impl LinearResources {
    fn node_version(&self, node_id: &str) -> u64 {
        self.nodes.get(node_id).map_or(0, |layer| layer.version)
    }

    fn version_string(&self, prefix: &str, node_id: &str) -> String {
        format!("{prefix}{}~{}", self.shared.version, self.node_version(node_id))
    }

    fn contains(&self, node_id: &str, name: &str) -> bool {
        self.shared.resources.contains_key(name)
            || self
                .nodes
                .get(node_id)
                .is_some_and(|layer| layer.resources.contains_key(name))
    }

    fn effective(&self, prefix: &str, node_id: &str) -> EffectiveView<'_> {
        let layer = self.nodes.get(node_id);
        let resources = overlay(&self.shared.resources, layer.map(|l| &l.resources));
        let versions = match (self.shared.version_map.as_ref(), layer) {
            (None, _) => None,
            (Some(shared), None) => Some(Cow::Borrowed(shared)),
            (Some(shared), Some(layer)) => layer
                .version_map
                .as_ref()
                .map(|top| overlay(shared, Some(top))),
        };
        EffectiveView {
            resources,
            versions,
            version: self.version_string(prefix, node_id),
        }
    }

    fn ensure_version_maps(&mut self, node_id: &str) -> XdsResult<()> {
        self.shared.ensure_version_map()?;
        if let Some(layer) = self.nodes.get_mut(node_id) {
            layer.ensure_version_map()?;
        }
        Ok(())
    }

    /// Names of `request` the requester has to be sent now. `None` means
    /// the requester is current; an empty list means everything.
    fn stale_names(
        &self,
        prefix: &str,
        request: &Request,
        stream: &StreamState,
    ) -> Option<Vec<String>> {
        let node_id = request.node.id.as_str();
        let Some((seen_shared, seen_node)) = parse_version(prefix, &request.version_info) else {
            return Some(request.resource_names.clone());
        };

        if request.resource_names.is_empty() {
            let current = seen_shared == self.shared.version && seen_node == self.node_version(node_id);
            return (!current).then(Vec::new);
        }

        let layer = self.nodes.get(node_id);
        let stale: Vec<String> = request
            .resource_names
            .iter()
            .filter(|name| {
                self.shared.changed_since(name, seen_shared)
                    || layer.is_some_and(|l| l.changed_since(name, seen_node))
                    || (!stream.knows(&request.type_url, name) && self.contains(node_id, name))
            })
            .cloned()
            .collect();
        (!stale.is_empty()).then_some(stale)
    }
}

#[derive(Debug, Clone)]
struct LinearWatch {
    request: Request,
    sink: ResponseSink<Response>,
}

#[derive(Debug, Default)]
struct WatchTable {
    watches: HashMap<WatchId, LinearWatch>,
    by_name: HashMap<String, HashSet<WatchId>>,
    watch_all: HashSet<WatchId>,
    delta: HashMap<WatchId, DeltaResponseWatch>,
}

impl WatchTable {
    fn insert(&mut self, id: WatchId, watch: LinearWatch) {
        if watch.request.resource_names.is_empty() {
            self.watch_all.insert(id);
        } else {
            for name in &watch.request.resource_names {
                self.by_name.entry(name.clone()).or_default().insert(id);
            }
        }
        self.watches.insert(id, watch);
    }

    fn remove(&mut self, id: WatchId) -> Option<LinearWatch> {
        let watch = self.watches.remove(&id)?;
        self.watch_all.remove(&id);
        for name in &watch.request.resource_names {
            if let Some(ids) = self.by_name.get_mut(name) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.by_name.remove(name);
                }
            }
        }
        Some(watch)
    }

    /// Remove every watch affected by `modified` and group them by sink.
    fn take_matching(&mut self, modified: &HashSet<String>, node: Option<&str>) -> Vec<NotifyGroup> {
        let mut ids: BTreeSet<WatchId> = modified
            .iter()
            .filter_map(|name| self.by_name.get(name))
            .flatten()
            .copied()
            .collect();
        ids.extend(self.watch_all.iter().copied());

        let mut groups: Vec<NotifyGroup> = Vec::new();
        for id in ids {
            let for_node = match (node, self.watches.get(&id)) {
                (_, None) => false,
                (None, Some(_)) => true,
                (Some(node), Some(watch)) => watch.request.node.id == node,
            };
            if !for_node {
                continue;
            }
            let Some(watch) = self.remove(id) else {
                continue;
            };
            match groups.iter_mut().find(|g| g.sink.same_sink(&watch.sink)) {
                Some(group) => group.add(id, watch, modified),
                None => groups.push(NotifyGroup::new(id, watch, modified)),
            }
        }
        groups
    }

    fn remove_node(&mut self, node_id: &str) -> usize {
        let ids: Vec<WatchId> = self
            .watches
            .iter()
            .filter(|(_, w)| w.request.node.id == node_id)
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            self.remove(*id);
        }
        let before = self.delta.len();
        self.delta.retain(|_, w| w.request.node.id != node_id);
        ids.len() + before - self.delta.len()
    }
}

/// Watches sharing one sink, answered with a single response.
struct NotifyGroup {
    request: Request,
    sink: ResponseSink<Response>,
    watches: Vec<(WatchId, LinearWatch)>,
    names: BTreeSet<String>,
    all: bool,
}

impl NotifyGroup {
    fn new(id: WatchId, watch: LinearWatch, modified: &HashSet<String>) -> Self {
        let mut group = Self {
            request: watch.request.clone(),
            sink: watch.sink.clone(),
            watches: Vec::new(),
            names: BTreeSet::new(),
            all: false,
        };
        group.add(id, watch, modified);
        group
    }

    fn add(&mut self, id: WatchId, watch: LinearWatch, modified: &HashSet<String>) {
        if watch.request.resource_names.is_empty() {
            self.all = true;
        } else {
            self.names.extend(
                watch
                    .request
                    .resource_names
                    .iter()
                    .filter(|name| modified.contains(*name))
                    .cloned(),
            );
        }
        self.watches.push((id, watch));
    }

    fn id(&self) -> WatchId {
        self.watches
            .first()
            .map_or(WatchId::UNASSIGNED, |(id, _)| *id)
    }

    /// The request the merged response answers: every name the group is
    /// sent, or a wildcard if any of its watches is one.
    fn merged_request(&self) -> Request {
        let mut request = self.request.clone();
        request.resource_names = if self.all {
            Vec::new()
        } else {
            self.names.iter().cloned().collect()
        };
        request
    }
}

#[derive(Debug, Default)]
struct LinearWatches {
    table: Mutex<WatchTable>,
}

impl LinearWatches {
    fn restore(&self, watches: Vec<(WatchId, LinearWatch)>) {
        let mut table = self.table.lock();
        for (id, watch) in watches {
            table.insert(id, watch);
        }
    }
}

impl WatchRegistry for LinearWatches {
    fn remove_watch(&self, id: WatchId) -> bool {
        let mut table = self.table.lock();
        table.remove(id).is_some() || table.delta.remove(&id).is_some()
    }
}

/// Cache for a single resource type with optional per-node overrides.
///
/// # Example
///
/// ```rust
/// use xds_cache::{Cache, LinearCache, Request, ResponseSink, StreamState};
/// use xds_core::{AnyResource, Node, TypeUrl};
///
/// # #[tokio::main]
/// # async fn main() -> xds_core::Result<()> {
/// let cache = LinearCache::builder(TypeUrl::ENDPOINT).version_prefix("eds-").build();
/// cache
///     .update_resource(AnyResource::from_bytes(TypeUrl::ENDPOINT, "svc-a", vec![1]).boxed())
///     .await?;
///
/// let (sink, mut rx) = ResponseSink::channel(1);
/// let request = Request::new(Node::new("envoy-1", "ns1"), TypeUrl::ENDPOINT);
/// cache.create_watch(request, &StreamState::new(), sink).await?;
/// assert_eq!(rx.recv().await.unwrap().version, "eds-1~0");
/// # Ok(())
/// # }
/// ```
pub struct LinearCache {
    type_url: TypeUrl,
    version_prefix: String,
    resources: tokio::sync::Mutex<LinearResources>,
    watches: Arc<LinearWatches>,
    watch_ids: WatchIdGenerator,
    hook: Option<Arc<dyn CacheHook>>,
    stats: CacheStats,
    slow_send_threshold: Duration,
}

impl fmt::Debug for LinearCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinearCache")
            .field("type_url", &self.type_url)
            .field("version_prefix", &self.version_prefix)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl LinearCache {
    /// Create an empty cache for `type_url`.
    pub fn new(type_url: impl Into<TypeUrl>) -> Self {
        Self::builder(type_url).build()
    }

    /// Start building a cache for `type_url`.
    pub fn builder(type_url: impl Into<TypeUrl>) -> LinearCacheBuilder {
        LinearCacheBuilder {
            type_url: type_url.into(),
            version_prefix: String::new(),
            resources: Vec::new(),
            hook: None,
            slow_send_threshold: Duration::from_secs(1),
        }
    }

    /// The resource type served.
    pub fn type_url(&self) -> &TypeUrl {
        &self.type_url
    }

    /// Get the cache statistics.
    #[inline]
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    fn check_type(&self, type_url: &TypeUrl) -> XdsResult<()> {
        if *type_url == self.type_url {
            return Ok(());
        }
        Err(XdsError::InvalidTypeUrl {
            type_url: type_url.to_string(),
            reason: format!("cache serves {}", self.type_url),
        })
    }

    /// Upsert one shared resource.
    pub async fn update_resource(&self, resource: BoxResource) -> XdsResult<()> {
        self.update_resources(vec![resource], Vec::new()).await
    }

    /// Remove one shared resource.
    pub async fn delete_resource(&self, name: impl Into<String>) -> XdsResult<()> {
        self.update_resources(Vec::new(), vec![name.into()]).await
    }

    /// Upsert and remove shared resources under a single version bump, then
    /// answer the watches of every changed name.
    pub async fn update_resources(
        &self,
        upserts: Vec<BoxResource>,
        removals: Vec<String>,
    ) -> XdsResult<()> {
        let mut resources = self.resources.lock().await;
        let modified = resources.shared.apply(upserts, removals, false).map_err(|err| {
            error!(type_url = %self.type_url, error = %err, "failed to apply update");
            err
        })?;
        self.stats.record_update();
        debug!(
            type_url = %self.type_url,
            version = resources.shared.version,
            modified = modified.len(),
            "updated shared resources"
        );
        self.notify_all(&mut resources, &modified, None).await
    }

    /// Replace all shared resources under a single version bump.
    pub async fn set_resources(&self, replacement: Vec<BoxResource>) -> XdsResult<()> {
        let mut resources = self.resources.lock().await;
        let modified = resources.shared.replace(replacement).map_err(|err| {
            error!(type_url = %self.type_url, error = %err, "failed to replace resources");
            err
        })?;
        self.stats.record_update();
        debug!(
            type_url = %self.type_url,
            version = resources.shared.version,
            resources = resources.shared.resources.len(),
            "replaced shared resources"
        );
        self.notify_all(&mut resources, &modified, None).await
    }

    /// Upsert and remove overrides of one node.
    ///
    /// Removing an override reveals the shared resource again, so it
    /// counts as a change for the node.
    pub async fn update_node_resources(
        &self,
        node_id: &str,
        upserts: Vec<BoxResource>,
        removals: Vec<String>,
    ) -> XdsResult<()> {
        let mut resources = self.resources.lock().await;
        let layer = resources.nodes.entry(node_id.to_string()).or_default();
        let modified = layer.apply(upserts, removals, true).map_err(|err| {
            error!(node = node_id, error = %err, "failed to apply node update");
            err
        })?;
        self.stats.record_update();
        debug!(
            node = node_id,
            version = layer.version,
            modified = modified.len(),
            "updated node resources"
        );
        self.notify_all(&mut resources, &modified, Some(node_id)).await
    }

    /// Drop a node's overrides and pending watches.
    ///
    /// The node keeps its version counter, so a later overlay never reuses
    /// a version string the node was already sent. Returns whether any
    /// override was removed.
    pub async fn delete_node(&self, node_id: &str) -> bool {
        let mut resources = self.resources.lock().await;
        let removed = resources
            .nodes
            .get_mut(node_id)
            .is_some_and(ResourceLayer::clear);
        let dropped = self.watches.table.lock().remove_node(node_id);
        debug!(node = node_id, removed, dropped, "deleted node");
        removed
    }

    async fn notify_all(
        &self,
        resources: &mut LinearResources,
        modified: &HashSet<String>,
        node: Option<&str>,
    ) -> XdsResult<()> {
        let groups = self.watches.table.lock().take_matching(modified, node);

        for group in groups {
            let view = resources.effective(&self.version_prefix, &group.request.node.id);
            let request = group.merged_request();
            let selected = view.select(&request.resource_names);
            let response = Response::new(request, view.version.clone(), selected);
            let id = group.id();

            let sent = group
                .sink
                .deliver(response, id, None, self.slow_send_threshold)
                .await;
            match sent {
                Ok(()) => {
                    self.stats.record_response();
                    trace!(
                        watch_id = %id,
                        watches = group.watches.len(),
                        version = %view.version,
                        "answered watches"
                    );
                }
                Err(XdsError::WatchClosed { .. }) => {
                    debug!(watch_id = %id, "subscriber gone, dropping watches");
                }
                Err(err) => {
                    debug!(watch_id = %id, error = %err, "send cancelled, watches kept");
                    self.watches.restore(group.watches);
                }
            }
        }

        self.notify_delta(resources, node).await
    }

    async fn notify_delta(&self, resources: &mut LinearResources, node: Option<&str>) -> XdsResult<()> {
        let pending: Vec<(WatchId, DeltaResponseWatch)> = {
            let table = self.watches.table.lock();
            table
                .delta
                .iter()
                .filter(|(_, w)| node.map_or(true, |node| w.request.node.id == node))
                .map(|(id, w)| (*id, w.clone()))
                .collect()
        };
        if pending.is_empty() {
            return Ok(());
        }

        let node_ids: BTreeSet<&str> = pending
            .iter()
            .map(|(_, w)| w.request.node.id.as_str())
            .collect();
        for node_id in node_ids {
            if let Err(err) = resources.ensure_version_maps(node_id) {
                error!(node = node_id, error = %err, "failed to build version map");
                return Err(err);
            }
        }

        for (id, mut watch) in pending {
            let view = resources.effective(&self.version_prefix, &watch.request.node.id);
            let Some(response) = view
                .delta_view()
                .and_then(|delta| prepare_delta(delta, &watch.request, &watch.state))
            else {
                continue;
            };
            if self.watches.table.lock().delta.remove(&id).is_none() {
                continue;
            }

            let sent = send_delta(
                response,
                &mut watch.state,
                &watch.sink,
                id,
                None,
                self.slow_send_threshold,
            )
            .await;
            match sent {
                Ok(_) => {
                    self.stats.record_delta_response();
                    trace!(watch_id = %id, "answered delta watch");
                }
                Err(XdsError::WatchClosed { .. }) => {
                    debug!(watch_id = %id, "delta subscriber gone, dropping watch");
                }
                Err(err) => {
                    debug!(watch_id = %id, error = %err, "delta send cancelled, watch kept");
                    self.watches.table.lock().delta.insert(id, watch);
                }
            }
        }
        Ok(())
    }

    /// Copy of the shared resources.
    pub async fn get_resources(&self) -> HashMap<String, BoxResource> {
        self.resources.lock().await.shared.resources.clone()
    }

    /// Copy of the resources `node_id` is served, overrides included.
    pub async fn get_node_resources(&self, node_id: &str) -> HashMap<String, BoxResource> {
        let resources = self.resources.lock().await;
        resources
            .effective(&self.version_prefix, node_id)
            .resources
            .into_owned()
    }

    /// Number of shared resources.
    pub async fn num_resources(&self) -> usize {
        self.resources.lock().await.shared.resources.len()
    }

    /// Shared version counter.
    pub async fn version(&self) -> u64 {
        self.resources.lock().await.shared.version
    }

    /// Wire version `node_id` would be served.
    pub async fn version_for(&self, node_id: &str) -> String {
        self.resources
            .lock()
            .await
            .version_string(&self.version_prefix, node_id)
    }

    /// Number of pending watches naming `name`.
    pub fn num_watches(&self, name: &str) -> usize {
        self.watches
            .table
            .lock()
            .by_name
            .get(name)
            .map_or(0, HashSet::len)
    }

    /// Number of pending wildcard watches.
    pub fn num_wildcard_watches(&self) -> usize {
        self.watches.table.lock().watch_all.len()
    }

    /// Number of pending delta watches.
    pub fn num_delta_watches(&self) -> usize {
        self.watches.table.lock().delta.len()
    }
}

#[async_trait]
impl Cache for LinearCache {
    async fn create_watch(
        &self,
        request: Request,
        stream: &StreamState,
        sink: ResponseSink<Response>,
    ) -> XdsResult<CancelWatch> {
        self.check_type(&request.type_url)?;
        if let Some(hook) = &self.hook {
            hook.on_create_watch(&request).await;
        }

        let resources = self.resources.lock().await;
        if let Some(stale) = resources.stale_names(&self.version_prefix, &request, stream) {
            let view = resources.effective(&self.version_prefix, &request.node.id);
            trace!(
                node = %request.node.id,
                version = %request.version_info,
                stale = stale.len(),
                "responding immediately"
            );
            let response = Response::new(request, view.version.clone(), view.select(&stale));
            sink.deliver(response, WatchId::UNASSIGNED, None, self.slow_send_threshold)
                .await?;
            self.stats.record_response();
            return Ok(CancelWatch::noop());
        }

        let id = self.watch_ids.next();
        debug!(
            watch_id = %id,
            node = %request.node.id,
            names = request.resource_names.len(),
            "open watch"
        );
        self.watches
            .table
            .lock()
            .insert(id, LinearWatch { request, sink });
        self.stats.record_watch();
        Ok(CancelWatch::new(&self.watches, id))
    }

    async fn create_delta_watch(
        &self,
        request: DeltaRequest,
        stream: &mut DeltaStreamState,
        sink: ResponseSink<DeltaResponse>,
    ) -> XdsResult<Option<CancelWatch>> {
        self.check_type(&request.type_url)?;
        if let Some(hook) = &self.hook {
            hook.on_create_delta_watch(&request).await;
        }

        let mut resources = self.resources.lock().await;
        let delayed = match resources.ensure_version_maps(&request.node.id) {
            Err(err) => {
                warn!(node = %request.node.id, error = %err, "failed to build version map, delaying delta response");
                true
            }
            Ok(()) => {
                let view = resources.effective(&self.version_prefix, &request.node.id);
                match view.delta_view() {
                    Some(delta) => respond_delta(
                        delta,
                        &request,
                        stream,
                        &sink,
                        WatchId::UNASSIGNED,
                        None,
                        self.slow_send_threshold,
                    )
                    .await?
                    .is_none(),
                    None => true,
                }
            }
        };

        if !delayed {
            self.stats.record_delta_response();
            return Ok(None);
        }

        let id = self.watch_ids.next();
        debug!(
            watch_id = %id,
            node = %request.node.id,
            wildcard = stream.is_wildcard(),
            "open delta watch"
        );
        self.watches.table.lock().delta.insert(
            id,
            DeltaResponseWatch {
                request,
                sink,
                state: stream.clone(),
            },
        );
        self.stats.record_delta_watch();
        Ok(Some(CancelWatch::new(&self.watches, id)))
    }

    async fn fetch(&self, request: &Request) -> XdsResult<Response> {
        self.check_type(&request.type_url)?;
        if let Some(hook) = &self.hook {
            hook.on_fetch(request).await;
        }

        let resources = self.resources.lock().await;
        let view = resources.effective(&self.version_prefix, &request.node.id);
        if view.version == request.version_info {
            self.stats.record_fetch_skip();
            return Err(XdsError::SkipFetch {
                type_url: request.type_url.to_string(),
                version: request.version_info.clone(),
            });
        }
        self.stats.record_fetch_hit();
        Ok(Response::new(
            request.clone(),
            view.version.clone(),
            view.select(&request.resource_names),
        ))
    }
}

/// Builder for [`LinearCache`].
pub struct LinearCacheBuilder {
    type_url: TypeUrl,
    version_prefix: String,
    resources: Vec<BoxResource>,
    hook: Option<Arc<dyn CacheHook>>,
    slow_send_threshold: Duration,
}

impl fmt::Debug for LinearCacheBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinearCacheBuilder")
            .field("type_url", &self.type_url)
            .field("version_prefix", &self.version_prefix)
            .field("resources", &self.resources.len())
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

impl LinearCacheBuilder {
    /// Prefix put in front of every wire version.
    pub fn version_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.version_prefix = prefix.into();
        self
    }

    /// Resources present at version zero.
    pub fn initial_resources(mut self, resources: Vec<BoxResource>) -> Self {
        self.resources = resources;
        self
    }

    /// Set the hook awaited before each request is evaluated.
    pub fn hook(mut self, hook: Arc<dyn CacheHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Set the delay after which a blocked send is logged.
    pub fn slow_send_threshold(mut self, threshold: Duration) -> Self {
        self.slow_send_threshold = threshold;
        self
    }

    /// Build the cache.
    pub fn build(self) -> LinearCache {
        LinearCache {
            type_url: self.type_url,
            version_prefix: self.version_prefix,
            resources: tokio::sync::Mutex::new(LinearResources {
                shared: ResourceLayer::with_resources(self.resources),
                nodes: HashMap::new(),
            }),
            watches: Arc::new(LinearWatches::default()),
            watch_ids: WatchIdGenerator::default(),
            hook: self.hook,
            stats: CacheStats::new(),
            slow_send_threshold: self.slow_send_threshold,
        }
    }
}
