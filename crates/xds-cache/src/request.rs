//! Container addressing and update batches.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use xds_core::{BoxResource, NodeKey, TlsMode, TypeUrl};

/// Address of one resource container.
///
/// Listeners are node specific, clusters differ per TLS mode, and every
/// other type is shared by a namespace.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContainerKey {
    /// Namespace scoped container for a non-listener, non-cluster type.
    Namespace {
        /// Owning namespace.
        namespace: String,
        /// Resource type.
        type_url: TypeUrl,
    },
    /// Cluster container for a namespace and TLS mode.
    Cluster {
        /// Owning namespace.
        namespace: String,
        /// TLS mode the clusters were built for.
        tls_mode: TlsMode,
    },
    /// Listener container of one node.
    Listener {
        /// Owning node.
        node_id: String,
    },
}

impl ContainerKey {
    /// Route a node's request for `type_url` to its container.
    pub fn resolve(key: &NodeKey, type_url: &TypeUrl) -> Self {
        if type_url.is_listener() {
            Self::listener(key.node_id.clone())
        } else if type_url.is_cluster() {
            Self::cluster(key.namespace.clone(), key.tls_mode)
        } else {
            Self::namespace(key.namespace.clone(), type_url.clone())
        }
    }

    /// Address a namespace scoped container.
    ///
    /// Listener and cluster types are routed to their dedicated variants.
    pub fn namespace(namespace: impl Into<String>, type_url: impl Into<TypeUrl>) -> Self {
        let namespace = namespace.into();
        let type_url = type_url.into();
        if type_url.is_cluster() {
            return Self::cluster(namespace, TlsMode::None);
        }
        Self::Namespace {
            namespace,
            type_url,
        }
    }

    /// Address the cluster container of a namespace and TLS mode.
    pub fn cluster(namespace: impl Into<String>, tls_mode: TlsMode) -> Self {
        Self::Cluster {
            namespace: namespace.into(),
            tls_mode,
        }
    }

    /// Address a node's listener container.
    pub fn listener(node_id: impl Into<String>) -> Self {
        Self::Listener {
            node_id: node_id.into(),
        }
    }

    /// Resource type held by the container.
    pub fn type_url(&self) -> TypeUrl {
        match self {
            Self::Namespace { type_url, .. } => type_url.clone(),
            Self::Cluster { .. } => TypeUrl::new(TypeUrl::CLUSTER),
            Self::Listener { .. } => TypeUrl::new(TypeUrl::LISTENER),
        }
    }
}

impl fmt::Display for ContainerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Namespace {
                namespace,
                type_url,
            } => write!(f, "{namespace}/{}", type_url.short_name()),
            Self::Cluster {
                namespace,
                tls_mode,
            } => write!(f, "{namespace}/Cluster[{tls_mode}]"),
            Self::Listener { node_id } => write!(f, "node:{node_id}/Listener"),
        }
    }
}

/// Changes to one container within a batch.
#[derive(Clone, Debug, Default)]
pub(crate) struct ContainerUpdate {
    pub(crate) replace: bool,
    pub(crate) upserts: HashMap<String, BoxResource>,
    pub(crate) removals: HashSet<String>,
}

impl ContainerUpdate {
    fn upsert(&mut self, resource: BoxResource) {
        let name = resource.name().to_string();
        self.removals.remove(&name);
        self.upserts.insert(name, resource);
    }

    fn remove(&mut self, name: String) {
        self.upserts.remove(&name);
        self.removals.insert(name);
    }

    fn len(&self) -> usize {
        self.upserts.len() + self.removals.len()
    }
}

/// A batch of container changes applied by one `update_resources` call.
///
/// Changes accumulate across calls. Within a batch, the last change to a
/// resource name wins.
///
/// # Example
///
/// ```rust
/// use xds_cache::UpdateResourcesRequest;
/// use xds_core::{AnyResource, TlsMode, TypeUrl};
///
/// let mut request = UpdateResourcesRequest::new();
/// request
///     .add_cluster_resource("ns1", TlsMode::None, AnyResource::from_bytes(TypeUrl::CLUSTER, "svc-a", vec![1]).boxed())
///     .remove_namespace_resource("ns1", TypeUrl::ENDPOINT, "svc-old");
/// assert_eq!(request.len(), 2);
/// ```
#[derive(Clone, Debug, Default)]
pub struct UpdateResourcesRequest {
    updates: BTreeMap<ContainerKey, ContainerUpdate>,
}

impl UpdateResourcesRequest {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a resource into a container.
    pub fn add_resource(&mut self, key: ContainerKey, resource: BoxResource) -> &mut Self {
        self.updates.entry(key).or_default().upsert(resource);
        self
    }

    /// Upsert several resources into a container.
    pub fn add_resources<I>(&mut self, key: ContainerKey, resources: I) -> &mut Self
    where
        I: IntoIterator<Item = BoxResource>,
    {
        let update = self.updates.entry(key).or_default();
        for resource in resources {
            update.upsert(resource);
        }
        self
    }

    /// Remove a resource from a container by name.
    pub fn remove_resource(&mut self, key: ContainerKey, name: impl Into<String>) -> &mut Self {
        self.updates.entry(key).or_default().remove(name.into());
        self
    }

    /// Remove several resources from a container by name.
    pub fn remove_resources<I, S>(&mut self, key: ContainerKey, names: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let update = self.updates.entry(key).or_default();
        for name in names {
            update.remove(name.into());
        }
        self
    }

    /// Replace the whole content of a container.
    ///
    /// Earlier changes to the same container in this batch are discarded.
    pub fn replace_resources<I>(&mut self, key: ContainerKey, resources: I) -> &mut Self
    where
        I: IntoIterator<Item = BoxResource>,
    {
        let mut update = ContainerUpdate {
            replace: true,
            ..Default::default()
        };
        for resource in resources {
            update.upsert(resource);
        }
        self.updates.insert(key, update);
        self
    }

    /// Upsert into a namespace scoped container.
    pub fn add_namespace_resource(
        &mut self,
        namespace: impl Into<String>,
        type_url: impl Into<TypeUrl>,
        resource: BoxResource,
    ) -> &mut Self {
        self.add_resource(ContainerKey::namespace(namespace, type_url), resource)
    }

    /// Remove from a namespace scoped container.
    pub fn remove_namespace_resource(
        &mut self,
        namespace: impl Into<String>,
        type_url: impl Into<TypeUrl>,
        name: impl Into<String>,
    ) -> &mut Self {
        self.remove_resource(ContainerKey::namespace(namespace, type_url), name)
    }

    /// Upsert into a cluster container.
    pub fn add_cluster_resource(
        &mut self,
        namespace: impl Into<String>,
        tls_mode: TlsMode,
        resource: BoxResource,
    ) -> &mut Self {
        self.add_resource(ContainerKey::cluster(namespace, tls_mode), resource)
    }

    /// Remove from a cluster container.
    pub fn remove_cluster_resource(
        &mut self,
        namespace: impl Into<String>,
        tls_mode: TlsMode,
        name: impl Into<String>,
    ) -> &mut Self {
        self.remove_resource(ContainerKey::cluster(namespace, tls_mode), name)
    }

    /// Upsert into a node's listener container.
    pub fn add_listener_resource(
        &mut self,
        node_id: impl Into<String>,
        resource: BoxResource,
    ) -> &mut Self {
        self.add_resource(ContainerKey::listener(node_id), resource)
    }

    /// Remove from a node's listener container.
    pub fn remove_listener_resource(
        &mut self,
        node_id: impl Into<String>,
        name: impl Into<String>,
    ) -> &mut Self {
        self.remove_resource(ContainerKey::listener(node_id), name)
    }

    /// Whether the batch changes nothing.
    ///
    /// A replacement with no resources still counts as a change.
    pub fn is_empty(&self) -> bool {
        self.updates.values().all(|u| !u.replace && u.len() == 0)
    }

    /// Number of resource changes in the batch.
    pub fn len(&self) -> usize {
        self.updates.values().map(ContainerUpdate::len).sum()
    }

    /// Containers addressed by the batch.
    pub fn keys(&self) -> impl Iterator<Item = &ContainerKey> {
        self.updates.keys()
    }

    pub(crate) fn into_updates(self) -> BTreeMap<ContainerKey, ContainerUpdate> {
        self.updates
    }
}
