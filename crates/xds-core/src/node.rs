//! Node identity for cache routing.
//!
//! A connecting proxy identifies itself with a protocol level [`Node`]. The
//! cache never looks inside it directly: an injected [`NodeResolver`] turns
//! it into a [`NodeKey`], the routing key that selects namespace scoped,
//! node scoped and TLS scoped resource containers.

use std::collections::BTreeMap;
use std::fmt;

/// Protocol level node descriptor, as sent in discovery requests.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Node {
    /// Opaque node identifier.
    pub id: String,
    /// Service cluster the node belongs to.
    pub cluster: String,
    /// Flattened node metadata.
    pub metadata: BTreeMap<String, String>,
}

impl Node {
    /// Create a node with the given id and cluster and no metadata.
    #[must_use]
    pub fn new(id: impl Into<String>, cluster: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            cluster: cluster.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Add a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// How the proxy is deployed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RunType {
    /// Sidecar next to a workload.
    #[default]
    Sidecar,
    /// Standalone gateway.
    Gateway,
}

/// TLS mode of the proxy; cluster resources differ per mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TlsMode {
    /// Plaintext only.
    #[default]
    None,
    /// Accept both plaintext and mTLS.
    Permissive,
    /// mTLS only.
    Strict,
}

impl fmt::Display for TlsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TlsMode::None => "none",
            TlsMode::Permissive => "permissive",
            TlsMode::Strict => "strict",
        };
        f.write_str(s)
    }
}

/// Routing key derived from a [`Node`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey {
    /// Namespace the node's shared resources live in.
    pub namespace: String,
    /// Stable node identifier.
    pub node_id: String,
    /// Deployment shape.
    pub run_type: RunType,
    /// TLS mode.
    pub tls_mode: TlsMode,
}

impl NodeKey {
    /// Create a sidecar key without TLS.
    #[must_use]
    pub fn new(namespace: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            node_id: node_id.into(),
            run_type: RunType::Sidecar,
            tls_mode: TlsMode::None,
        }
    }

    /// Set the TLS mode.
    #[must_use]
    pub fn with_tls_mode(mut self, tls_mode: TlsMode) -> Self {
        self.tls_mode = tls_mode;
        self
    }

    /// Set the run type.
    #[must_use]
    pub fn with_run_type(mut self, run_type: RunType) -> Self {
        self.run_type = run_type;
        self
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.node_id)
    }
}

/// Derives a [`NodeKey`] from a [`Node`].
///
/// Implementations must be pure: the same node always resolves to the same
/// key.
pub trait NodeResolver: Send + Sync {
    /// Resolve the routing key for a node.
    fn resolve(&self, node: &Node) -> NodeKey;
}

impl<F> NodeResolver for F
where
    F: Fn(&Node) -> NodeKey + Send + Sync,
{
    fn resolve(&self, node: &Node) -> NodeKey {
        self(node)
    }
}

/// Resolver that maps `cluster` to the namespace and `id` to the node id.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultNodeResolver;

impl NodeResolver for DefaultNodeResolver {
    fn resolve(&self, node: &Node) -> NodeKey {
        NodeKey::new(node.cluster.clone(), node.id.clone())
    }
}
