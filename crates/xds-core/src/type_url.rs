//! Type URL handling for xDS resources.
//!
//! The cache partitions containers by resource type. Listener resources are
//! node scoped and cluster resources are additionally split by TLS mode, so
//! besides the constants this module offers the predicates the cache routes
//! on.

use std::fmt;

/// Type URL wrapper for xDS resource types.
///
/// # Example
///
/// ```rust
/// use xds_core::TypeUrl;
///
/// let lds = TypeUrl::new(TypeUrl::LISTENER);
/// assert!(lds.is_listener());
/// assert_eq!(lds.short_name(), "Listener");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeUrl(String);

impl TypeUrl {
    /// Type URL for Cluster (CDS).
    pub const CLUSTER: &'static str = "type.googleapis.com/envoy.config.cluster.v3.Cluster";

    /// Type URL for ClusterLoadAssignment (EDS).
    pub const ENDPOINT: &'static str =
        "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment";

    /// Type URL for Listener (LDS).
    pub const LISTENER: &'static str = "type.googleapis.com/envoy.config.listener.v3.Listener";

    /// Type URL for RouteConfiguration (RDS).
    pub const ROUTE: &'static str =
        "type.googleapis.com/envoy.config.route.v3.RouteConfiguration";

    /// Type URL for VirtualHost (VHDS).
    pub const VIRTUAL_HOST: &'static str =
        "type.googleapis.com/envoy.config.route.v3.VirtualHost";

    /// Type URL for Secret (SDS).
    pub const SECRET: &'static str =
        "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.Secret";

    /// Type URL for Runtime (RTDS).
    pub const RUNTIME: &'static str = "type.googleapis.com/envoy.service.runtime.v3.Runtime";

    /// Create a new type URL from a string.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    /// Get the type URL as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Listener resources are keyed by node, not namespace.
    #[must_use]
    pub fn is_listener(&self) -> bool {
        self.0 == Self::LISTENER
    }

    /// Cluster resources are keyed by namespace and TLS mode.
    #[must_use]
    pub fn is_cluster(&self) -> bool {
        self.0 == Self::CLUSTER
    }

    /// Extract the message name, e.g. `Cluster` for the CDS type URL.
    #[must_use]
    pub fn short_name(&self) -> &str {
        self.0
            .rsplit('/')
            .next()
            .and_then(|s| s.rsplit('.').next())
            .unwrap_or(&self.0)
    }
}

impl fmt::Display for TypeUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TypeUrl {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TypeUrl {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for TypeUrl {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
