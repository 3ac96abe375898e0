//! # mesh-xds
//!
//! Resource cache and watch dispatch for xDS control planes.
//!
//! The transport layer (gRPC streams, ACK/NACK handling) is left to the
//! embedding server. This crate owns the part in between: where resources
//! live, how they are versioned, and which pending subscriber gets what
//! when they change. It supports:
//!
//! - State-of-the-World watches with version tracking per container
//! - Delta watches driven by per-resource content hashes
//! - ADS mode, where partial responses are suppressed
//! - Namespace, cluster TLS mode and per-node listener scoping
//! - A flat single-type cache with per-node overrides
//!
//! ## Quick Start
//!
//! ```rust
//! use mesh_xds::prelude::*;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> XdsResult<()> {
//! let cache = ResourceCache::builder().ads(true).build();
//!
//! let mut update = UpdateResourcesRequest::new();
//! update.add_cluster_resource(
//!     "ns1",
//!     TlsMode::None,
//!     AnyResource::from_bytes(TypeUrl::CLUSTER, "svc-a", vec![1]).boxed(),
//! );
//! cache.update_resources(&CancellationToken::new(), update).await?;
//!
//! let node = Node::new("envoy-1", "ns1");
//! let response = cache.fetch(&Request::new(node, TypeUrl::CLUSTER)).await?;
//! assert_eq!(response.resource_names(), vec!["svc-a"]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - `xds-core` - Errors, versions, node identity, resource trait
//! - `xds-cache` - Containers, watches, caches and lifecycle hooks
//!
//! This crate re-exports both for convenience.
//!
//! ## Design Principles
//!
//! 1. **No panics in library code** - All errors are returned as `Result`
//! 2. **Locks in one order** - Cache lock first, watch table lock second,
//!    and the watch table lock is never held across an await
//! 3. **Cancellation everywhere** - Blocked sends give up on stream or
//!    caller cancellation
//! 4. **Observable** - Structured `tracing` events and cache counters

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub use xds_cache as cache;
pub use xds_core as core;

/// Prelude module for convenient imports.
///
/// ```rust
/// use mesh_xds::prelude::*;
///
/// let cache = ResourceCache::new();
/// assert!(!cache.config().ads);
/// ```
pub mod prelude {
    // Core types
    pub use xds_core::{
        AnyResource, BoxResource, DefaultNodeResolver, Node, NodeKey, NodeResolver, Resource,
        ResourceVersion, RunType, TlsMode, TypeUrl, XdsError, XdsResult,
    };

    // Cache types
    pub use xds_cache::{
        Cache, CacheBuilder, CacheConfig, CacheHook, CacheStats, CancelWatch, ContainerKey,
        DeltaRequest, DeltaResponse, DeltaStreamState, LinearCache, LinearCacheBuilder,
        NodeCleanup, NodeManager, OnDemandHook, Request, ResourceBuilder, ResourceCache,
        Response, ResponseSink, StatusKey, StreamCallbacks, StreamState, UpdateResourcesRequest,
        WatchId,
    };
}

/// Version information for this crate.
pub mod version {
    /// Crate version.
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");

    /// Minimum supported Rust version.
    pub const MSRV: &str = "1.75";

    /// Get version info as a string.
    pub fn version_string() -> String {
        format!("mesh-xds {} (MSRV {})", VERSION, MSRV)
    }
}
