//! # xds-cache
//!
//! Resource cache and watch dispatch for xDS control planes.
//!
//! - [`ResourceCache`] - Multi-type cache keyed by namespace, cluster TLS
//!   mode and listener node, serving state of the world and delta watches
//! - [`LinearCache`] - Single-type cache with per-resource versions and
//!   per-node overrides
//! - [`UpdateResourcesRequest`] - Batched upserts and removals applied
//!   atomically across containers
//! - [`ResponseSink`] / [`CancelWatch`] - Delivery channel and cancel handle
//!   of a pending watch
//! - [`OnDemandHook`] / [`NodeCleanup`] - Build a node's resources on first
//!   request and evict them when its last stream closes
//!
//! ## Locking
//!
//! Each cache has one outer lock over its resources, held while responses
//! are delivered, and one inner lock per watch table that is never held
//! across an await. Cancelling a watch only takes the inner lock, so it
//! never waits behind a blocked send.
//!
//! ## Example
//!
//! ```rust
//! use tokio_util::sync::CancellationToken;
//! use xds_cache::{Cache, ResourceCache, Request, ResponseSink, StreamState, UpdateResourcesRequest};
//! use xds_core::{AnyResource, Node, TypeUrl};
//!
//! # #[tokio::main]
//! # async fn main() -> xds_core::Result<()> {
//! let cache = ResourceCache::new();
//!
//! let (sink, mut rx) = ResponseSink::channel(1);
//! let request = Request::new(Node::new("envoy-1", "ns1"), TypeUrl::ROUTE);
//! let cancel = cache.create_watch(request, &StreamState::new(), sink).await?;
//! assert!(!cancel.is_noop());
//!
//! let mut update = UpdateResourcesRequest::new();
//! update.add_namespace_resource(
//!     "ns1",
//!     TypeUrl::ROUTE,
//!     AnyResource::from_bytes(TypeUrl::ROUTE, "default", vec![1]).boxed(),
//! );
//! cache.update_resources(&CancellationToken::new(), update).await?;
//!
//! let response = rx.recv().await.unwrap();
//! assert_eq!(response.resource_names(), vec!["default"]);
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod callbacks;
mod config;
mod container;
mod delta;
mod discovery;
mod hooks;
mod linear;
mod request;
mod stats;
mod status;
mod stream;
mod watch;

pub use cache::{Cache, CacheBuilder, ResourceCache};
pub use callbacks::{NodeCleanup, NodeManager, StreamCallbacks, StreamId};
pub use config::CacheConfig;
pub use container::ResourcesContainer;
pub use discovery::{DeltaRequest, DeltaResponse, Request, Response};
pub use hooks::{CacheHook, OnDemandHook, ResourceBuilder};
pub use linear::{LinearCache, LinearCacheBuilder};
pub use request::{ContainerKey, UpdateResourcesRequest};
pub use stats::CacheStats;
pub use status::{DeltaResponseWatch, ResponseWatch, StatusInfo, StatusKey};
pub use stream::{DeltaStreamState, StreamState, WILDCARD};
pub use watch::{CancelWatch, ResponseSink, WatchId};
