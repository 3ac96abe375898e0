//! # xds-core
//!
//! Core types, traits, and error handling shared by the resource cache.
//!
//! - [`XdsError`] - Error type with gRPC status code mapping
//! - [`ResourceVersion`] - Opaque container version tokens
//! - [`Node`], [`NodeKey`], [`NodeResolver`] - Node identity and routing keys
//! - [`Resource`] - Trait for cached resource payloads
//! - [`TypeUrl`] - Type URL handling and constants
//!
//! ## Example
//!
//! ```rust
//! use xds_core::{DefaultNodeResolver, Node, NodeResolver, ResourceVersion};
//!
//! let node = Node::new("envoy-1", "ns1");
//! let key = DefaultNodeResolver.resolve(&node);
//! assert_eq!(key.namespace, "ns1");
//!
//! let version = ResourceVersion::generate();
//! assert!(!version.is_empty());
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod node;
mod resource;
mod type_url;
mod version;

pub use error::XdsError;
pub use node::{DefaultNodeResolver, Node, NodeKey, NodeResolver, RunType, TlsMode};
pub use resource::{AnyResource, BoxResource, Resource};
pub use type_url::TypeUrl;
pub use version::ResourceVersion;

/// Result type alias using [`XdsError`].
pub type Result<T> = std::result::Result<T, XdsError>;

/// Alias used by the cache crates.
pub type XdsResult<T> = Result<T>;
