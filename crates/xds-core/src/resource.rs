//! Resource trait for cached xDS resources.
//!
//! The cache treats resource payloads as opaque: it only needs a name to key
//! them by and an encoding to hash for delta subscribers. Resource builders
//! produce values implementing [`Resource`]; [`AnyResource`] covers the
//! common case of an already encoded `prost_types::Any`.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Trait for xDS resources stored in the cache.
///
/// # Example
///
/// ```rust
/// use std::any::Any as StdAny;
/// use xds_core::{Resource, TypeUrl};
///
/// #[derive(Debug)]
/// struct MyCluster {
///     name: String,
/// }
///
/// impl Resource for MyCluster {
///     fn type_url(&self) -> &str {
///         TypeUrl::CLUSTER
///     }
///
///     fn name(&self) -> &str {
///         &self.name
///     }
///
///     fn encode(&self) -> Result<prost_types::Any, Box<dyn std::error::Error + Send + Sync>> {
///         Ok(prost_types::Any {
///             type_url: self.type_url().to_string(),
///             value: self.name.as_bytes().to_vec(),
///         })
///     }
///
///     fn as_any(&self) -> &dyn StdAny {
///         self
///     }
/// }
/// ```
pub trait Resource: Send + Sync + fmt::Debug {
    /// Get the type URL for this resource.
    fn type_url(&self) -> &str;

    /// Get the resource name.
    fn name(&self) -> &str;

    /// Encode the resource to a protobuf Any message.
    ///
    /// The encoding must be deterministic; delta subscribers compare hashes
    /// of it to decide whether a resource changed.
    fn encode(&self) -> Result<prost_types::Any, Box<dyn std::error::Error + Send + Sync>>;

    /// Convert to Any for downcasting.
    fn as_any(&self) -> &dyn Any;
}

/// Shared handle to a resource.
pub type BoxResource = Arc<dyn Resource>;

/// A pre-encoded protobuf Any carried as a resource.
#[derive(Debug, Clone, PartialEq)]
pub struct AnyResource {
    name: String,
    any: prost_types::Any,
}

impl AnyResource {
    /// Create a resource from an encoded message.
    #[must_use]
    pub fn new(name: impl Into<String>, any: prost_types::Any) -> Self {
        Self {
            name: name.into(),
            any,
        }
    }

    /// Build a resource of `type_url` whose encoded body is `value`.
    #[must_use]
    pub fn from_bytes(
        type_url: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        Self::new(
            name,
            prost_types::Any {
                type_url: type_url.into(),
                value: value.into(),
            },
        )
    }

    /// Wrap into a shared [`BoxResource`].
    #[must_use]
    pub fn boxed(self) -> BoxResource {
        Arc::new(self)
    }

    /// Get the inner Any message.
    #[must_use]
    pub fn inner(&self) -> &prost_types::Any {
        &self.any
    }
}

impl Resource for AnyResource {
    fn type_url(&self) -> &str {
        &self.any.type_url
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn encode(&self) -> Result<prost_types::Any, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.any.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
