//! Error types for cache operations.
//!
//! This module provides [`XdsError`], the single error type returned by the
//! resource cache. Some variants are outcomes rather than failures
//! ([`XdsError::SkipFetch`]), and each variant maps onto a gRPC status code
//! so a transport adapter can hand cache errors straight back to a client.

/// Error type for resource cache operations.
///
/// # Example
///
/// ```rust
/// use xds_core::XdsError;
///
/// let err = XdsError::SkipFetch {
///     type_url: "type.googleapis.com/envoy.config.cluster.v3.Cluster".to_string(),
///     version: "v1".to_string(),
/// };
/// assert!(err.is_skip());
/// ```
#[derive(Debug, thiserror::Error)]
pub enum XdsError {
    /// Malformed or unexpected type URL.
    #[error("invalid type URL: {type_url} - {reason}")]
    InvalidTypeUrl {
        /// The offending type URL.
        type_url: String,
        /// Reason why the type URL was rejected.
        reason: String,
    },

    /// No resource container exists for the addressed target.
    #[error("missing snapshot for {target} ({type_url})")]
    MissingSnapshot {
        /// The type URL that was requested.
        type_url: String,
        /// Human readable target (namespace, node or cluster key).
        target: String,
    },

    /// The requester already holds the current version.
    ///
    /// Returned by `fetch`; callers should retry later instead of treating
    /// this as a failure.
    #[error("skip fetch: {type_url} already at version {version}")]
    SkipFetch {
        /// The type URL that was requested.
        type_url: String,
        /// The version the requester already holds.
        version: String,
    },

    /// A resource could not be hashed into a version map.
    #[error("version map failed for {type_url}/{name}: {reason}")]
    VersionMap {
        /// The type URL of the resource.
        type_url: String,
        /// The resource name.
        name: String,
        /// Why encoding failed.
        reason: String,
    },

    /// A response send was aborted by cancellation.
    #[error("cancelled: {operation}")]
    Cancelled {
        /// The operation that was interrupted.
        operation: String,
    },

    /// The subscriber went away before the response could be delivered.
    #[error("watch closed: watch_id={watch_id}")]
    WatchClosed {
        /// ID of the closed watch, `0` for responses sent without one.
        watch_id: u64,
    },

    /// Unexpected internal error.
    #[error("internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
        /// Optional underlying error.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl XdsError {
    /// Create an internal error from any error type.
    pub fn internal<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Internal {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a cancellation error for the named operation.
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Whether this is the "already current" outcome of a fetch.
    #[must_use]
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::SkipFetch { .. })
    }

    /// Whether a send was aborted by cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Convert to tonic::Status for gRPC responses.
impl From<XdsError> for tonic::Status {
    fn from(err: XdsError) -> Self {
        match &err {
            XdsError::InvalidTypeUrl { .. } | XdsError::Configuration(_) => {
                tonic::Status::invalid_argument(err.to_string())
            }
            XdsError::MissingSnapshot { .. } => tonic::Status::not_found(err.to_string()),
            XdsError::SkipFetch { .. } => tonic::Status::aborted(err.to_string()),
            XdsError::VersionMap { .. } | XdsError::Internal { .. } => {
                tonic::Status::internal(err.to_string())
            }
            XdsError::Cancelled { .. } | XdsError::WatchClosed { .. } => {
                tonic::Status::cancelled(err.to_string())
            }
        }
    }
}
