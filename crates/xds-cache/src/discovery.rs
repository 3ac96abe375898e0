//! Discovery requests and responses as seen by the cache.
//!
//! These are the transport-neutral shapes of xDS discovery messages. The
//! transport layer translates wire messages into [`Request`] /
//! [`DeltaRequest`] and the cache answers with [`Response`] /
//! [`DeltaResponse`]. Resource payloads pass through untouched.

use std::collections::HashMap;

use xds_core::{BoxResource, Node, TypeUrl};

/// A state of the world discovery request.
#[derive(Clone, Debug)]
pub struct Request {
    /// Requesting node.
    pub node: Node,
    /// Requested resource type.
    pub type_url: TypeUrl,
    /// Version the requester last acknowledged, empty on first request.
    pub version_info: String,
    /// Requested names; empty means every resource of the type.
    pub resource_names: Vec<String>,
}

impl Request {
    /// Create a wildcard request with an empty version.
    pub fn new(node: Node, type_url: impl Into<TypeUrl>) -> Self {
        Self {
            node,
            type_url: type_url.into(),
            version_info: String::new(),
            resource_names: Vec::new(),
        }
    }

    /// Set the acknowledged version.
    pub fn with_version(mut self, version_info: impl Into<String>) -> Self {
        self.version_info = version_info.into();
        self
    }

    /// Set the requested resource names.
    pub fn with_resource_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resource_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Whether the request asks for every resource of its type.
    pub fn is_wildcard(&self) -> bool {
        self.resource_names.is_empty()
    }
}

/// An incremental (delta) discovery request.
#[derive(Clone, Debug)]
pub struct DeltaRequest {
    /// Requesting node.
    pub node: Node,
    /// Requested resource type.
    pub type_url: TypeUrl,
    /// Names added to the subscription by this request.
    pub resource_names_subscribe: Vec<String>,
    /// Names removed from the subscription by this request.
    pub resource_names_unsubscribe: Vec<String>,
    /// Versions the client already holds, sent on reconnect.
    pub initial_resource_versions: HashMap<String, String>,
}

impl DeltaRequest {
    /// Create a request with no subscription changes.
    pub fn new(node: Node, type_url: impl Into<TypeUrl>) -> Self {
        Self {
            node,
            type_url: type_url.into(),
            resource_names_subscribe: Vec::new(),
            resource_names_unsubscribe: Vec::new(),
            initial_resource_versions: HashMap::new(),
        }
    }

    /// Subscribe to the given names.
    pub fn subscribe<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resource_names_subscribe
            .extend(names.into_iter().map(Into::into));
        self
    }

    /// Unsubscribe from the given names.
    pub fn unsubscribe<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resource_names_unsubscribe
            .extend(names.into_iter().map(Into::into));
        self
    }
}

/// A state of the world response.
#[derive(Clone, Debug)]
pub struct Response {
    /// The request being answered.
    pub request: Request,
    /// Version of the container the resources came from.
    pub version: String,
    /// Resources, sorted by name.
    pub resources: Vec<BoxResource>,
}

impl Response {
    pub(crate) fn new(request: Request, version: String, resources: Vec<BoxResource>) -> Self {
        Self {
            request,
            version,
            resources,
        }
    }

    /// Names of the carried resources, in order.
    pub fn resource_names(&self) -> Vec<&str> {
        self.resources.iter().map(|r| r.name()).collect()
    }
}

/// An incremental (delta) response.
#[derive(Clone, Debug)]
pub struct DeltaResponse {
    /// The request being answered.
    pub request: DeltaRequest,
    /// Added or changed resources, sorted by name.
    pub resources: Vec<BoxResource>,
    /// Names the subscriber held that no longer exist, sorted.
    pub removed_resources: Vec<String>,
    /// Per-name hashes the subscriber holds once it applies this response.
    pub next_version_map: HashMap<String, String>,
    /// Version of the container the delta was computed against.
    pub system_version: String,
}

impl DeltaResponse {
    /// Names of the added or changed resources, in order.
    pub fn resource_names(&self) -> Vec<&str> {
        self.resources.iter().map(|r| r.name()).collect()
    }
}
