//! Per-stream subscription state.
//!
//! The transport layer owns one [`StreamState`] per state of the world
//! stream and one [`DeltaStreamState`] per (delta stream, type URL). The
//! cache reads them to decide what a subscriber still needs. Immediate
//! delta sends advance the caller's state in place. A response delivered
//! later by an update carries its `next_version_map`, which the transport
//! records with [`DeltaStreamState::set_resource_versions`].

use std::collections::{HashMap, HashSet};

use xds_core::TypeUrl;

use crate::discovery::DeltaRequest;

/// Name a delta client uses to request a wildcard subscription explicitly.
pub const WILDCARD: &str = "*";

/// State of a state of the world stream.
#[derive(Clone, Debug, Default)]
pub struct StreamState {
    known_resource_names: HashMap<TypeUrl, HashSet<String>>,
}

impl StreamState {
    /// Create an empty stream state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Names already delivered on this stream for a type.
    pub fn known_resource_names(&self, type_url: &TypeUrl) -> Option<&HashSet<String>> {
        self.known_resource_names.get(type_url)
    }

    /// Whether `name` of `type_url` was already delivered on this stream.
    pub fn knows(&self, type_url: &TypeUrl, name: &str) -> bool {
        self.known_resource_names
            .get(type_url)
            .is_some_and(|names| names.contains(name))
    }

    /// Replace the delivered names for a type.
    pub fn set_known_resource_names<I, S>(&mut self, type_url: TypeUrl, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_resource_names
            .insert(type_url, names.into_iter().map(Into::into).collect());
    }
}

/// State of one resource type on a delta stream.
#[derive(Clone, Debug)]
pub struct DeltaStreamState {
    wildcard: bool,
    first: bool,
    subscribed_resource_names: HashSet<String>,
    resource_versions: HashMap<String, String>,
}

impl DeltaStreamState {
    /// Create the state for a new subscription.
    pub fn new(wildcard: bool, initial_resource_versions: HashMap<String, String>) -> Self {
        Self {
            wildcard,
            first: true,
            subscribed_resource_names: HashSet::new(),
            resource_versions: initial_resource_versions,
        }
    }

    /// Derive the state for the first request of a subscription.
    ///
    /// A first request that subscribes to nothing is a wildcard request.
    pub fn from_request(request: &DeltaRequest) -> Self {
        let mut state = Self::new(
            request.resource_names_subscribe.is_empty(),
            request.initial_resource_versions.clone(),
        );
        state.subscribe(request.resource_names_subscribe.iter().cloned());
        state
    }

    /// Apply the subscription changes of a follow-up request.
    pub fn apply_request(&mut self, request: &DeltaRequest) {
        self.subscribe(request.resource_names_subscribe.iter().cloned());
        self.unsubscribe(request.resource_names_unsubscribe.iter().cloned());
    }

    /// Whether the subscription covers every resource of the type.
    pub fn is_wildcard(&self) -> bool {
        self.wildcard
    }

    /// Whether nothing has been sent on this subscription yet.
    pub fn is_first(&self) -> bool {
        self.first
    }

    /// Explicitly subscribed names.
    pub fn subscribed_resource_names(&self) -> &HashSet<String> {
        &self.subscribed_resource_names
    }

    /// Per-name hashes the subscriber last acknowledged.
    pub fn resource_versions(&self) -> &HashMap<String, String> {
        &self.resource_versions
    }

    /// Record a delivered response's per-name hashes as the acknowledged
    /// baseline. The subscription is no longer on its first response.
    pub fn set_resource_versions(&mut self, versions: HashMap<String, String>) {
        self.resource_versions = versions;
        self.first = false;
    }

    /// Add names to the subscription; `*` turns on wildcard mode.
    pub fn subscribe<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            let name = name.into();
            if name == WILDCARD {
                self.wildcard = true;
                continue;
            }
            self.subscribed_resource_names.insert(name);
        }
    }

    /// Drop names from the subscription; `*` turns off wildcard mode.
    ///
    /// Dropped names are forgotten so they are not later reported removed.
    pub fn unsubscribe<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            let name = name.into();
            if name == WILDCARD {
                self.wildcard = false;
                continue;
            }
            self.subscribed_resource_names.remove(&name);
            self.resource_versions.remove(&name);
        }
    }
}
