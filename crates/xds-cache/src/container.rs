//! Versioned resource containers.
//!
//! A [`ResourcesContainer`] holds the resources of one type for one target.
//! Its opaque version changes on every mutation; delta subscribers also need
//! a per-resource content hash, which is built on first use and kept in
//! step with the resources from then on.

use std::collections::HashMap;

use sha2::{Digest, Sha256};
use xds_core::{BoxResource, Resource, ResourceVersion, TypeUrl, XdsError, XdsResult};

use crate::delta::DeltaView;
use crate::request::ContainerUpdate;

/// Hash the encoded body of a resource.
pub(crate) fn content_hash(resource: &dyn Resource) -> XdsResult<String> {
    let any = resource.encode().map_err(|err| XdsError::VersionMap {
        type_url: resource.type_url().to_string(),
        name: resource.name().to_string(),
        reason: err.to_string(),
    })?;
    Ok(format!("{:x}", Sha256::digest(&any.value)))
}

/// Hash every resource of a map.
pub(crate) fn build_version_map(
    resources: &HashMap<String, BoxResource>,
) -> XdsResult<HashMap<String, String>> {
    resources
        .iter()
        .map(|(name, resource)| content_hash(resource.as_ref()).map(|hash| (name.clone(), hash)))
        .collect()
}

/// The resources of one type for one target.
#[derive(Debug, Clone)]
pub struct ResourcesContainer {
    type_url: TypeUrl,
    version: ResourceVersion,
    resources: HashMap<String, BoxResource>,
    version_map: Option<HashMap<String, String>>,
}

impl ResourcesContainer {
    /// Create an empty container at the empty version.
    pub fn new(type_url: TypeUrl) -> Self {
        Self {
            type_url,
            version: ResourceVersion::empty(),
            resources: HashMap::new(),
            version_map: None,
        }
    }

    /// Resource type held by this container.
    pub fn type_url(&self) -> &TypeUrl {
        &self.type_url
    }

    /// Current version token.
    pub fn version(&self) -> &ResourceVersion {
        &self.version
    }

    /// Number of resources.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Whether the container holds no resources.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Look up a resource by name.
    pub fn get(&self, name: &str) -> Option<&BoxResource> {
        self.resources.get(name)
    }

    /// Whether a resource with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.resources.contains_key(name)
    }

    /// Resource names, unordered.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    /// Per-resource content hashes, if they were built.
    pub fn version_map(&self) -> Option<&HashMap<String, String>> {
        self.version_map.as_ref()
    }

    /// Copy of the resource map.
    pub fn snapshot(&self) -> HashMap<String, BoxResource> {
        self.resources.clone()
    }

    /// Resources matching `names` sorted by name; all of them if `names` is
    /// empty. Unknown names are skipped.
    pub(crate) fn filtered(&self, names: &[String]) -> Vec<BoxResource> {
        let mut out: Vec<BoxResource> = if names.is_empty() {
            self.resources.values().cloned().collect()
        } else {
            names
                .iter()
                .filter_map(|name| self.resources.get(name).cloned())
                .collect()
        };
        out.sort_by(|a, b| a.name().cmp(b.name()));
        out.dedup_by(|a, b| a.name() == b.name());
        out
    }

    /// Apply a batch of changes and mint a new version.
    ///
    /// If the version map is built, hashes of the upserted resources are
    /// computed first so a failure leaves the container untouched.
    pub(crate) fn apply(&mut self, update: ContainerUpdate) -> XdsResult<()> {
        let hashes = match self.version_map {
            Some(_) => Some(build_version_map(&update.upserts)?),
            None => None,
        };

        if update.replace {
            self.resources.clear();
            if let Some(map) = self.version_map.as_mut() {
                map.clear();
            }
        }
        for name in &update.removals {
            self.resources.remove(name);
            if let Some(map) = self.version_map.as_mut() {
                map.remove(name);
            }
        }
        self.resources.extend(update.upserts);
        if let (Some(map), Some(hashes)) = (self.version_map.as_mut(), hashes) {
            map.extend(hashes);
        }

        self.version = ResourceVersion::generate();
        Ok(())
    }

    /// Build the version map if it does not exist yet.
    pub(crate) fn ensure_version_map(&mut self) -> XdsResult<()> {
        if self.version_map.is_none() {
            self.version_map = Some(build_version_map(&self.resources)?);
        }
        Ok(())
    }

    /// View for delta computation, available once the version map is built.
    pub(crate) fn delta_view(&self) -> Option<DeltaView<'_>> {
        self.version_map.as_ref().map(|versions| DeltaView {
            resources: &self.resources,
            versions,
            system_version: self.version.as_str(),
        })
    }
}
