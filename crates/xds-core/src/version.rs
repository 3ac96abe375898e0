//! Version tokens for resource containers.
//!
//! This module provides [`ResourceVersion`], the opaque token a state of the
//! world subscriber echoes back in `version_info`. A container mints a fresh
//! token every time its resource set changes, so equality against the
//! echoed string is the only comparison that means anything.

use std::fmt;

/// Opaque version token.
///
/// An empty version represents the initial state (nothing sent yet).
///
/// # Example
///
/// ```rust
/// use xds_core::ResourceVersion;
///
/// let v1 = ResourceVersion::generate();
/// let v2 = ResourceVersion::generate();
///
/// assert_ne!(v1, v2);
/// assert!(v1.matches(v1.as_str()));
/// assert!(ResourceVersion::empty().is_empty());
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ResourceVersion(String);

impl ResourceVersion {
    /// Wrap an existing version string.
    #[must_use]
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    /// Mint a fresh random token.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// The initial, empty version.
    #[must_use]
    pub fn empty() -> Self {
        Self(String::new())
    }

    /// Check if the version is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether a requester echoing `version_info` already holds this version.
    #[must_use]
    pub fn matches(&self, version_info: &str) -> bool {
        self.0 == version_info
    }

    /// Get the version as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ResourceVersion {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ResourceVersion {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<ResourceVersion> for String {
    fn from(v: ResourceVersion) -> Self {
        v.0
    }
}

impl AsRef<str> for ResourceVersion {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
