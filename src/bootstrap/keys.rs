//! Project and cache key definitions.
//!
//! `ProjectId` partitions all cache state; `CacheKey` names one slot inside a
//! project's cache.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Sentinel key for "whatever revision is currently live".
pub const ACTIVE_KEY: &str = "active";

/// Opaque tenant/application identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProjectId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ProjectId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identifies one slot in a project cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// The live revision, whichever it currently is.
    Active,
    /// An explicitly named revision.
    Revision(String),
}

impl CacheKey {
    /// Map an optional revision key onto a cache slot.
    ///
    /// Absent and empty keys both resolve to [`CacheKey::Active`], as does the
    /// reserved sentinel itself.
    pub fn from_revision(revision_key: Option<&str>) -> Self {
        match revision_key {
            Some(key) if !key.is_empty() && key != ACTIVE_KEY => Self::Revision(key.to_string()),
            _ => Self::Active,
        }
    }

    /// The revision key to hand to the fetcher; `None` for the active slot.
    pub fn revision(&self) -> Option<&str> {
        match self {
            Self::Active => None,
            Self::Revision(key) => Some(key.as_str()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Active => ACTIVE_KEY,
            Self::Revision(key) => key.as_str(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque revision payload, typically a template source string.
///
/// Cloning is cheap so every joined waiter can hold the same value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RevisionData(Arc<str>);

impl RevisionData {
    pub fn new(value: impl Into<Arc<str>>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when both values share the same allocation.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<&str> for RevisionData {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for RevisionData {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}
