//! Invalidation message payloads.

use serde::{Deserialize, Serialize};

use super::keys::CacheKey;

/// Body of a broadcast invalidation message.
///
/// Publishers send JSON such as `{"revisionKey": "rev3"}`; unknown fields are
/// ignored so deploy tooling can attach its own metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_key: Option<String>,
}

impl InvalidationMessage {
    pub fn parse(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// The cache slot to prewarm once the cache has been cleared.
    pub fn prewarm_key(&self) -> CacheKey {
        CacheKey::from_revision(self.revision_key.as_deref())
    }
}
