//! External system client contract.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use steward_store::ObjectKey;

use crate::error::Result;

/// Name of an entity on the automation server.
///
/// Derived deterministically from the managed resource's identity: the
/// namespace becomes the folder, the resource name the item inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExternalName {
    folder: String,
    item: String,
}

impl ExternalName {
    /// Build a name from its parts.
    pub fn new(folder: impl Into<String>, item: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            item: item.into(),
        }
    }

    /// The name owned by the resource at `key`.
    #[must_use]
    pub fn for_key(key: &ObjectKey) -> Self {
        Self::new(key.namespace(), key.name())
    }

    /// Enclosing folder.
    #[must_use]
    pub fn folder(&self) -> &str {
        &self.folder
    }

    /// Item within the folder.
    #[must_use]
    pub fn item(&self) -> &str {
        &self.item
    }
}

impl fmt::Display for ExternalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.folder, self.item)
    }
}

impl From<&ObjectKey> for ExternalName {
    fn from(key: &ObjectKey) -> Self {
        Self::for_key(key)
    }
}

/// What the automation server reports about an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalEntity {
    /// Entity name.
    pub name: ExternalName,
    /// Server-side type, e.g. a Jenkins `_class`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Browsable location, when the server exposes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Configuration last pushed, when the server can report it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<serde_json::Value>,
}

/// Create/get/update/delete primitives against the automation server.
///
/// Implementations must map "entity does not exist" to
/// `Error::NotFound` so deletes can be treated as idempotent.
#[async_trait]
pub trait ExternalSystemClient: Send + Sync {
    /// Look up an entity. `Ok(None)` when it does not exist.
    async fn get(&self, name: &ExternalName) -> Result<Option<ExternalEntity>>;

    /// Create an entity configured from `spec`.
    async fn create(&self, name: &ExternalName, spec: &serde_json::Value) -> Result<()>;

    /// Push `spec` onto an existing entity.
    async fn update(&self, name: &ExternalName, spec: &serde_json::Value) -> Result<()>;

    /// Remove an entity.
    async fn delete(&self, name: &ExternalName) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_derivation_is_deterministic() {
        let key = ObjectKey::new("ns1", "demo");
        let a = ExternalName::for_key(&key);
        let b = ExternalName::from(&key);
        assert_eq!(a, b);
        assert_eq!(a.folder(), "ns1");
        assert_eq!(a.item(), "demo");
        assert_eq!(a.to_string(), "ns1/demo");
    }
}
