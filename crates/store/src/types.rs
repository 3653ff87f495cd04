//! Managed resource model.
//!
//! Values handed out by stores and caches are snapshots. There are no `&mut`
//! accessors: changing a resource means taking an owned copy and threading
//! it through the consuming `with_*` / `without_*` methods, which return a
//! new value. Metadata collections are persistent (`im`), so those copies
//! share structure with the snapshot they came from.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Identity of a managed resource: namespace plus name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    namespace: String,
    name: String,
}

impl ObjectKey {
    /// Create a key.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Namespace part.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Name part.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for ObjectKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self::new(ns, name))
            }
            _ => Err(Error::invalid(format!(
                "'{s}' is not a namespace/name key"
            ))),
        }
    }
}

/// Opaque, store-assigned version token. Advances on every write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceVersion(u64);

impl ResourceVersion {
    /// Wrap a raw version number.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ResourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Object metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    namespace: String,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    resource_version: Option<ResourceVersion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    creation_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    deletion_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "im::OrdMap::is_empty")]
    labels: im::OrdMap<String, String>,
    #[serde(default, skip_serializing_if = "im::OrdMap::is_empty")]
    annotations: im::OrdMap<String, String>,
    #[serde(default, skip_serializing_if = "im::Vector::is_empty")]
    finalizers: im::Vector<String>,
}

impl ObjectMeta {
    fn new(namespace: String, name: String) -> Self {
        Self {
            namespace,
            name,
            uid: None,
            resource_version: None,
            creation_timestamp: None,
            deletion_timestamp: None,
            labels: im::OrdMap::new(),
            annotations: im::OrdMap::new(),
            finalizers: im::Vector::new(),
        }
    }

    /// Store-assigned unique id.
    #[must_use]
    pub fn uid(&self) -> Option<&str> {
        self.uid.as_deref()
    }

    /// Current resource version; `None` until the object is persisted.
    #[must_use]
    pub const fn resource_version(&self) -> Option<ResourceVersion> {
        self.resource_version
    }

    /// When the store accepted the object.
    #[must_use]
    pub const fn creation_timestamp(&self) -> Option<DateTime<Utc>> {
        self.creation_timestamp
    }

    /// Deletion marker.
    #[must_use]
    pub const fn deletion_timestamp(&self) -> Option<DateTime<Utc>> {
        self.deletion_timestamp
    }

    /// Labels.
    #[must_use]
    pub const fn labels(&self) -> &im::OrdMap<String, String> {
        &self.labels
    }

    /// Annotations.
    #[must_use]
    pub const fn annotations(&self) -> &im::OrdMap<String, String> {
        &self.annotations
    }

    /// Finalizer tokens, in insertion order.
    #[must_use]
    pub const fn finalizers(&self) -> &im::Vector<String> {
        &self.finalizers
    }
}

/// A declared object whose desired state is kept in sync externally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedResource {
    metadata: ObjectMeta,
    #[serde(default)]
    spec: serde_json::Value,
}

impl ManagedResource {
    /// Create an unpersisted resource.
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        spec: serde_json::Value,
    ) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace.into(), name.into()),
            spec,
        }
    }

    /// Identity key.
    #[must_use]
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.metadata.namespace, &self.metadata.name)
    }

    /// Namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    /// Name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Metadata.
    #[must_use]
    pub const fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    /// Declared configuration payload.
    #[must_use]
    pub const fn spec(&self) -> &serde_json::Value {
        &self.spec
    }

    /// Current resource version.
    #[must_use]
    pub const fn resource_version(&self) -> Option<ResourceVersion> {
        self.metadata.resource_version
    }

    /// Look up a single annotation.
    #[must_use]
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata.annotations.get(key).map(String::as_str)
    }

    /// Look up a single label.
    #[must_use]
    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata.labels.get(key).map(String::as_str)
    }

    /// Whether `token` is among the finalizers.
    #[must_use]
    pub fn has_finalizer(&self, token: &str) -> bool {
        self.metadata.finalizers.iter().any(|f| f == token)
    }

    /// Whether deletion has been requested.
    #[must_use]
    pub const fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Replace the spec.
    #[must_use]
    pub fn with_spec(mut self, spec: serde_json::Value) -> Self {
        self.spec = spec;
        self
    }

    /// Set a label.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.labels.insert(key.into(), value.into());
        self
    }

    /// Set an annotation.
    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.annotations.insert(key.into(), value.into());
        self
    }

    /// Remove an annotation if present.
    #[must_use]
    pub fn without_annotation(mut self, key: &str) -> Self {
        self.metadata.annotations.remove(key);
        self
    }

    /// Append a finalizer unless already present.
    #[must_use]
    pub fn with_finalizer(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        if !self.has_finalizer(&token) {
            self.metadata.finalizers.push_back(token);
        }
        self
    }

    /// Remove every occurrence of a finalizer.
    #[must_use]
    pub fn without_finalizer(mut self, token: &str) -> Self {
        self.metadata.finalizers.retain(|f| f != token);
        self
    }

    /// Set the version an update is based on. The store rejects the update
    /// if this is not the current version.
    #[must_use]
    pub const fn with_resource_version(mut self, version: Option<ResourceVersion>) -> Self {
        self.metadata.resource_version = version;
        self
    }

    pub(crate) fn persisted(
        mut self,
        version: ResourceVersion,
        uid: String,
        created: DateTime<Utc>,
        deleted: Option<DateTime<Utc>>,
    ) -> Self {
        self.metadata.resource_version = Some(version);
        self.metadata.uid = Some(uid);
        self.metadata.creation_timestamp = Some(created);
        self.metadata.deletion_timestamp = deleted;
        self
    }

    pub(crate) fn has_finalizers(&self) -> bool {
        !self.metadata.finalizers.is_empty()
    }
}

/// List filter: optional namespace plus required labels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    namespace: Option<String>,
    labels: BTreeMap<String, String>,
}

impl Selector {
    /// Match every object.
    #[must_use]
    pub fn everything() -> Self {
        Self::default()
    }

    /// Match objects in one namespace.
    pub fn in_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            labels: BTreeMap::new(),
        }
    }

    /// Additionally require a label value.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Namespace restriction, if any.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Whether `resource` satisfies the selector.
    #[must_use]
    pub fn matches(&self, resource: &ManagedResource) -> bool {
        self.namespace
            .as_deref()
            .is_none_or(|ns| ns == resource.namespace())
            && self
                .labels
                .iter()
                .all(|(k, v)| resource.label(k) == Some(v.as_str()))
    }
}
