//! Declared resources
//!
//! Resources are stored untyped (`Resource<serde_json::Value>`). Handlers work
//! with their own spec type, decoded once at the handler registry.

use crate::ids::{ResourceId, ResourceKind};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;

/// Bound for any type that can serve as a resource spec
pub trait ResourceSpec: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static {}

impl<T> ResourceSpec for T where T: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static {}

/// Metadata attached to every resource
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMetadata {
    /// Owning application
    pub application: String,

    /// Account used when talking to the cloud provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,

    /// Free-form labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl ResourceMetadata {
    pub fn for_application(application: impl Into<String>) -> Self {
        Self {
            application: application.into(),
            ..Default::default()
        }
    }
}

/// A declared resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource<S = serde_json::Value> {
    /// Identity, derived from kind and name
    pub id: ResourceId,

    /// Handler selector
    pub kind: ResourceKind,

    /// Resource name
    pub name: String,

    /// Metadata
    pub metadata: ResourceMetadata,

    /// Spec payload
    pub spec: S,

    /// Stored version, bumped on every persisted change (0 = never stored)
    #[serde(default)]
    pub version: u64,
}

/// The stored form of a resource
pub type UntypedResource = Resource<serde_json::Value>;

impl<S> Resource<S> {
    /// Create a new, not yet stored, resource
    pub fn new(kind: ResourceKind, name: impl Into<String>, metadata: ResourceMetadata, spec: S) -> Self {
        let name = name.into();
        Self {
            id: ResourceId::for_resource(&kind, &name),
            kind,
            name,
            metadata,
            spec,
            version: 0,
        }
    }

    /// Owning application
    pub fn application(&self) -> &str {
        &self.metadata.application
    }

    /// Replace the spec, keeping identity and metadata
    pub fn with_spec<T>(self, spec: T) -> Resource<T> {
        Resource {
            id: self.id,
            kind: self.kind,
            name: self.name,
            metadata: self.metadata,
            spec,
            version: self.version,
        }
    }
}

impl<S: Serialize> Resource<S> {
    /// Convert to the stored, untyped form
    pub fn to_untyped(&self) -> Result<UntypedResource, serde_json::Error> {
        let spec = serde_json::to_value(&self.spec)?;
        Ok(Resource {
            id: self.id.clone(),
            kind: self.kind.clone(),
            name: self.name.clone(),
            metadata: self.metadata.clone(),
            spec,
            version: self.version,
        })
    }
}

impl UntypedResource {
    /// Decode the spec into a handler's spec type
    pub fn typed<S: DeserializeOwned>(&self) -> Result<Resource<S>, serde_json::Error> {
        let spec = serde_json::from_value(self.spec.clone())?;
        Ok(self.clone().with_spec(spec))
    }
}

/// A resource as submitted by a user, before normalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedResource {
    pub kind: ResourceKind,
    pub name: String,
    pub metadata: ResourceMetadata,
    pub spec: serde_json::Value,
}

impl SubmittedResource {
    pub fn new(
        kind: ResourceKind,
        name: impl Into<String>,
        metadata: ResourceMetadata,
        spec: serde_json::Value,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            metadata,
            spec,
        }
    }

    /// Identity the submission will be stored under
    pub fn id(&self) -> ResourceId {
        ResourceId::for_resource(&self.kind, &self.name)
    }

    pub fn into_resource(self) -> UntypedResource {
        Resource::new(self.kind, self.name, self.metadata, self.spec)
    }
}
