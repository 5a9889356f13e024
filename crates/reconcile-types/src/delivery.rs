//! Delivery configs: artifacts promoted through ordered environments

use crate::ids::ResourceId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// An artifact delivered by a delivery config
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryArtifact {
    /// Artifact name in its registry (e.g. a docker image or package name)
    pub name: String,

    /// Artifact type (e.g. `docker`, `deb`)
    #[serde(rename = "type")]
    pub artifact_type: String,

    /// Name used to refer to this artifact within the delivery config
    pub reference: String,
}

impl DeliveryArtifact {
    pub fn new(
        name: impl Into<String>,
        artifact_type: impl Into<String>,
        reference: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            artifact_type: artifact_type.into(),
            reference: reference.into(),
        }
    }
}

/// A promotion constraint declared by an environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    /// Constraint type, matched against evaluators
    #[serde(rename = "type")]
    pub constraint_type: String,

    /// Type specific attributes
    #[serde(default)]
    pub attributes: serde_json::Value,
}

impl Constraint {
    pub fn new(constraint_type: impl Into<String>, attributes: serde_json::Value) -> Self {
        Self {
            constraint_type: constraint_type.into(),
            attributes,
        }
    }

    /// Decode the attributes into an evaluator specific type
    pub fn attributes_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.attributes.clone())
    }
}

/// An environment in a delivery config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    pub name: String,

    /// Resources governed by this environment
    #[serde(default)]
    pub resources: Vec<ResourceId>,

    #[serde(default)]
    pub constraints: Vec<Constraint>,
}

impl Environment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resources: Vec::new(),
            constraints: Vec::new(),
        }
    }

    pub fn with_resource(mut self, id: ResourceId) -> Self {
        self.resources.push(id);
        self
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn has_constraint_type(&self, constraint_type: &str) -> bool {
        self.constraints
            .iter()
            .any(|c| c.constraint_type == constraint_type)
    }

    /// Constraints of the given type
    pub fn constraints_of_type<'a>(
        &'a self,
        constraint_type: &'a str,
    ) -> impl Iterator<Item = &'a Constraint> + 'a {
        self.constraints
            .iter()
            .filter(move |c| c.constraint_type == constraint_type)
    }

    pub fn governs(&self, id: &ResourceId) -> bool {
        self.resources.contains(id)
    }
}

/// Application-scoped declaration of artifacts and environments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryConfig {
    pub name: String,
    pub application: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,
    #[serde(default)]
    pub artifacts: Vec<DeliveryArtifact>,

    /// Environments, in promotion order
    #[serde(default)]
    pub environments: Vec<Environment>,
}

impl DeliveryConfig {
    pub fn new(name: impl Into<String>, application: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            application: application.into(),
            service_account: None,
            artifacts: Vec::new(),
            environments: Vec::new(),
        }
    }

    pub fn with_artifact(mut self, artifact: DeliveryArtifact) -> Self {
        self.artifacts.push(artifact);
        self
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environments.push(environment);
        self
    }

    pub fn environment(&self, name: &str) -> Option<&Environment> {
        self.environments.iter().find(|e| e.name == name)
    }

    /// The environment governing a resource, if any
    pub fn environment_for(&self, id: &ResourceId) -> Option<&Environment> {
        self.environments.iter().find(|e| e.governs(id))
    }

    pub fn artifact(&self, reference: &str) -> Option<&DeliveryArtifact> {
        self.artifacts.iter().find(|a| a.reference == reference)
    }

    pub fn governs(&self, id: &ResourceId) -> bool {
        self.environment_for(id).is_some()
    }
}

/// A version pinned into an environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactPin {
    pub delivery_config: String,
    pub environment: String,
    pub reference: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// A version that must never be promoted into an environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactVeto {
    pub delivery_config: String,
    pub environment: String,
    pub reference: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vetoed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}
