//! `depends-on`: a version must already be approved upstream

use super::ConstraintEvaluator;
use crate::error::ConstraintError;
use crate::storage::ArtifactRepository;
use async_trait::async_trait;
use reconcile_types::{DeliveryArtifact, DeliveryConfig};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct DependsOnAttributes {
    environment: String,
}

/// Allows a version once it is approved in the environment named by the
/// constraint's `environment` attribute
pub struct DependsOnConstraintEvaluator {
    artifacts: Arc<dyn ArtifactRepository>,
}

impl DependsOnConstraintEvaluator {
    pub const CONSTRAINT_TYPE: &'static str = "depends-on";

    pub fn new(artifacts: Arc<dyn ArtifactRepository>) -> Self {
        Self { artifacts }
    }
}

#[async_trait]
impl ConstraintEvaluator for DependsOnConstraintEvaluator {
    fn supported_type(&self) -> &str {
        Self::CONSTRAINT_TYPE
    }

    async fn can_promote(
        &self,
        artifact: &DeliveryArtifact,
        version: &str,
        delivery_config: &DeliveryConfig,
        environment_name: &str,
    ) -> Result<bool, ConstraintError> {
        let Some(environment) = delivery_config.environment(environment_name) else {
            return Ok(false);
        };

        for constraint in environment.constraints_of_type(Self::CONSTRAINT_TYPE) {
            let attributes: DependsOnAttributes =
                constraint
                    .attributes_as()
                    .map_err(|source| ConstraintError::InvalidAttributes {
                        constraint_type: Self::CONSTRAINT_TYPE.to_string(),
                        source,
                    })?;

            let approved = self
                .artifacts
                .is_approved_for(delivery_config, artifact, version, &attributes.environment)
                .await?;
            if !approved {
                debug!(
                    version,
                    environment = environment_name,
                    upstream = %attributes.environment,
                    "Version not yet approved upstream"
                );
                return Ok(false);
            }
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;
    use reconcile_types::{Constraint, Environment};
    use serde_json::json;

    #[tokio::test]
    async fn test_requires_upstream_approval() {
        let storage = Arc::new(InMemoryStorage::new());
        let evaluator = DependsOnConstraintEvaluator::new(storage.clone());
        let artifact = DeliveryArtifact::new("fnord", "docker", "fnord-image");
        let config = DeliveryConfig::new("fnord-manifest", "fnord")
            .with_artifact(artifact.clone())
            .with_environment(Environment::new("test"))
            .with_environment(
                Environment::new("prod")
                    .with_constraint(Constraint::new("depends-on", json!({ "environment": "test" }))),
            );

        assert!(!evaluator.can_promote(&artifact, "1.1", &config, "prod").await.unwrap());

        storage.approve_version_for(&config, &artifact, "1.1", "test").await.unwrap();
        assert!(evaluator.can_promote(&artifact, "1.1", &config, "prod").await.unwrap());
        assert!(!evaluator.can_promote(&artifact, "1.2", &config, "prod").await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_malformed_attributes() {
        let storage = Arc::new(InMemoryStorage::new());
        let evaluator = DependsOnConstraintEvaluator::new(storage);
        let artifact = DeliveryArtifact::new("fnord", "docker", "fnord-image");
        let config = DeliveryConfig::new("fnord-manifest", "fnord").with_environment(
            Environment::new("prod").with_constraint(Constraint::new("depends-on", json!({}))),
        );

        assert!(matches!(
            evaluator.can_promote(&artifact, "1.1", &config, "prod").await,
            Err(ConstraintError::InvalidAttributes { .. })
        ));
    }
}
