//! Environment promotion
//!
//! For every (artifact, environment) pair of a delivery config, pick the
//! newest version the environment may receive and approve it.

use crate::constraints::ConstraintEvaluator;
use crate::error::PromotionError;
use crate::events::EventPublisher;
use crate::storage::{ArtifactRepository, ResourceRepository};
use futures::future::join_all;
use reconcile_types::{DeliveryArtifact, DeliveryConfig, Environment, TelemetryEvent};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Decides which artifact versions each environment should run
pub struct EnvironmentPromotionChecker {
    artifacts: Arc<dyn ArtifactRepository>,
    resources: Arc<dyn ResourceRepository>,
    evaluators: Vec<Arc<dyn ConstraintEvaluator>>,
    publisher: Arc<dyn EventPublisher>,
}

impl EnvironmentPromotionChecker {
    /// Create a new promotion checker
    pub fn new(
        artifacts: Arc<dyn ArtifactRepository>,
        resources: Arc<dyn ResourceRepository>,
        evaluators: Vec<Arc<dyn ConstraintEvaluator>>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            artifacts,
            resources,
            evaluators,
            publisher,
        }
    }

    /// Supported constraint types
    pub fn constraint_types(&self) -> Vec<String> {
        self.evaluators
            .iter()
            .map(|e| e.supported_type().to_string())
            .collect()
    }

    /// Check every environment of a delivery config.
    ///
    /// Every (artifact, environment) pair is checked independently; all of
    /// them are attempted and the first failure is returned.
    #[instrument(skip_all, fields(delivery_config = %delivery_config.name))]
    pub async fn check_environments(&self, delivery_config: &DeliveryConfig) -> Result<(), PromotionError> {
        let mut first_error = None;

        for artifact in &delivery_config.artifacts {
            if let Err(e) = self.check_artifact(delivery_config, artifact).await {
                warn!(artifact = %artifact.reference, error = %e, "Promotion check failed");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn check_artifact(
        &self,
        delivery_config: &DeliveryConfig,
        artifact: &DeliveryArtifact,
    ) -> Result<(), PromotionError> {
        let versions = self.artifacts.versions(artifact).await?;
        if versions.is_empty() {
            debug!(artifact = %artifact.reference, "No versions known for artifact");
            return Ok(());
        }

        let results = join_all(
            delivery_config
                .environments
                .iter()
                .map(|environment| self.check_environment(delivery_config, artifact, environment, &versions)),
        )
        .await;

        results.into_iter().collect()
    }

    async fn check_environment(
        &self,
        delivery_config: &DeliveryConfig,
        artifact: &DeliveryArtifact,
        environment: &Environment,
        versions: &[String],
    ) -> Result<(), PromotionError> {
        if let Some(pinned) = self
            .artifacts
            .pinned_version(delivery_config, artifact, &environment.name)
            .await?
        {
            debug!(environment = %environment.name, version = %pinned, "Environment is pinned");
            return self.approve(delivery_config, artifact, environment, &pinned).await;
        }

        let vetoed = self
            .artifacts
            .vetoed_versions(delivery_config, artifact, &environment.name)
            .await?;
        let candidates = versions.iter().filter(|v| !vetoed.contains(v));

        let evaluators = self.applicable_evaluators(environment)?;
        let mut selected = None;
        for version in candidates {
            if self
                .satisfies_all(&evaluators, artifact, version, delivery_config, environment)
                .await?
            {
                selected = Some(version);
                break;
            }
        }

        match selected {
            Some(version) => self.approve(delivery_config, artifact, environment, version).await,
            None => {
                warn!(
                    environment = %environment.name,
                    artifact = %artifact.reference,
                    "No version satisfies the environment's constraints"
                );
                Err(PromotionError::NoVersionSatisfiesConstraints {
                    delivery_config: delivery_config.name.clone(),
                    environment: environment.name.clone(),
                    artifact: artifact.reference.clone(),
                })
            }
        }
    }

    /// Evaluators for the constraint types the environment declares
    fn applicable_evaluators(
        &self,
        environment: &Environment,
    ) -> Result<Vec<Arc<dyn ConstraintEvaluator>>, PromotionError> {
        for constraint in &environment.constraints {
            if !self
                .evaluators
                .iter()
                .any(|e| e.supported_type() == constraint.constraint_type)
            {
                return Err(PromotionError::UnsupportedConstraint {
                    environment: environment.name.clone(),
                    constraint_type: constraint.constraint_type.clone(),
                });
            }
        }

        Ok(self
            .evaluators
            .iter()
            .filter(|e| environment.has_constraint_type(e.supported_type()))
            .cloned()
            .collect())
    }

    async fn satisfies_all(
        &self,
        evaluators: &[Arc<dyn ConstraintEvaluator>],
        artifact: &DeliveryArtifact,
        version: &str,
        delivery_config: &DeliveryConfig,
        environment: &Environment,
    ) -> Result<bool, PromotionError> {
        for evaluator in evaluators {
            if !evaluator
                .can_promote(artifact, version, delivery_config, &environment.name)
                .await?
            {
                debug!(
                    environment = %environment.name,
                    version,
                    constraint = evaluator.supported_type(),
                    "Constraint not satisfied"
                );
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn approve(
        &self,
        delivery_config: &DeliveryConfig,
        artifact: &DeliveryArtifact,
        environment: &Environment,
        version: &str,
    ) -> Result<(), PromotionError> {
        let changed = self
            .artifacts
            .approve_version_for(delivery_config, artifact, version, &environment.name)
            .await?;
        if !changed {
            return Ok(());
        }

        info!(
            environment = %environment.name,
            artifact = %artifact.reference,
            version,
            "Approved artifact version"
        );
        self.publisher
            .publish(
                TelemetryEvent::ArtifactVersionApproved {
                    application: delivery_config.application.clone(),
                    delivery_config: delivery_config.name.clone(),
                    environment: environment.name.clone(),
                    artifact_reference: artifact.reference.clone(),
                    version: version.to_string(),
                }
                .into(),
            )
            .await;

        // Recheck the environment's resources right away
        for id in &environment.resources {
            if let Err(e) = self.resources.mark_check_due(id).await {
                warn!(resource_id = %id, error = %e, "Unable to mark resource due for check");
            }
        }

        Ok(())
    }
}
