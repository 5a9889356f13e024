//! Actuation pausing by application or by resource

use crate::error::StorageResult;
use crate::events::EventPublisher;
use crate::storage::PauseRepository;
use reconcile_types::{ResourceId, TelemetryEvent, UntypedResource};
use std::sync::Arc;
use tracing::info;

/// Pauses and resumes actuation
pub struct ActuationPauser {
    repository: Arc<dyn PauseRepository>,
    publisher: Arc<dyn EventPublisher>,
}

impl ActuationPauser {
    pub fn new(repository: Arc<dyn PauseRepository>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            repository,
            publisher,
        }
    }

    /// Whether the resource or its application is paused
    pub async fn is_paused(&self, resource: &UntypedResource) -> StorageResult<bool> {
        Ok(self.repository.application_paused(resource.application()).await?
            || self.repository.resource_paused(&resource.id).await?)
    }

    pub async fn pause_application(&self, application: &str) -> StorageResult<()> {
        self.repository.pause_application(application).await?;
        info!(application, "Paused actuation for application");
        self.publisher
            .publish(
                TelemetryEvent::ApplicationActuationPaused {
                    application: application.to_string(),
                }
                .into(),
            )
            .await;
        Ok(())
    }

    pub async fn resume_application(&self, application: &str) -> StorageResult<()> {
        self.repository.resume_application(application).await?;
        info!(application, "Resumed actuation for application");
        self.publisher
            .publish(
                TelemetryEvent::ApplicationActuationResumed {
                    application: application.to_string(),
                }
                .into(),
            )
            .await;
        Ok(())
    }

    pub async fn pause_resource(&self, id: &ResourceId) -> StorageResult<()> {
        self.repository.pause_resource(id).await?;
        info!(resource_id = %id, "Paused actuation for resource");
        self.publisher
            .publish(TelemetryEvent::ResourceActuationPaused { resource_id: id.clone() }.into())
            .await;
        Ok(())
    }

    pub async fn resume_resource(&self, id: &ResourceId) -> StorageResult<()> {
        self.repository.resume_resource(id).await?;
        info!(resource_id = %id, "Resumed actuation for resource");
        self.publisher
            .publish(TelemetryEvent::ResourceActuationResumed { resource_id: id.clone() }.into())
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::storage::InMemoryStorage;
    use reconcile_types::{Resource, ResourceKind, ResourceMetadata};
    use serde_json::json;

    #[tokio::test]
    async fn test_pause_by_application_and_resource() {
        let storage = Arc::new(InMemoryStorage::new());
        let pauser = ActuationPauser::new(storage.clone(), Arc::new(EventBus::new(storage.clone())));
        let resource = Resource::new(
            ResourceKind::new("ec2.aws/v1", "cluster"),
            "fnord-main",
            ResourceMetadata::for_application("fnord"),
            json!({}),
        );

        assert!(!pauser.is_paused(&resource).await.unwrap());

        pauser.pause_application("fnord").await.unwrap();
        assert!(pauser.is_paused(&resource).await.unwrap());
        pauser.resume_application("fnord").await.unwrap();
        assert!(!pauser.is_paused(&resource).await.unwrap());

        pauser.pause_resource(&resource.id).await.unwrap();
        assert!(pauser.is_paused(&resource).await.unwrap());
        pauser.resume_resource(&resource.id).await.unwrap();
        assert!(!pauser.is_paused(&resource).await.unwrap());
    }
}
