//! Repository trait definitions

use crate::error::StorageResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reconcile_types::{DeliveryArtifact, DeliveryConfig, ResourceEvent, ResourceId, UntypedResource};
use std::time::Duration;

/// Durable store of resources and their history
#[async_trait]
pub trait ResourceRepository: Send + Sync {
    /// Get a resource by ID
    async fn get(&self, id: &ResourceId) -> StorageResult<Option<UntypedResource>>;

    /// Store a resource, assigning the next version
    async fn store(&self, resource: UntypedResource) -> StorageResult<UntypedResource>;

    /// Delete a resource. Its history is kept.
    async fn delete(&self, id: &ResourceId) -> StorageResult<bool>;

    /// List all resources
    async fn list(&self) -> StorageResult<Vec<UntypedResource>>;

    /// Up to `limit` resources not checked within `min_age`, oldest first.
    /// Returned resources are stamped as checked.
    async fn items_due_for_check(
        &self,
        min_age: Duration,
        limit: usize,
    ) -> StorageResult<Vec<UntypedResource>>;

    /// Make a resource due for check on the next tick
    async fn mark_check_due(&self, id: &ResourceId) -> StorageResult<()>;

    /// Append an event to a resource's history. Events that ignore repeats
    /// are dropped when the previous entry has the same kind.
    async fn append_history(&self, event: ResourceEvent) -> StorageResult<()>;

    /// Most recent events first
    async fn event_history(&self, id: &ResourceId, limit: usize) -> StorageResult<Vec<ResourceEvent>>;

    /// The most recent event
    async fn last_event(&self, id: &ResourceId) -> StorageResult<Option<ResourceEvent>>;
}

/// Store of delivery configs
#[async_trait]
pub trait DeliveryConfigRepository: Send + Sync {
    async fn get(&self, name: &str) -> StorageResult<Option<DeliveryConfig>>;

    /// Create or replace a delivery config
    async fn store(&self, config: DeliveryConfig) -> StorageResult<()>;

    async fn delete(&self, name: &str) -> StorageResult<bool>;

    /// The delivery config with an environment governing the resource
    async fn delivery_config_for(&self, id: &ResourceId) -> StorageResult<Option<DeliveryConfig>>;

    /// Up to `limit` configs whose environments were not checked within
    /// `min_age`, oldest first. Returned configs are stamped as checked.
    async fn items_due_for_check(
        &self,
        min_age: Duration,
        limit: usize,
    ) -> StorageResult<Vec<DeliveryConfig>>;

    /// When the environments of a config were last checked
    async fn last_checked(&self, name: &str) -> StorageResult<Option<DateTime<Utc>>>;

    /// Make a config due for check on the next tick
    async fn mark_check_due(&self, name: &str) -> StorageResult<()>;
}

/// Artifact versions and their approval state per environment
#[async_trait]
pub trait ArtifactRepository: Send + Sync {
    /// Record a published version
    async fn store_version(&self, artifact: &DeliveryArtifact, version: &str) -> StorageResult<bool>;

    /// All known versions, newest first
    async fn versions(&self, artifact: &DeliveryArtifact) -> StorageResult<Vec<String>>;

    /// Approve a version for an environment. Returns `false` if it already was.
    async fn approve_version_for(
        &self,
        delivery_config: &DeliveryConfig,
        artifact: &DeliveryArtifact,
        version: &str,
        environment: &str,
    ) -> StorageResult<bool>;

    async fn is_approved_for(
        &self,
        delivery_config: &DeliveryConfig,
        artifact: &DeliveryArtifact,
        version: &str,
        environment: &str,
    ) -> StorageResult<bool>;

    /// The most recently approved version
    async fn latest_approved_version_in(
        &self,
        delivery_config: &DeliveryConfig,
        artifact: &DeliveryArtifact,
        environment: &str,
    ) -> StorageResult<Option<String>>;

    async fn pin(
        &self,
        delivery_config: &DeliveryConfig,
        artifact: &DeliveryArtifact,
        version: &str,
        environment: &str,
    ) -> StorageResult<()>;

    async fn unpin(
        &self,
        delivery_config: &DeliveryConfig,
        artifact: &DeliveryArtifact,
        environment: &str,
    ) -> StorageResult<bool>;

    async fn pinned_version(
        &self,
        delivery_config: &DeliveryConfig,
        artifact: &DeliveryArtifact,
        environment: &str,
    ) -> StorageResult<Option<String>>;

    /// Mark a version as never to be promoted into an environment
    async fn veto_version(
        &self,
        delivery_config: &DeliveryConfig,
        artifact: &DeliveryArtifact,
        version: &str,
        environment: &str,
    ) -> StorageResult<bool>;

    async fn vetoed_versions(
        &self,
        delivery_config: &DeliveryConfig,
        artifact: &DeliveryArtifact,
        environment: &str,
    ) -> StorageResult<Vec<String>>;
}

/// Fingerprint of a persistent diff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffFingerprint {
    pub hash: String,

    /// Consecutive checks that saw this diff
    pub count: u32,

    /// Actuations launched while this diff persisted
    pub action_taken_count: u32,

    pub first_detected_at: DateTime<Utc>,
}

/// Storage of diff fingerprints by resource
#[async_trait]
pub trait DiffFingerprintRepository: Send + Sync {
    /// Record a sighting of a diff, restarting counts when the hash changes
    async fn store(&self, id: &ResourceId, hash: &str) -> StorageResult<()>;

    async fn get(&self, id: &ResourceId) -> StorageResult<Option<DiffFingerprint>>;

    async fn mark_action_taken(&self, id: &ResourceId) -> StorageResult<()>;

    async fn action_taken_count(&self, id: &ResourceId) -> StorageResult<u32>;

    /// Forget the diff of a resource that is back in sync
    async fn clear(&self, id: &ResourceId) -> StorageResult<()>;
}

/// Paused applications and resources
#[async_trait]
pub trait PauseRepository: Send + Sync {
    async fn pause_application(&self, application: &str) -> StorageResult<()>;

    async fn resume_application(&self, application: &str) -> StorageResult<()>;

    async fn application_paused(&self, application: &str) -> StorageResult<bool>;

    async fn pause_resource(&self, id: &ResourceId) -> StorageResult<()>;

    async fn resume_resource(&self, id: &ResourceId) -> StorageResult<()>;

    async fn resource_paused(&self, id: &ResourceId) -> StorageResult<bool>;
}
