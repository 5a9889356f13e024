//! Persistence of submitted resources
//!
//! Normalizes submissions through their handler, stores them and records
//! lifecycle events. Updates that do not change the normalized spec are
//! dropped without an event. Deleting a resource keeps its history.

use crate::clock::{Clock, SystemClock};
use crate::error::PersistError;
use crate::events::EventPublisher;
use crate::handler::HandlerRegistry;
use crate::storage::ResourceRepository;
use reconcile_types::{
    ObjectDiff, ResourceEvent, ResourceEventDetail, ResourceId, SubmittedResource, TelemetryEvent,
    UntypedResource,
};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Stores resources on behalf of users
pub struct ResourcePersister {
    resources: Arc<dyn ResourceRepository>,
    handlers: Arc<HandlerRegistry>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
}

impl ResourcePersister {
    /// Create a new persister
    pub fn new(
        resources: Arc<dyn ResourceRepository>,
        handlers: Arc<HandlerRegistry>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            resources,
            handlers,
            publisher,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Normalize and store a new resource.
    ///
    /// Fails with [`PersistError::AlreadyExists`] if the id is taken; use
    /// [`update`](Self::update) to change a stored resource.
    #[instrument(skip_all, fields(kind = %submitted.kind, name = %submitted.name))]
    pub async fn create(&self, submitted: SubmittedResource) -> Result<UntypedResource, PersistError> {
        let id = submitted.id();
        if self.resources.get(&id).await?.is_some() {
            warn!(resource_id = %id, "Resource already exists");
            return Err(PersistError::AlreadyExists(id));
        }

        let normalized = self.normalize(submitted).await?;
        let stored = self.resources.store(normalized).await?;

        info!(resource_id = %stored.id, "Created resource");
        self.publish_history(&stored, ResourceEventDetail::Created).await;
        Ok(stored)
    }

    /// Store a new version of an existing resource if its spec changed.
    ///
    /// Returns the stored resource, which is the existing one when nothing
    /// changed.
    #[instrument(skip_all, fields(resource_id = %id))]
    pub async fn update(
        &self,
        id: &ResourceId,
        submitted: SubmittedResource,
    ) -> Result<UntypedResource, PersistError> {
        let existing = self
            .resources
            .get(id)
            .await?
            .ok_or_else(|| PersistError::NotFound(id.clone()))?;

        let submitted_id = submitted.id();
        if submitted_id != *id {
            return Err(PersistError::IdentityMismatch {
                expected: id.clone(),
                submitted: submitted_id,
            });
        }

        let mut normalized = self.normalize(submitted).await?;
        let diff = ObjectDiff::compare(&normalized.spec, &existing.spec);
        if !diff.has_changes() {
            debug!("Resource unchanged, nothing to persist");
            return Ok(existing);
        }

        normalized.version = existing.version;
        let stored = self.resources.store(normalized).await?;

        info!(version = stored.version, diff = %diff.to_debug(), "Updated resource");
        self.publish_history(&stored, ResourceEventDetail::Updated {
            delta: diff.to_json(),
        })
        .await;
        self.resources.mark_check_due(id).await?;
        Ok(stored)
    }

    /// Remove a resource, returning its last known state
    #[instrument(skip_all, fields(resource_id = %id))]
    pub async fn delete(&self, id: &ResourceId) -> Result<UntypedResource, PersistError> {
        let existing = self
            .resources
            .get(id)
            .await?
            .ok_or_else(|| PersistError::NotFound(id.clone()))?;

        if !self.resources.delete(id).await? {
            warn!("Resource disappeared before it could be deleted");
        }

        info!("Deleted resource");
        self.publisher
            .publish(
                TelemetryEvent::ResourceDeleted {
                    resource_id: existing.id.clone(),
                    resource_kind: existing.kind.clone(),
                    application: existing.application().to_string(),
                }
                .into(),
            )
            .await;
        Ok(existing)
    }

    async fn normalize(&self, submitted: SubmittedResource) -> Result<UntypedResource, PersistError> {
        let handler = self.handlers.supporting(&submitted.kind)?;
        Ok(handler.normalize(submitted.into_resource()).await?)
    }

    async fn publish_history(&self, resource: &UntypedResource, detail: ResourceEventDetail) {
        self.publisher
            .publish(
                ResourceEvent::new(
                    resource.id.clone(),
                    resource.kind.clone(),
                    resource.application(),
                    self.clock.now(),
                    detail,
                )
                .into(),
            )
            .await;
    }
}
