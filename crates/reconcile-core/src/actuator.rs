//! Resource actuation
//!
//! [`ResourceActuator::check_resource`] drives one resource through a single
//! reconciliation pass. Every outcome is reported as events; a check never
//! fails past its own boundary.

use crate::clock::{Clock, SystemClock};
use crate::error::CheckError;
use crate::events::EventPublisher;
use crate::handler::{ErasedHandler, HandlerRegistry};
use crate::pause::ActuationPauser;
use crate::storage::{DeliveryConfigRepository, DiffFingerprintRepository, ResourceRepository};
use crate::veto::VetoEnforcer;
use reconcile_types::{
    ResourceEvent, ResourceEventDetail, ResourceEventKind, Task, TelemetryEvent, UntypedResource,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Reasons a check ended before resolving the resource
pub mod skip {
    pub const ACTUATION_PAUSED: &str = "ActuationPaused";
    pub const ACTUATION_IN_PROGRESS: &str = "ActuationInProgress";
    pub const PROMOTION_CHECK_STALE: &str = "PromotionCheckStale";
}

/// Default age after which a delivery config's promotion check is stale
pub const DEFAULT_PROMOTION_CHECK_STALE_AFTER: Duration = Duration::from_secs(300);

/// Collaborators of the actuator
pub struct ActuatorContext {
    pub resources: Arc<dyn ResourceRepository>,
    pub delivery_configs: Arc<dyn DeliveryConfigRepository>,
    pub fingerprints: Arc<dyn DiffFingerprintRepository>,
    pub handlers: Arc<HandlerRegistry>,
    pub pauser: Arc<ActuationPauser>,
    pub vetoes: Arc<VetoEnforcer>,
    pub publisher: Arc<dyn EventPublisher>,
}

/// Drives resources towards their desired state
pub struct ResourceActuator {
    resources: Arc<dyn ResourceRepository>,
    delivery_configs: Arc<dyn DeliveryConfigRepository>,
    fingerprints: Arc<dyn DiffFingerprintRepository>,
    handlers: Arc<HandlerRegistry>,
    pauser: Arc<ActuationPauser>,
    vetoes: Arc<VetoEnforcer>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    promotion_check_stale_after: Option<chrono::Duration>,
}

enum Outcome {
    Skipped(&'static str),
    Vetoed,
    Checked,
}

impl ResourceActuator {
    /// Create a new actuator
    pub fn new(context: ActuatorContext) -> Self {
        Self {
            resources: context.resources,
            delivery_configs: context.delivery_configs,
            fingerprints: context.fingerprints,
            handlers: context.handlers,
            pauser: context.pauser,
            vetoes: context.vetoes,
            publisher: context.publisher,
            clock: Arc::new(SystemClock),
            promotion_check_stale_after: chrono::Duration::from_std(DEFAULT_PROMOTION_CHECK_STALE_AFTER).ok(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Skip resources whose delivery config has not had its environments
    /// checked within `after`. `None` disables the rule.
    pub fn with_promotion_check_stale_after(mut self, after: Option<Duration>) -> Self {
        self.promotion_check_stale_after = after.and_then(|after| chrono::Duration::from_std(after).ok());
        self
    }

    /// Run one reconciliation pass over a resource
    #[instrument(skip(self, resource), fields(resource_id = %resource.id, kind = %resource.kind))]
    pub async fn check_resource(&self, resource: &UntypedResource) {
        match self.try_check(resource).await {
            Ok(Outcome::Skipped(reason)) => {
                debug!(reason, "Resource check skipped");
            }
            Ok(Outcome::Vetoed) | Ok(Outcome::Checked) => {}
            Err(e) if e.is_unresolvable() => {
                warn!(error = %e, "Resource is currently unresolvable");
                self.publish_history(resource, ResourceEventDetail::CheckUnresolvable {
                    message: e.to_string(),
                })
                .await;
            }
            Err(e) => {
                error!(error = %e, "Resource check failed");
                self.publish_history(resource, ResourceEventDetail::CheckError {
                    message: e.to_string(),
                })
                .await;
            }
        }
    }

    async fn try_check(&self, resource: &UntypedResource) -> Result<Outcome, CheckError> {
        let id = &resource.id;

        if self.pauser.is_paused(resource).await? {
            return Ok(self.skipped(resource, skip::ACTUATION_PAUSED).await);
        }

        let handler = self.handlers.supporting(&resource.kind)?;

        let bound = handler
            .bind(resource)
            .map_err(|e| CheckError::handler(id, "bind", e))?;

        let in_progress = bound
            .actuation_in_progress()
            .await
            .map_err(|e| CheckError::handler(id, "actuation_in_progress", e))?;
        if in_progress {
            return Ok(self.skipped(resource, skip::ACTUATION_IN_PROGRESS).await);
        }

        if self.promotion_check_is_stale(resource).await? {
            return Ok(self.skipped(resource, skip::PROMOTION_CHECK_STALE).await);
        }

        let resolved = bound.resolve().await?;

        if resolved.has_changes() {
            debug!(diff = %resolved.to_debug(), "Resource differs from desired state");
            self.fingerprints.store(id, &resolved.fingerprint()).await?;
        } else {
            self.fingerprints.clear(id).await?;
        }

        let response = self.vetoes.can_check(resource).await;
        if !response.allowed {
            let veto = response.veto_name_or_default().to_string();
            self.publish_skip(resource, &veto).await;
            if !response.suppress_event {
                self.publish_history(resource, ResourceEventDetail::ActuationVetoed {
                    veto,
                    message: response.message,
                })
                .await;
            }
            return Ok(Outcome::Vetoed);
        }

        if resolved.has_changes() {
            let decision = resolved
                .will_take_action()
                .await
                .map_err(|e| CheckError::handler(id, "will_take_action", e))?;
            if !decision.will_act {
                info!(reason = ?decision.message, "Handler declined to act on diff");
                self.publish_history(resource, ResourceEventDetail::DeltaDetected {
                    delta: resolved.delta_json(),
                })
                .await;
                self.publish_history(resource, ResourceEventDetail::DiffNotActionable {
                    message: decision.message,
                })
                .await;
                return Ok(Outcome::Checked);
            }
        }

        if resolved.is_missing() {
            warn!("Resource is missing");
            self.publish_history(resource, ResourceEventDetail::Missing).await;

            let tasks = resolved
                .create()
                .await
                .map_err(|e| CheckError::handler(id, "create", e))?;
            self.launched(resource, handler.as_ref(), tasks).await?;
        } else if resolved.has_changes() {
            info!(diff = %resolved.to_debug(), "Resource delta detected");
            self.publish_history(resource, ResourceEventDetail::DeltaDetected {
                delta: resolved.delta_json(),
            })
            .await;

            let tasks = resolved
                .update()
                .await
                .map_err(|e| CheckError::handler(id, "update", e))?;
            if !tasks.is_empty() {
                self.launched(resource, handler.as_ref(), tasks).await?;
            }
        } else {
            let last = self.resources.last_event(id).await?.map(|e| e.kind());
            match last {
                Some(ResourceEventKind::DeltaDetected) | Some(ResourceEventKind::ActuationLaunched) => {
                    info!("Resource delta resolved");
                    self.publish_history(resource, ResourceEventDetail::DeltaResolved).await;
                }
                _ => {
                    debug!("Resource is valid");
                    self.publish_history(resource, ResourceEventDetail::Valid).await;
                }
            }
        }

        Ok(Outcome::Checked)
    }

    async fn launched(
        &self,
        resource: &UntypedResource,
        handler: &dyn ErasedHandler,
        tasks: Vec<Task>,
    ) -> Result<(), CheckError> {
        info!(tasks = tasks.len(), plugin = handler.name(), "Actuation launched");
        self.publish_history(resource, ResourceEventDetail::ActuationLaunched {
            plugin: handler.name().to_string(),
            tasks,
        })
        .await;
        self.fingerprints.mark_action_taken(&resource.id).await?;
        Ok(())
    }

    async fn promotion_check_is_stale(&self, resource: &UntypedResource) -> Result<bool, CheckError> {
        let Some(stale_after) = self.promotion_check_stale_after else {
            return Ok(false);
        };
        let Some(config) = self.delivery_configs.delivery_config_for(&resource.id).await? else {
            return Ok(false);
        };

        let stale = match self.delivery_configs.last_checked(&config.name).await? {
            Some(last_checked) => self.clock.now() - last_checked > stale_after,
            None => true,
        };
        Ok(stale)
    }

    async fn skipped(&self, resource: &UntypedResource, reason: &'static str) -> Outcome {
        self.publish_skip(resource, reason).await;
        Outcome::Skipped(reason)
    }

    async fn publish_skip(&self, resource: &UntypedResource, skipper: &str) {
        self.publisher
            .publish(
                TelemetryEvent::ResourceCheckSkipped {
                    resource_id: resource.id.clone(),
                    resource_kind: resource.kind.clone(),
                    skipper: skipper.to_string(),
                }
                .into(),
            )
            .await;
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
