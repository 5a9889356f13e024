//! Event types for reconciliation
//!
//! Resource events form the append-only history of a resource and are
//! persisted. Telemetry events describe what the engine is doing and are
//! only broadcast.

use crate::ids::{ResourceId, ResourceKind};
use crate::task::Task;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Closed set of resource history kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceEventKind {
    Created,
    Updated,
    Missing,
    DeltaDetected,
    DeltaResolved,
    ActuationLaunched,
    ActuationVetoed,
    DiffNotActionable,
    CheckError,
    CheckUnresolvable,
    Valid,
}

/// Payload of a resource history event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ResourceEventDetail {
    /// Resource was first stored
    Created,

    /// A new version of the resource was stored
    Updated { delta: serde_json::Value },

    /// The resource does not exist in the target system
    Missing,

    /// Current state differs from desired state
    DeltaDetected { delta: serde_json::Value },

    /// A previously detected delta is gone
    DeltaResolved,

    /// Remediation tasks were launched
    ActuationLaunched { plugin: String, tasks: Vec<Task> },

    /// A veto stopped actuation
    ActuationVetoed {
        veto: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// The handler declined to act on the diff
    DiffNotActionable {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// The check failed
    CheckError { message: String },

    /// The resource could not be resolved for now
    CheckUnresolvable { message: String },

    /// Current state matches desired state
    Valid,
}

impl ResourceEventDetail {
    pub fn kind(&self) -> ResourceEventKind {
        match self {
            Self::Created => ResourceEventKind::Created,
            Self::Updated { .. } => ResourceEventKind::Updated,
            Self::Missing => ResourceEventKind::Missing,
            Self::DeltaDetected { .. } => ResourceEventKind::DeltaDetected,
            Self::DeltaResolved => ResourceEventKind::DeltaResolved,
            Self::ActuationLaunched { .. } => ResourceEventKind::ActuationLaunched,
            Self::ActuationVetoed { .. } => ResourceEventKind::ActuationVetoed,
            Self::DiffNotActionable { .. } => ResourceEventKind::DiffNotActionable,
            Self::CheckError { .. } => ResourceEventKind::CheckError,
            Self::CheckUnresolvable { .. } => ResourceEventKind::CheckUnresolvable,
            Self::Valid => ResourceEventKind::Valid,
        }
    }

    /// Steady-state events that are only recorded when they differ from the
    /// previous entry in the history
    pub fn ignore_repeated_in_history(&self) -> bool {
        matches!(
            self,
            Self::Missing
                | Self::DeltaDetected { .. }
                | Self::ActuationVetoed { .. }
                | Self::DiffNotActionable { .. }
                | Self::CheckError { .. }
                | Self::CheckUnresolvable { .. }
                | Self::Valid
        )
    }
}

/// One entry in a resource's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceEvent {
    pub resource_id: ResourceId,
    pub resource_kind: ResourceKind,
    pub application: String,
    pub timestamp: DateTime<Utc>,
    pub detail: ResourceEventDetail,
}

impl ResourceEvent {
    pub fn new(
        resource_id: ResourceId,
        resource_kind: ResourceKind,
        application: impl Into<String>,
        timestamp: DateTime<Utc>,
        detail: ResourceEventDetail,
    ) -> Self {
        Self {
            resource_id,
            resource_kind,
            application: application.into(),
            timestamp,
            detail,
        }
    }

    pub fn kind(&self) -> ResourceEventKind {
        self.detail.kind()
    }
}

/// Operational events, broadcast but not persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TelemetryEvent {
    /// A resource check ended early
    ResourceCheckSkipped {
        resource_id: ResourceId,
        resource_kind: ResourceKind,
        skipper: String,
    },

    /// A resource tick is about to dispatch checks
    ResourceCheckStarting,

    /// A resource tick finished
    ResourceCheckCompleted { checked: usize, duration_ms: u64 },

    /// An environment tick is about to dispatch checks
    EnvironmentCheckStarting,

    /// An environment tick finished
    EnvironmentCheckCompleted {
        checked: usize,
        failed: usize,
        duration_ms: u64,
    },

    /// Promotion checking failed for one delivery config
    EnvironmentCheckFailed { delivery_config: String, error: String },

    /// A new version was approved for an environment
    ArtifactVersionApproved {
        application: String,
        delivery_config: String,
        environment: String,
        artifact_reference: String,
        version: String,
    },

    /// A resource was removed
    ResourceDeleted {
        resource_id: ResourceId,
        resource_kind: ResourceKind,
        application: String,
    },

    ApplicationActuationPaused { application: String },
    ApplicationActuationResumed { application: String },
    ResourceActuationPaused { resource_id: ResourceId },
    ResourceActuationResumed { resource_id: ResourceId },
}

/// Any event published by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stream", content = "event", rename_all = "camelCase")]
pub enum ReconcileEvent {
    Resource(ResourceEvent),
    Telemetry(TelemetryEvent),
}

impl From<ResourceEvent> for ReconcileEvent {
    fn from(event: ResourceEvent) -> Self {
        Self::Resource(event)
    }
}

impl From<TelemetryEvent> for ReconcileEvent {
    fn from(event: TelemetryEvent) -> Self {
        Self::Telemetry(event)
    }
}

/// Event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

/// Envelope wrapping every broadcast event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event ID
    pub id: Uuid,

    /// Publication timestamp
    pub timestamp: DateTime<Utc>,

    /// Event severity
    pub severity: EventSeverity,

    /// The actual event
    pub event: ReconcileEvent,
}

impl EventEnvelope {
    /// Create a new event envelope
    pub fn new(event: ReconcileEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            severity: Self::infer_severity(&event),
            event,
        }
    }

    /// Infer severity from event type
    fn infer_severity(event: &ReconcileEvent) -> EventSeverity {
        match event {
            ReconcileEvent::Resource(e) => match e.kind() {
                ResourceEventKind::CheckError => EventSeverity::Error,
                ResourceEventKind::CheckUnresolvable
                | ResourceEventKind::Missing
                | ResourceEventKind::ActuationVetoed => EventSeverity::Warning,
                _ => EventSeverity::Info,
            },
            ReconcileEvent::Telemetry(e) => match e {
                TelemetryEvent::EnvironmentCheckFailed { .. } => EventSeverity::Error,
                TelemetryEvent::ResourceCheckSkipped { .. }
                | TelemetryEvent::ResourceCheckStarting
                | TelemetryEvent::EnvironmentCheckStarting
                | TelemetryEvent::ResourceCheckCompleted { .. }
                | TelemetryEvent::EnvironmentCheckCompleted { .. } => EventSeverity::Debug,
                _ => EventSeverity::Info,
            },
        }
    }
}
