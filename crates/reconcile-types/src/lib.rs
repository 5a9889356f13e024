//! Reconcile Types - Core types for declarative resource reconciliation
//!
//! The reconciliation engine continuously diffs the desired state of
//! declared infrastructure against what is actually running, launches
//! remediation tasks, and promotes artifact versions through the ordered
//! environments of a delivery config.
//!
//! ## Key Concepts
//!
//! - **Resource**: A declared piece of infrastructure with an owning application
//! - **ResourceDiff**: Desired vs current resolved state, computed per check
//! - **DeliveryConfig**: Artifacts plus ordered environments with constraints
//! - **Task**: Handle to an asynchronously executing remediation
//! - **VetoResponse**: Decision whether a resource may be actuated
//! - **Events**: Append-only resource history plus a telemetry stream

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod delivery;
pub mod diff;
pub mod events;
pub mod ids;
pub mod resource;
pub mod task;
pub mod veto;

// Re-export main types
pub use delivery::{
    ArtifactPin, ArtifactVeto, Constraint, DeliveryArtifact, DeliveryConfig, Environment,
};
pub use diff::{Delta, DeltaState, ObjectDiff, ResourceDiff};
pub use events::{
    EventEnvelope, EventSeverity, ReconcileEvent, ResourceEvent, ResourceEventDetail, ResourceEventKind,
    TelemetryEvent,
};
pub use ids::{ResourceId, ResourceKind, ResourceKindParseError};
pub use resource::{Resource, ResourceMetadata, ResourceSpec, SubmittedResource, UntypedResource};
pub use task::Task;
pub use veto::VetoResponse;
