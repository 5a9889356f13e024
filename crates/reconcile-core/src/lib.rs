//! Reconcile Core - Actuation, promotion and persistence
//!
//! This crate contains the reconciliation engine proper:
//!
//! - [`ResourceActuator`]: one reconciliation pass per resource
//! - [`EnvironmentPromotionChecker`]: approves artifact versions per environment
//! - [`ResourcePersister`]: normalizes, diffs and stores submitted resources
//! - [`HandlerRegistry`]: resource handler plugins keyed by (apiVersion, kind)
//! - [`VetoEnforcer`] and [`ConstraintEvaluator`]s: actuation and promotion gates
//!
//! Repositories are traits; [`storage::InMemoryStorage`] implements all of
//! them.

#![deny(unsafe_code)]

pub mod actuator;
pub mod clock;
pub mod constraints;
pub mod error;
pub mod events;
pub mod handler;
pub mod pause;
pub mod persister;
pub mod promotion;
pub mod storage;
pub mod veto;

pub use actuator::{ActuatorContext, ResourceActuator};
pub use clock::{Clock, MutableClock, SystemClock};
pub use constraints::{
    AllowedTimesConstraintEvaluator, ConstraintEvaluator, DependsOnConstraintEvaluator,
};
pub use error::{
    CheckError, ConstraintError, HandlerError, HandlerResult, PersistError, PromotionError,
    RegistryError, StorageError, StorageResult,
};
pub use events::{EventBus, EventPublisher};
pub use handler::{ActionDecision, HandlerRegistry, ResourceHandler};
pub use pause::ActuationPauser;
pub use persister::ResourcePersister;
pub use promotion::EnvironmentPromotionChecker;
pub use veto::{ApplicationOptOutVeto, UnhappyVeto, Veto, VetoEnforcer};
