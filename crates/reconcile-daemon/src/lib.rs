//! Reconcile Daemon library
//!
//! This module provides the pieces of the `reconciled` daemon:
//! - Configuration loading
//! - Application lifecycle signals
//! - The periodic [`CheckScheduler`]
//! - Daemon assembly over in-memory storage

pub mod config;
pub mod daemon;
pub mod error;
pub mod lifecycle;
pub mod scheduler;

pub use config::{ActuationConfig, DaemonConfig, LoggingConfig, SchedulerConfig};
pub use daemon::Daemon;
pub use error::{DaemonError, DaemonResult};
pub use lifecycle::{ApplicationEvent, Lifecycle};
pub use scheduler::{CheckScheduler, SchedulerContext, TickOutcome, TickSummary};
