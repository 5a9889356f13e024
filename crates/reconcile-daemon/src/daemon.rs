//! Daemon assembly and lifecycle management

use crate::config::DaemonConfig;
use crate::error::{DaemonError, DaemonResult};
use crate::lifecycle::{ApplicationEvent, Lifecycle};
use crate::scheduler::{CheckScheduler, SchedulerContext};
use reconcile_core::storage::InMemoryStorage;
use reconcile_core::{
    ActuationPauser, ActuatorContext, AllowedTimesConstraintEvaluator, ApplicationOptOutVeto,
    ConstraintEvaluator, DependsOnConstraintEvaluator, EnvironmentPromotionChecker, EventBus,
    HandlerRegistry, ResourceActuator, ResourcePersister, UnhappyVeto, Veto, VetoEnforcer,
};
use reconcile_types::EventEnvelope;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// The reconciliation daemon: in-memory storage, the engine and its
/// scheduler
pub struct Daemon {
    storage: Arc<InMemoryStorage>,
    events: Arc<EventBus>,
    pauser: Arc<ActuationPauser>,
    opt_out: Arc<ApplicationOptOutVeto>,
    persister: Arc<ResourcePersister>,
    scheduler: Arc<CheckScheduler>,
    lifecycle: Lifecycle,
}

impl Daemon {
    /// Wire the engine around the given handlers
    pub fn new(config: DaemonConfig, handlers: HandlerRegistry) -> DaemonResult<Self> {
        if handlers.is_empty() {
            warn!("No resource handlers registered, every resource check will fail");
        }

        let storage = Arc::new(InMemoryStorage::new());
        let events = Arc::new(EventBus::new(storage.clone()));
        let handlers = Arc::new(handlers);

        let pauser = Arc::new(ActuationPauser::new(storage.clone(), events.clone()));
        let opt_out = Arc::new(ApplicationOptOutVeto::new());
        let vetoes: Vec<Arc<dyn Veto>> = vec![
            opt_out.clone(),
            Arc::new(UnhappyVeto::new(
                storage.clone(),
                config.actuation.unhappy_max_diff_count,
                config.actuation.unhappy_wait(),
            )),
        ];

        let actuator = ResourceActuator::new(ActuatorContext {
            resources: storage.clone(),
            delivery_configs: storage.clone(),
            fingerprints: storage.clone(),
            handlers: handlers.clone(),
            pauser: pauser.clone(),
            vetoes: Arc::new(VetoEnforcer::with_vetoes(vetoes)),
            publisher: events.clone(),
        })
        .with_promotion_check_stale_after(config.actuation.promotion_check_stale_after());

        let evaluators: Vec<Arc<dyn ConstraintEvaluator>> = vec![
            Arc::new(DependsOnConstraintEvaluator::new(storage.clone())),
            Arc::new(AllowedTimesConstraintEvaluator::new()),
        ];
        let promotion = EnvironmentPromotionChecker::new(
            storage.clone(),
            storage.clone(),
            evaluators,
            events.clone(),
        );

        let persister = Arc::new(ResourcePersister::new(
            storage.clone(),
            handlers.clone(),
            events.clone(),
        ));

        let scheduler = CheckScheduler::new(
            config.scheduler.clone(),
            SchedulerContext {
                resources: storage.clone(),
                delivery_configs: storage.clone(),
                actuator: Arc::new(actuator),
                promotion: Arc::new(promotion),
                publisher: events.clone(),
            },
        );

        info!(kinds = ?handlers.kinds(), "Reconcile daemon assembled");

        Ok(Self {
            storage,
            events,
            pauser,
            opt_out,
            persister,
            scheduler,
            lifecycle: Lifecycle::new(),
        })
    }

    pub fn storage(&self) -> Arc<InMemoryStorage> {
        self.storage.clone()
    }

    pub fn persister(&self) -> Arc<ResourcePersister> {
        self.persister.clone()
    }

    pub fn pauser(&self) -> Arc<ActuationPauser> {
        self.pauser.clone()
    }

    pub fn opt_out(&self) -> Arc<ApplicationOptOutVeto> {
        self.opt_out.clone()
    }

    pub fn scheduler(&self) -> Arc<CheckScheduler> {
        self.scheduler.clone()
    }

    /// Subscribe to every published event
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.events.subscribe()
    }

    /// Run until a shutdown signal arrives
    pub async fn run(self) -> DaemonResult<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `shutdown` completes
    pub async fn run_until(self, shutdown: impl std::future::Future<Output = ()>) -> DaemonResult<()> {
        let tasks = self.scheduler.start(self.lifecycle.subscribe());
        self.lifecycle.signal(ApplicationEvent::Up);
        info!("Reconcile daemon running");

        shutdown.await;

        info!("Reconcile daemon shutting down");
        self.lifecycle.signal(ApplicationEvent::Down);
        self.scheduler.stop();

        for task in tasks {
            task.await
                .map_err(|e| DaemonError::Scheduler(e.to_string()))?;
        }

        Ok(())
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
