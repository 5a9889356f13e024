//! Periodic resource and environment checks
//!
//! Two independent tickers drive the engine: one checks resources that are
//! due, the other checks delivery config environments that are due. Both are
//! no-ops until the application signals [`ApplicationEvent::Up`]. Each tick
//! fans its batch out as concurrent tasks and waits for all of them; a
//! failing check is reported and never affects its siblings.

use crate::config::SchedulerConfig;
use crate::lifecycle::ApplicationEvent;
use reconcile_core::storage::{DeliveryConfigRepository, ResourceRepository};
use reconcile_core::{EnvironmentPromotionChecker, EventPublisher, ResourceActuator, StorageError};
use reconcile_types::TelemetryEvent;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Checking is disabled; nothing was queried
    Disabled,
    Completed(TickSummary),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub checked: usize,
    pub failed: usize,
}

/// Collaborators of the scheduler
pub struct SchedulerContext {
    pub resources: Arc<dyn ResourceRepository>,
    pub delivery_configs: Arc<dyn DeliveryConfigRepository>,
    pub actuator: Arc<ResourceActuator>,
    pub promotion: Arc<EnvironmentPromotionChecker>,
    pub publisher: Arc<dyn EventPublisher>,
}

/// Schedules resource and environment checks
pub struct CheckScheduler {
    config: SchedulerConfig,
    resources: Arc<dyn ResourceRepository>,
    delivery_configs: Arc<dyn DeliveryConfigRepository>,
    actuator: Arc<ResourceActuator>,
    promotion: Arc<EnvironmentPromotionChecker>,
    publisher: Arc<dyn EventPublisher>,
    enabled: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

impl CheckScheduler {
    /// Create a new, disabled scheduler
    pub fn new(config: SchedulerConfig, context: SchedulerContext) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            config,
            resources: context.resources,
            delivery_configs: context.delivery_configs,
            actuator: context.actuator,
            promotion: context.promotion,
            publisher: context.publisher,
            enabled: AtomicBool::new(false),
            shutdown_tx,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Enable on Up, disable on Down. Disabling stops new ticks from doing
    /// work; checks already dispatched run to completion.
    pub fn on_application_event(&self, event: ApplicationEvent) {
        let enable = event == ApplicationEvent::Up;
        let was_enabled = self.enabled.swap(enable, Ordering::SeqCst);
        if was_enabled != enable {
            info!(enabled = enable, "Check scheduling {}", if enable { "enabled" } else { "disabled" });
        }
    }

    /// Spawn the lifecycle listener and both tickers
    pub fn start(self: &Arc<Self>, lifecycle: broadcast::Receiver<ApplicationEvent>) -> Vec<JoinHandle<()>> {
        info!(
            resource_interval_ms = self.config.resource_check_interval_ms,
            environment_interval_ms = self.config.environment_check_interval_ms,
            "Scheduler started"
        );

        vec![
            self.spawn_listener(lifecycle),
            self.spawn_ticker("resource", self.config.resource_check_interval(), |scheduler| async move {
                scheduler.check_resources().await
            }),
            self.spawn_ticker("environment", self.config.environment_check_interval(), |scheduler| async move {
                scheduler.check_environments().await
            }),
        ]
    }

    /// Disable checking and stop the tickers after their current tick
    pub fn stop(&self) {
        self.on_application_event(ApplicationEvent::Down);
        self.shutdown_tx.send_replace(true);
    }

    fn spawn_listener(self: &Arc<Self>, mut lifecycle: broadcast::Receiver<ApplicationEvent>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = lifecycle.recv() => match event {
                        Ok(event) => scheduler.on_application_event(event),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Missed lifecycle signals");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = shutdown.changed() => break,
                }
            }
        })
    }

    fn spawn_ticker<F, Fut>(self: &Arc<Self>, name: &'static str, period: Duration, tick: F) -> JoinHandle<()>
    where
        F: Fn(Arc<Self>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<TickOutcome, StorageError>> + Send + 'static,
    {
        let scheduler = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = interval(period.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = tick(Arc::clone(&scheduler)).await {
                            error!(ticker = name, error = %e, "Check tick failed");
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }

            debug!(ticker = name, "Ticker stopped");
        })
    }

    /// Check one batch of due resources
    pub async fn check_resources(&self) -> Result<TickOutcome, StorageError> {
        if !self.is_enabled() {
            return Ok(TickOutcome::Disabled);
        }

        self.publisher.publish(TelemetryEvent::ResourceCheckStarting.into()).await;
        let started = Instant::now();

        let due = self
            .resources
            .items_due_for_check(self.config.min_age(), self.config.resource_batch_size)
            .await?;

        let mut checks = JoinSet::new();
        for resource in due {
            let actuator = Arc::clone(&self.actuator);
            checks.spawn(async move { actuator.check_resource(&resource).await });
        }

        let mut summary = TickSummary::default();
        while let Some(result) = checks.join_next().await {
            summary.checked += 1;
            if let Err(e) = result {
                summary.failed += 1;
                error!(error = %e, "Resource check task aborted");
            }
        }

        let duration_ms = elapsed_ms(started);
        debug!(checked = summary.checked, duration_ms, "Resource check tick completed");
        self.publisher
            .publish(
                TelemetryEvent::ResourceCheckCompleted {
                    checked: summary.checked,
                    duration_ms,
                }
                .into(),
            )
            .await;

        Ok(TickOutcome::Completed(summary))
    }

    /// Check the environments of one batch of due delivery configs
    pub async fn check_environments(&self) -> Result<TickOutcome, StorageError> {
        if !self.is_enabled() {
            return Ok(TickOutcome::Disabled);
        }

        self.publisher.publish(TelemetryEvent::EnvironmentCheckStarting.into()).await;
        let started = Instant::now();

        let due = self
            .delivery_configs
            .items_due_for_check(self.config.min_age(), self.config.environment_batch_size)
            .await?;

        let mut checks = JoinSet::new();
        for delivery_config in due {
            let promotion = Arc::clone(&self.promotion);
            let publisher = Arc::clone(&self.publisher);
            checks.spawn(async move {
                match promotion.check_environments(&delivery_config).await {
                    Ok(()) => true,
                    Err(e) => {
                        error!(
                            delivery_config = %delivery_config.name,
                            error = %e,
                            "Environment check failed"
                        );
                        publisher
                            .publish(
                                TelemetryEvent::EnvironmentCheckFailed {
                                    delivery_config: delivery_config.name.clone(),
                                    error: e.to_string(),
                                }
                                .into(),
                            )
                            .await;
                        false
                    }
                }
            });
        }

        let mut summary = TickSummary::default();
        while let Some(result) = checks.join_next().await {
            summary.checked += 1;
            match result {
                Ok(true) => {}
                Ok(false) => summary.failed += 1,
                Err(e) => {
                    summary.failed += 1;
                    error!(error = %e, "Environment check task aborted");
                }
            }
        }

        let duration_ms = elapsed_ms(started);
        debug!(
            checked = summary.checked,
            failed = summary.failed,
            duration_ms,
            "Environment check tick completed"
        );
        self.publisher
            .publish(
                TelemetryEvent::EnvironmentCheckCompleted {
                    checked: summary.checked,
                    failed: summary.failed,
                    duration_ms,
                }
                .into(),
            )
            .await;

        Ok(TickOutcome::Completed(summary))
    }
}

/// Milliseconds since `started`, saturating at `u64::MAX`
fn elapsed_ms(started: Instant) -> u64 {
    millis(started.elapsed())
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use reconcile_core::storage::InMemoryStorage;
    use reconcile_core::{
        ActuationPauser, ActuatorContext, EventBus, HandlerError, HandlerRegistry, HandlerResult,
        ResourceHandler, StorageResult, VetoEnforcer,
    };
    use reconcile_types::{
        Constraint, DeliveryArtifact, DeliveryConfig, Environment, ReconcileEvent, Resource,
        ResourceDiff, ResourceEvent, ResourceEventKind, ResourceId, ResourceKind,
        ResourceMetadata, Task, UntypedResource,
    };
    use reconcile_core::storage::ArtifactRepository;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn widget_kind() -> ResourceKind {
        ResourceKind::new("test.reconcile/v1", "widget")
    }

    /// Widgets that exist once created; names starting with `broken` fail
    #[derive(Default)]
    struct WidgetHandler {
        existing: Mutex<HashMap<String, Value>>,
        creates: AtomicUsize,
    }

    #[async_trait]
    impl ResourceHandler for WidgetHandler {
        type Spec = Value;
        type Resolved = Value;

        fn name(&self) -> &str {
            "widget-handler"
        }

        fn supported_kind(&self) -> ResourceKind {
            widget_kind()
        }

        async fn desired(&self, resource: &Resource<Value>) -> HandlerResult<Value> {
            Ok(resource.spec.clone())
        }

        async fn current(&self, resource: &Resource<Value>) -> HandlerResult<Option<Value>> {
            if resource.name.starts_with("broken") {
                return Err(HandlerError::Failed(anyhow::anyhow!("widget service unavailable")));
            }
            Ok(self.existing.lock().unwrap().get(&resource.name).cloned())
        }

        async fn create(&self, resource: &Resource<Value>, _diff: &ResourceDiff<Value>) -> HandlerResult<Vec<Task>> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            self.existing
                .lock()
                .unwrap()
                .insert(resource.name.clone(), resource.spec.clone());
            Ok(vec![Task::new(format!("create-{}", resource.name), "create widget")])
        }

        async fn update(&self, _resource: &Resource<Value>, _diff: &ResourceDiff<Value>) -> HandlerResult<Vec<Task>> {
            Ok(vec![])
        }

        async fn delete(&self, _resource: &Resource<Value>) -> HandlerResult<Vec<Task>> {
            Ok(vec![])
        }
    }

    /// Counts due-resource queries
    struct CountingResources {
        inner: Arc<InMemoryStorage>,
        due_queries: AtomicUsize,
    }

    #[async_trait]
    impl ResourceRepository for CountingResources {
        async fn get(&self, id: &ResourceId) -> StorageResult<Option<UntypedResource>> {
            ResourceRepository::get(self.inner.as_ref(), id).await
        }

        async fn store(&self, resource: UntypedResource) -> StorageResult<UntypedResource> {
            ResourceRepository::store(self.inner.as_ref(), resource).await
        }

        async fn delete(&self, id: &ResourceId) -> StorageResult<bool> {
            ResourceRepository::delete(self.inner.as_ref(), id).await
        }

        async fn list(&self) -> StorageResult<Vec<UntypedResource>> {
            self.inner.list().await
        }

        async fn items_due_for_check(&self, min_age: Duration, limit: usize) -> StorageResult<Vec<UntypedResource>> {
            self.due_queries.fetch_add(1, Ordering::SeqCst);
            ResourceRepository::items_due_for_check(self.inner.as_ref(), min_age, limit).await
        }

        async fn mark_check_due(&self, id: &ResourceId) -> StorageResult<()> {
            ResourceRepository::mark_check_due(self.inner.as_ref(), id).await
        }

        async fn append_history(&self, event: ResourceEvent) -> StorageResult<()> {
            self.inner.append_history(event).await
        }

        async fn event_history(&self, id: &ResourceId, limit: usize) -> StorageResult<Vec<ResourceEvent>> {
            self.inner.event_history(id, limit).await
        }

        async fn last_event(&self, id: &ResourceId) -> StorageResult<Option<ResourceEvent>> {
            self.inner.last_event(id).await
        }
    }

    struct Fixture {
        storage: Arc<InMemoryStorage>,
        resources: Arc<CountingResources>,
        handler: Arc<WidgetHandler>,
        bus: Arc<EventBus>,
        scheduler: Arc<CheckScheduler>,
    }

    fn fixture(config: SchedulerConfig) -> Fixture {
        let storage = Arc::new(InMemoryStorage::new());
        let resources = Arc::new(CountingResources {
            inner: storage.clone(),
            due_queries: AtomicUsize::new(0),
        });
        let bus = Arc::new(EventBus::new(storage.clone()));
        let handler = Arc::new(WidgetHandler::default());
        let mut handlers = HandlerRegistry::new();
        handlers.register_shared(handler.clone()).unwrap();

        let actuator = ResourceActuator::new(ActuatorContext {
            resources: resources.clone(),
            delivery_configs: storage.clone(),
            fingerprints: storage.clone(),
            handlers: Arc::new(handlers),
            pauser: Arc::new(ActuationPauser::new(storage.clone(), bus.clone())),
            vetoes: Arc::new(VetoEnforcer::new()),
            publisher: bus.clone(),
        })
        .with_promotion_check_stale_after(None);
        let promotion = EnvironmentPromotionChecker::new(storage.clone(), storage.clone(), vec![], bus.clone());

        let scheduler = CheckScheduler::new(
            config,
            SchedulerContext {
                resources: resources.clone(),
                delivery_configs: storage.clone(),
                actuator: Arc::new(actuator),
                promotion: Arc::new(promotion),
                publisher: bus.clone(),
            },
        );

        Fixture {
            storage,
            resources,
            handler,
            bus,
            scheduler,
        }
    }

    fn batch_config(batch: usize) -> SchedulerConfig {
        SchedulerConfig {
            resource_check_interval_ms: 10,
            environment_check_interval_ms: 10,
            resource_batch_size: batch,
            environment_batch_size: batch,
            ..Default::default()
        }
    }

    async fn widget(storage: &InMemoryStorage, name: &str) -> UntypedResource {
        ResourceRepository::store(
            storage,
            Resource::new(widget_kind(), name, ResourceMetadata::for_application("fnord"), json!({ "size": 1 })),
        )
        .await
        .unwrap()
    }

    async fn history(storage: &InMemoryStorage, id: &ResourceId) -> Vec<ResourceEventKind> {
        let mut events = storage.event_history(id, usize::MAX).await.unwrap();
        events.reverse();
        events.into_iter().map(|e| e.kind()).collect()
    }

    #[tokio::test]
    async fn test_ticks_do_nothing_until_up() {
        let fixture = fixture(batch_config(10));
        widget(&fixture.storage, "a").await;

        assert_eq!(fixture.scheduler.check_resources().await.unwrap(), TickOutcome::Disabled);
        assert_eq!(fixture.scheduler.check_environments().await.unwrap(), TickOutcome::Disabled);
        assert_eq!(fixture.resources.due_queries.load(Ordering::SeqCst), 0);
        assert_eq!(fixture.handler.creates.load(Ordering::SeqCst), 0);

        fixture.scheduler.on_application_event(ApplicationEvent::Up);
        assert!(matches!(
            fixture.scheduler.check_resources().await.unwrap(),
            TickOutcome::Completed(TickSummary { checked: 1, .. })
        ));
        assert_eq!(fixture.resources.due_queries.load(Ordering::SeqCst), 1);
        assert_eq!(fixture.handler.creates.load(Ordering::SeqCst), 1);

        fixture.scheduler.on_application_event(ApplicationEvent::Down);
        assert_eq!(fixture.scheduler.check_resources().await.unwrap(), TickOutcome::Disabled);
        assert_eq!(fixture.resources.due_queries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failing_resource_does_not_stop_the_batch() {
        let fixture = fixture(batch_config(10));
        let broken = widget(&fixture.storage, "broken-a").await;
        let healthy = widget(&fixture.storage, "b").await;
        fixture.scheduler.on_application_event(ApplicationEvent::Up);

        let outcome = fixture.scheduler.check_resources().await.unwrap();

        assert_eq!(outcome, TickOutcome::Completed(TickSummary { checked: 2, failed: 0 }));
        assert_eq!(history(&fixture.storage, &broken.id).await, vec![ResourceEventKind::CheckError]);
        assert_eq!(
            history(&fixture.storage, &healthy.id).await,
            vec![ResourceEventKind::Missing, ResourceEventKind::ActuationLaunched]
        );
    }

    #[tokio::test]
    async fn test_resource_tick_respects_batch_size_and_min_age() {
        let fixture = fixture(batch_config(2));
        for name in ["a", "b", "c"] {
            widget(&fixture.storage, name).await;
        }
        fixture.scheduler.on_application_event(ApplicationEvent::Up);

        let summaries: Vec<_> = [
            fixture.scheduler.check_resources().await.unwrap(),
            fixture.scheduler.check_resources().await.unwrap(),
            fixture.scheduler.check_resources().await.unwrap(),
        ]
        .into_iter()
        .map(|outcome| match outcome {
            TickOutcome::Completed(summary) => summary.checked,
            TickOutcome::Disabled => usize::MAX,
        })
        .collect();

        assert_eq!(summaries, vec![2, 1, 0]);
        assert_eq!(fixture.handler.creates.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_environment_failures_are_reported_and_isolated() {
        let fixture = fixture(batch_config(10));
        let artifact = DeliveryArtifact::new("fnord", "docker", "fnord-image");
        fixture.storage.store_version(&artifact, "1.0").await.unwrap();

        let healthy = DeliveryConfig::new("fnord-manifest", "fnord")
            .with_artifact(artifact.clone())
            .with_environment(Environment::new("test"));
        let broken = DeliveryConfig::new("other-manifest", "other")
            .with_artifact(artifact.clone())
            .with_environment(
                Environment::new("prod").with_constraint(Constraint::new("manual-judgement", json!({}))),
            );
        for config in [healthy.clone(), broken] {
            DeliveryConfigRepository::store(fixture.storage.as_ref(), config).await.unwrap();
        }

        let mut events = fixture.bus.subscribe();
        fixture.scheduler.on_application_event(ApplicationEvent::Up);
        let outcome = fixture.scheduler.check_environments().await.unwrap();

        assert_eq!(outcome, TickOutcome::Completed(TickSummary { checked: 2, failed: 1 }));
        assert_eq!(
            fixture
                .storage
                .latest_approved_version_in(&healthy, &artifact, "test")
                .await
                .unwrap(),
            Some("1.0".to_string())
        );

        let mut failed = Vec::new();
        let mut first = None;
        while let Ok(envelope) = events.try_recv() {
            first.get_or_insert_with(|| envelope.event.clone());
            if let ReconcileEvent::Telemetry(TelemetryEvent::EnvironmentCheckFailed { delivery_config, .. }) =
                envelope.event
            {
                failed.push(delivery_config);
            }
        }
        assert_eq!(failed, vec!["other-manifest".to_string()]);
        assert!(matches!(
            first,
            Some(ReconcileEvent::Telemetry(TelemetryEvent::EnvironmentCheckStarting))
        ));

        // Both configs were stamped as checked
        let last_checked: Option<DateTime<Utc>> = fixture.storage.last_checked("other-manifest").await.unwrap();
        assert!(last_checked.is_some());
    }

    #[tokio::test]
    async fn test_started_scheduler_follows_lifecycle() {
        let fixture = fixture(batch_config(10));
        widget(&fixture.storage, "a").await;
        let lifecycle = crate::lifecycle::Lifecycle::new();

        let tasks = fixture.scheduler.start(lifecycle.subscribe());
        lifecycle.signal(ApplicationEvent::Up);

        tokio::time::timeout(Duration::from_secs(5), async {
            while fixture.handler.creates.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(fixture.scheduler.is_enabled());

        lifecycle.signal(ApplicationEvent::Down);
        tokio::time::timeout(Duration::from_secs(5), async {
            while fixture.scheduler.is_enabled() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        fixture.scheduler.stop();
        for task in tasks {
            tokio_test::assert_ok!(task.await);
        }
    }

    #[test]
    fn test_millis_saturate() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }
}
