#![allow(dead_code)]

use async_trait::async_trait;
use reconcile_core::storage::InMemoryStorage;
use reconcile_core::storage::ResourceRepository;
use reconcile_core::{
    ActuationPauser, ActuatorContext, ConstraintError, ConstraintEvaluator, EventBus,
    HandlerError, HandlerRegistry, HandlerResult, ResourceActuator, ResourceHandler,
    ResourcePersister, VetoEnforcer,
};
use reconcile_types::{
    DeliveryArtifact, DeliveryConfig, EventEnvelope, ReconcileEvent, Resource, ResourceDiff,
    ResourceEventKind, ResourceId, ResourceKind, ResourceMetadata, SubmittedResource, Task,
    TelemetryEvent, UntypedResource,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

pub const API_VERSION: &str = "test.reconcile/v1";

pub fn widget_kind() -> ResourceKind {
    ResourceKind::new(API_VERSION, "widget")
}

pub fn submitted(name: &str, spec: Value) -> SubmittedResource {
    SubmittedResource::new(widget_kind(), name, ResourceMetadata::for_application("fnord"), spec)
}

#[derive(Default)]
struct FakeState {
    current: HashMap<String, Value>,
    failing: HashSet<String>,
    failing_desired: HashSet<String>,
    unresolvable: HashSet<String>,
    in_progress: bool,
    decline: Option<String>,
    update_tasks: Option<Vec<Task>>,
}

/// Widget handler whose observed state is scripted by the test
#[derive(Default)]
pub struct FakeHandler {
    kind: Option<ResourceKind>,
    state: Mutex<FakeState>,
    creates: AtomicUsize,
    updates: AtomicUsize,
    deletes: AtomicUsize,
}

impl FakeHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A handler for `kind` instead of widgets
    pub fn for_kind(kind: ResourceKind) -> Arc<Self> {
        Arc::new(Self {
            kind: Some(kind),
            ..Self::default()
        })
    }

    pub fn set_current(&self, name: &str, current: Option<Value>) {
        let mut state = self.state.lock().unwrap();
        match current {
            Some(value) => state.current.insert(name.to_string(), value),
            None => state.current.remove(name),
        };
    }

    pub fn fail(&self, name: &str) {
        self.state.lock().unwrap().failing.insert(name.to_string());
    }

    pub fn fail_desired(&self, name: &str) {
        self.state.lock().unwrap().failing_desired.insert(name.to_string());
    }

    pub fn make_unresolvable(&self, name: &str) {
        self.state.lock().unwrap().unresolvable.insert(name.to_string());
    }

    pub fn set_in_progress(&self, in_progress: bool) {
        self.state.lock().unwrap().in_progress = in_progress;
    }

    pub fn decline(&self, message: &str) {
        self.state.lock().unwrap().decline = Some(message.to_string());
    }

    pub fn update_returns(&self, tasks: Vec<Task>) {
        self.state.lock().unwrap().update_tasks = Some(tasks);
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceHandler for FakeHandler {
    type Spec = Value;
    type Resolved = Value;

    fn name(&self) -> &str {
        "fake-widget-handler"
    }

    fn supported_kind(&self) -> ResourceKind {
        self.kind.clone().unwrap_or_else(widget_kind)
    }

    async fn normalize(&self, mut resource: Resource<Value>) -> HandlerResult<Resource<Value>> {
        if let Value::Object(spec) = &mut resource.spec {
            spec.entry("size").or_insert(Value::from(1));
        }
        Ok(resource)
    }

    async fn desired(&self, resource: &Resource<Value>) -> HandlerResult<Value> {
        if self.state.lock().unwrap().failing_desired.contains(&resource.name) {
            return Err(anyhow::anyhow!("image tag does not resolve").into());
        }
        Ok(resource.spec.clone())
    }

    async fn current(&self, resource: &Resource<Value>) -> HandlerResult<Option<Value>> {
        let state = self.state.lock().unwrap();
        if state.unresolvable.contains(&resource.name) {
            return Err(HandlerError::unresolvable("upstream image not published yet"));
        }
        if state.failing.contains(&resource.name) {
            return Err(anyhow::anyhow!("cloud provider returned 500").into());
        }
        Ok(state.current.get(&resource.name).cloned())
    }

    async fn will_take_action(
        &self,
        _resource: &Resource<Value>,
        _diff: &ResourceDiff<Value>,
    ) -> HandlerResult<reconcile_core::ActionDecision> {
        let state = self.state.lock().unwrap();
        Ok(match &state.decline {
            Some(message) => reconcile_core::ActionDecision::decline(message.clone()),
            None => reconcile_core::ActionDecision::act(),
        })
    }

    async fn create(&self, resource: &Resource<Value>, _diff: &ResourceDiff<Value>) -> HandlerResult<Vec<Task>> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(vec![Task::new(format!("create-{}", resource.name), format!("Create widget {}", resource.name))])
    }

    async fn update(&self, resource: &Resource<Value>, _diff: &ResourceDiff<Value>) -> HandlerResult<Vec<Task>> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        Ok(state.update_tasks.clone().unwrap_or_else(|| {
            vec![Task::new(format!("update-{}", resource.name), format!("Update widget {}", resource.name))]
        }))
    }

    async fn delete(&self, _resource: &Resource<Value>) -> HandlerResult<Vec<Task>> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(vec![])
    }

    async fn actuation_in_progress(&self, _resource: &Resource<Value>) -> HandlerResult<bool> {
        Ok(self.state.lock().unwrap().in_progress)
    }
}

/// `allow-list` constraint: only the listed versions may be promoted
#[derive(Default)]
pub struct AllowListEvaluator {
    allowed: Mutex<HashSet<String>>,
    calls: AtomicUsize,
}

impl AllowListEvaluator {
    pub const CONSTRAINT_TYPE: &'static str = "allow-list";

    pub fn allowing(versions: &[&str]) -> Arc<Self> {
        let evaluator = Self::default();
        evaluator
            .allowed
            .lock()
            .unwrap()
            .extend(versions.iter().map(|v| v.to_string()));
        Arc::new(evaluator)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConstraintEvaluator for AllowListEvaluator {
    fn supported_type(&self) -> &str {
        Self::CONSTRAINT_TYPE
    }

    async fn can_promote(
        &self,
        _artifact: &DeliveryArtifact,
        version: &str,
        _delivery_config: &DeliveryConfig,
        _environment_name: &str,
    ) -> Result<bool, ConstraintError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.allowed.lock().unwrap().contains(version))
    }
}

/// Fully wired engine over in-memory storage
pub struct Harness {
    pub storage: Arc<InMemoryStorage>,
    pub bus: Arc<EventBus>,
    pub handler: Arc<FakeHandler>,
    pub handlers: Arc<HandlerRegistry>,
    pub vetoes: Arc<VetoEnforcer>,
    pub pauser: Arc<ActuationPauser>,
    pub actuator: ResourceActuator,
    pub persister: ResourcePersister,
    events: broadcast::Receiver<EventEnvelope>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_handlers(Vec::new())
    }

    /// Register `extra` handlers next to the widget handler
    pub fn with_handlers(extra: Vec<Arc<FakeHandler>>) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let storage = Arc::new(InMemoryStorage::new());
        let bus = Arc::new(EventBus::new(storage.clone()));
        let events = bus.subscribe();
        let handler = FakeHandler::new();

        let mut registry = HandlerRegistry::new();
        registry.register_shared(handler.clone()).unwrap();
        for extra in extra {
            registry.register_shared(extra).unwrap();
        }
        let handlers = Arc::new(registry);

        let vetoes = Arc::new(VetoEnforcer::new());
        let pauser = Arc::new(ActuationPauser::new(storage.clone(), bus.clone()));
        let actuator = ResourceActuator::new(ActuatorContext {
            resources: storage.clone(),
            delivery_configs: storage.clone(),
            fingerprints: storage.clone(),
            handlers: handlers.clone(),
            pauser: pauser.clone(),
            vetoes: vetoes.clone(),
            publisher: bus.clone(),
        });
        let persister = ResourcePersister::new(storage.clone(), handlers.clone(), bus.clone());

        Self {
            storage,
            bus,
            handler,
            handlers,
            vetoes,
            pauser,
            actuator,
            persister,
            events,
        }
    }

    /// Create a widget through the persister and forget the resulting events
    pub async fn widget(&mut self, name: &str, spec: Value) -> UntypedResource {
        let resource = self.persister.create(submitted(name, spec)).await.unwrap();
        self.drain();
        resource
    }

    /// Reload a resource from storage
    pub async fn reload(&self, id: &ResourceId) -> UntypedResource {
        ResourceRepository::get(self.storage.as_ref(), id).await.unwrap().unwrap()
    }

    /// History kinds, oldest first
    pub async fn history(&self, id: &ResourceId) -> Vec<ResourceEventKind> {
        let mut events = self.storage.event_history(id, usize::MAX).await.unwrap();
        events.reverse();
        events.into_iter().map(|e| e.kind()).collect()
    }

    /// Events broadcast since the last drain
    pub fn drain(&mut self) -> Vec<ReconcileEvent> {
        let mut drained = Vec::new();
        while let Ok(envelope) = self.events.try_recv() {
            drained.push(envelope.event);
        }
        drained
    }

    /// Skip reasons among drained events
    pub fn skips(events: &[ReconcileEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|event| match event {
                ReconcileEvent::Telemetry(TelemetryEvent::ResourceCheckSkipped { skipper, .. }) => {
                    Some(skipper.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Resource history kinds among drained events
    pub fn resource_kinds(events: &[ReconcileEvent]) -> Vec<ResourceEventKind> {
        events
            .iter()
            .filter_map(|event| match event {
                ReconcileEvent::Resource(e) => Some(e.kind()),
                _ => None,
            })
            .collect()
    }
}
