//! Resource handler plugin contract and registry
//!
//! Handlers are written against their own spec and resolved-state types.
//! The [`HandlerRegistry`] selects a handler by exact (apiVersion, kind) and
//! is the only place where a stored, untyped resource is decoded into a
//! handler's spec type. Everything past that point stays typed inside the
//! handler's adapter; the engine only sees the erased views
//! [`BoundResource`] and [`ResolvedResource`].

use crate::error::{CheckError, HandlerError, HandlerResult, RegistryError};
use async_trait::async_trait;
use reconcile_types::{
    Resource, ResourceDiff, ResourceId, ResourceKind, ResourceSpec, Task, UntypedResource,
};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::fmt::Debug;
use std::sync::Arc;

/// A handler's verdict on whether it will act on a diff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionDecision {
    pub will_act: bool,
    pub message: Option<String>,
}

impl ActionDecision {
    pub fn act() -> Self {
        Self {
            will_act: true,
            message: None,
        }
    }

    pub fn decline(message: impl Into<String>) -> Self {
        Self {
            will_act: false,
            message: Some(message.into()),
        }
    }
}

/// Per-kind logic to resolve and actuate a resource
#[async_trait]
pub trait ResourceHandler: Send + Sync + 'static {
    /// Declared spec type
    type Spec: ResourceSpec;

    /// Resolved state compared between desired and current
    type Resolved: Serialize + Clone + Debug + Send + Sync + 'static;

    /// Plugin name, recorded on ActuationLaunched
    fn name(&self) -> &str;

    /// The kind this handler is registered under
    fn supported_kind(&self) -> ResourceKind;

    /// Apply defaults to a submitted resource before it is stored
    async fn normalize(&self, resource: Resource<Self::Spec>) -> HandlerResult<Resource<Self::Spec>> {
        Ok(resource)
    }

    async fn desired(&self, resource: &Resource<Self::Spec>) -> HandlerResult<Self::Resolved>;

    /// `None` when the resource does not exist
    async fn current(&self, resource: &Resource<Self::Spec>) -> HandlerResult<Option<Self::Resolved>>;

    async fn will_take_action(
        &self,
        _resource: &Resource<Self::Spec>,
        _diff: &ResourceDiff<Self::Resolved>,
    ) -> HandlerResult<ActionDecision> {
        Ok(ActionDecision::act())
    }

    async fn create(
        &self,
        resource: &Resource<Self::Spec>,
        diff: &ResourceDiff<Self::Resolved>,
    ) -> HandlerResult<Vec<Task>>;

    async fn update(
        &self,
        resource: &Resource<Self::Spec>,
        diff: &ResourceDiff<Self::Resolved>,
    ) -> HandlerResult<Vec<Task>>;

    async fn delete(&self, resource: &Resource<Self::Spec>) -> HandlerResult<Vec<Task>>;

    /// Whether a previously launched actuation is still running
    async fn actuation_in_progress(&self, _resource: &Resource<Self::Spec>) -> HandlerResult<bool> {
        Ok(false)
    }
}

/// Object-safe view of a registered handler
#[async_trait]
pub trait ErasedHandler: Send + Sync {
    fn name(&self) -> &str;

    fn supported_kind(&self) -> ResourceKind;

    async fn normalize(&self, resource: UntypedResource) -> HandlerResult<UntypedResource>;

    /// Decode a stored resource for this handler
    fn bind(&self, resource: &UntypedResource) -> HandlerResult<Box<dyn BoundResource>>;
}

/// A stored resource decoded for its handler
#[async_trait]
pub trait BoundResource: Send + Sync {
    async fn actuation_in_progress(&self) -> HandlerResult<bool>;

    /// Resolve desired and current state concurrently and diff them
    async fn resolve(&self) -> Result<Box<dyn ResolvedResource>, CheckError>;

    async fn delete(&self) -> HandlerResult<Vec<Task>>;
}

/// A resource with its computed diff
#[async_trait]
pub trait ResolvedResource: Send + Sync {
    /// The resource does not exist yet
    fn is_missing(&self) -> bool;

    fn has_changes(&self) -> bool;

    fn delta_json(&self) -> serde_json::Value;

    fn to_debug(&self) -> String;

    fn fingerprint(&self) -> String;

    async fn will_take_action(&self) -> HandlerResult<ActionDecision>;

    async fn create(&self) -> HandlerResult<Vec<Task>>;

    async fn update(&self) -> HandlerResult<Vec<Task>>;
}

struct HandlerAdapter<H> {
    handler: Arc<H>,
}

#[async_trait]
impl<H: ResourceHandler> ErasedHandler for HandlerAdapter<H> {
    fn name(&self) -> &str {
        self.handler.name()
    }

    fn supported_kind(&self) -> ResourceKind {
        self.handler.supported_kind()
    }

    async fn normalize(&self, resource: UntypedResource) -> HandlerResult<UntypedResource> {
        let typed = resource.typed::<H::Spec>()?;
        let normalized = self.handler.normalize(typed).await?;
        Ok(normalized.to_untyped()?)
    }

    fn bind(&self, resource: &UntypedResource) -> HandlerResult<Box<dyn BoundResource>> {
        let typed = resource.typed::<H::Spec>()?;
        Ok(Box::new(Bound {
            handler: Arc::clone(&self.handler),
            resource: Arc::new(typed),
        }))
    }
}

struct Bound<H: ResourceHandler> {
    handler: Arc<H>,
    resource: Arc<Resource<H::Spec>>,
}

#[async_trait]
impl<H: ResourceHandler> BoundResource for Bound<H> {
    async fn actuation_in_progress(&self) -> HandlerResult<bool> {
        self.handler.actuation_in_progress(self.resource.as_ref()).await
    }

    async fn resolve(&self) -> Result<Box<dyn ResolvedResource>, CheckError> {
        let id = &self.resource.id;
        let (desired, current) = tokio::join!(
            self.handler.desired(self.resource.as_ref()),
            self.handler.current(self.resource.as_ref())
        );

        let desired = desired.map_err(|source| resolution_error(id, source, Side::Desired))?;
        let current = current.map_err(|source| resolution_error(id, source, Side::Current))?;
        let diff = ResourceDiff::new(desired, current).map_err(|source| CheckError::Diff {
            id: id.clone(),
            source,
        })?;

        Ok(Box::new(Resolved {
            handler: Arc::clone(&self.handler),
            resource: Arc::clone(&self.resource),
            diff,
        }))
    }

    async fn delete(&self) -> HandlerResult<Vec<Task>> {
        self.handler.delete(self.resource.as_ref()).await
    }
}

enum Side {
    Desired,
    Current,
}

fn resolution_error(id: &ResourceId, source: HandlerError, side: Side) -> CheckError {
    match (source, side) {
        (HandlerError::CurrentlyUnresolvable(reason), _) => CheckError::CurrentlyUnresolvable {
            id: id.clone(),
            reason,
        },
        (source, Side::Desired) => CheckError::CannotResolveDesiredState {
            id: id.clone(),
            source,
        },
        (source, Side::Current) => CheckError::CannotResolveCurrentState {
            id: id.clone(),
            source,
        },
    }
}

struct Resolved<H: ResourceHandler> {
    handler: Arc<H>,
    resource: Arc<Resource<H::Spec>>,
    diff: ResourceDiff<H::Resolved>,
}

#[async_trait]
impl<H: ResourceHandler> ResolvedResource for Resolved<H> {
    fn is_missing(&self) -> bool {
        self.diff.current().is_none()
    }

    fn has_changes(&self) -> bool {
        self.diff.has_changes()
    }

    fn delta_json(&self) -> serde_json::Value {
        self.diff.to_delta_json()
    }

    fn to_debug(&self) -> String {
        self.diff.to_debug()
    }

    fn fingerprint(&self) -> String {
        self.diff.fingerprint()
    }

    async fn will_take_action(&self) -> HandlerResult<ActionDecision> {
        self.handler
            .will_take_action(self.resource.as_ref(), &self.diff)
            .await
    }

    async fn create(&self) -> HandlerResult<Vec<Task>> {
        self.handler.create(self.resource.as_ref(), &self.diff).await
    }

    async fn update(&self) -> HandlerResult<Vec<Task>> {
        self.handler.update(self.resource.as_ref(), &self.diff).await
    }
}

/// Registry of resource handlers keyed by (apiVersion, kind)
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<ResourceKind, Arc<dyn ErasedHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler
    pub fn register<H: ResourceHandler>(&mut self, handler: H) -> Result<(), RegistryError> {
        self.register_shared(Arc::new(handler))
    }

    /// Register a handler the caller keeps a handle to
    pub fn register_shared<H: ResourceHandler>(&mut self, handler: Arc<H>) -> Result<(), RegistryError> {
        let kind = handler.supported_kind();
        if self.handlers.contains_key(&kind) {
            return Err(RegistryError::DuplicateHandler(kind));
        }
        tracing::debug!(kind = %kind, handler = handler.name(), "Registered resource handler");
        self.handlers.insert(kind, Arc::new(HandlerAdapter { handler }));
        Ok(())
    }

    /// Builder-style registration
    pub fn with_handler<H: ResourceHandler>(mut self, handler: H) -> Result<Self, RegistryError> {
        self.register(handler)?;
        Ok(self)
    }

    /// The handler for a kind
    pub fn supporting(&self, kind: &ResourceKind) -> Result<Arc<dyn ErasedHandler>, RegistryError> {
        self.handlers
            .get(kind)
            .cloned()
            .ok_or_else(|| RegistryError::UnsupportedKind(kind.clone()))
    }

    /// All supported kinds
    pub fn kinds(&self) -> Vec<ResourceKind> {
        let mut kinds: Vec<_> = self.handlers.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
