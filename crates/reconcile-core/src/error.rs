//! Error types for the reconciliation engine

use reconcile_types::{ResourceId, ResourceKind};
use thiserror::Error;

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type for handler operations
pub type HandlerResult<T> = Result<T, HandlerError>;

/// Storage-specific errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Item not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflict (e.g., already exists)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Invalid data
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Backend failure
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Errors raised by resource handlers
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The resource cannot be resolved right now; retried next cycle
    #[error("Currently unresolvable: {0}")]
    CurrentlyUnresolvable(String),

    /// The stored spec does not decode into the handler's spec type
    #[error("Invalid spec: {0}")]
    InvalidSpec(#[from] serde_json::Error),

    /// Any other failure
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl HandlerError {
    pub fn unresolvable(reason: impl Into<String>) -> Self {
        Self::CurrentlyUnresolvable(reason.into())
    }

    pub fn is_unresolvable(&self) -> bool {
        matches!(self, Self::CurrentlyUnresolvable(_))
    }
}

/// Handler registry errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// No handler supports the kind
    #[error("No resource handler supports {0}")]
    UnsupportedKind(ResourceKind),

    /// Two handlers claim the same kind
    #[error("A resource handler for {0} is already registered")]
    DuplicateHandler(ResourceKind),
}

/// Failure of a single resource check
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("Resource {id} is currently unresolvable: {reason}")]
    CurrentlyUnresolvable { id: ResourceId, reason: String },

    #[error("Unable to resolve desired state of {id}: {source}")]
    CannotResolveDesiredState {
        id: ResourceId,
        #[source]
        source: HandlerError,
    },

    #[error("Unable to resolve current state of {id}: {source}")]
    CannotResolveCurrentState {
        id: ResourceId,
        #[source]
        source: HandlerError,
    },

    #[error("Handler {operation} failed for {id}: {source}")]
    Handler {
        id: ResourceId,
        operation: &'static str,
        #[source]
        source: HandlerError,
    },

    #[error("Unable to diff {id}: {source}")]
    Diff {
        id: ResourceId,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl CheckError {
    /// Wrap a handler failure, keeping unresolvable failures distinguishable
    pub fn handler(id: &ResourceId, operation: &'static str, source: HandlerError) -> Self {
        match source {
            HandlerError::CurrentlyUnresolvable(reason) => Self::CurrentlyUnresolvable {
                id: id.clone(),
                reason,
            },
            source => Self::Handler {
                id: id.clone(),
                operation,
                source,
            },
        }
    }

    pub fn is_unresolvable(&self) -> bool {
        matches!(self, Self::CurrentlyUnresolvable { .. })
    }
}

/// Errors returned by the resource persister
#[derive(Debug, Error)]
pub enum PersistError {
    /// No stored resource with this id
    #[error("Resource not found: {0}")]
    NotFound(ResourceId),

    /// A resource with this id is already stored
    #[error("Resource already exists: {0}")]
    AlreadyExists(ResourceId),

    /// The submission would be stored under a different id
    #[error("Submitted resource {submitted} does not match {expected}")]
    IdentityMismatch {
        expected: ResourceId,
        submitted: ResourceId,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Normalization failed: {0}")]
    Handler(#[from] HandlerError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors raised by constraint evaluators
#[derive(Debug, Error)]
pub enum ConstraintError {
    #[error("Invalid attributes for {constraint_type} constraint: {source}")]
    InvalidAttributes {
        constraint_type: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid {constraint_type} constraint: {reason}")]
    Invalid {
        constraint_type: String,
        reason: String,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors raised while checking the environments of a delivery config
#[derive(Debug, Error)]
pub enum PromotionError {
    #[error(
        "No version of {artifact} can be promoted to {environment} in {delivery_config}"
    )]
    NoVersionSatisfiesConstraints {
        delivery_config: String,
        environment: String,
        artifact: String,
    },

    #[error("Environment {environment} declares a {constraint_type} constraint but no evaluator supports it")]
    UnsupportedConstraint {
        environment: String,
        constraint_type: String,
    },

    #[error(transparent)]
    Constraint(#[from] ConstraintError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unresolvable_handler_failure_is_classified() {
        let id = ResourceId::new("ec2.aws:cluster:fnord-main");

        let err = CheckError::handler(&id, "current", HandlerError::unresolvable("image not published"));
        assert!(err.is_unresolvable());

        let err = CheckError::handler(&id, "update", anyhow::anyhow!("rate limited").into());
        assert!(!err.is_unresolvable());
        assert!(err.to_string().contains("Handler update failed"));
    }
}
