//! Promotion constraint evaluators
//!
//! An evaluator is consulted only for environments that declare a
//! constraint of its type.

mod allowed_times;
mod depends_on;

pub use allowed_times::{AllowedTimesConstraintEvaluator, TimeWindow};
pub use depends_on::DependsOnConstraintEvaluator;

use crate::error::ConstraintError;
use async_trait::async_trait;
use reconcile_types::{DeliveryArtifact, DeliveryConfig};

/// Decides whether a version may be promoted into an environment
#[async_trait]
pub trait ConstraintEvaluator: Send + Sync {
    /// The constraint type this evaluator handles
    fn supported_type(&self) -> &str;

    async fn can_promote(
        &self,
        artifact: &DeliveryArtifact,
        version: &str,
        delivery_config: &DeliveryConfig,
        environment_name: &str,
    ) -> Result<bool, ConstraintError>;
}
