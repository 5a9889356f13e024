//! Vetoes that can stop actuation of a resource
//!
//! The [`VetoEnforcer`] consults every registered [`Veto`] in order and
//! returns the first denial.

mod opt_out;
mod unhappy;

pub use opt_out::ApplicationOptOutVeto;
pub use unhappy::UnhappyVeto;

use async_trait::async_trait;
use reconcile_types::{UntypedResource, VetoResponse};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// A policy that may deny actuation of a resource
#[async_trait]
pub trait Veto: Send + Sync {
    /// Veto name, reported on denial
    fn name(&self) -> &str;

    async fn check(&self, resource: &UntypedResource) -> VetoResponse;
}

/// Runs all registered vetoes
pub struct VetoEnforcer {
    vetoes: Arc<RwLock<Vec<Arc<dyn Veto>>>>,
}

impl Default for VetoEnforcer {
    fn default() -> Self {
        Self::new()
    }
}

impl VetoEnforcer {
    /// Create an enforcer that allows everything
    pub fn new() -> Self {
        Self::with_vetoes(Vec::new())
    }

    /// Create with custom vetoes
    pub fn with_vetoes(vetoes: Vec<Arc<dyn Veto>>) -> Self {
        Self {
            vetoes: Arc::new(RwLock::new(vetoes)),
        }
    }

    /// Add a veto
    pub async fn add_veto(&self, veto: Arc<dyn Veto>) {
        let mut vetoes = self.vetoes.write().await;
        vetoes.push(veto);
    }

    /// Remove a veto by name
    pub async fn remove_veto(&self, name: &str) -> bool {
        let mut vetoes = self.vetoes.write().await;
        let len_before = vetoes.len();
        vetoes.retain(|v| v.name() != name);
        vetoes.len() < len_before
    }

    /// List all veto names
    pub async fn list_vetoes(&self) -> Vec<String> {
        let vetoes = self.vetoes.read().await;
        vetoes.iter().map(|v| v.name().to_string()).collect()
    }

    /// Decide whether the resource may be actuated
    pub async fn can_check(&self, resource: &UntypedResource) -> VetoResponse {
        let vetoes = self.vetoes.read().await;

        for veto in vetoes.iter() {
            let mut response = veto.check(resource).await;
            if !response.allowed {
                response.veto_name.get_or_insert_with(|| veto.name().to_string());
                info!(
                    resource_id = %resource.id,
                    veto = response.veto_name_or_default(),
                    reason = response.message.as_deref().unwrap_or_default(),
                    "Veto denied actuation"
                );
                return response;
            }
        }

        debug!(resource_id = %resource.id, "No veto denied actuation");
        VetoResponse::allowed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconcile_types::{Resource, ResourceKind, ResourceMetadata};
    use serde_json::json;

    struct AllowAll;

    #[async_trait]
    impl Veto for AllowAll {
        fn name(&self) -> &str {
            "allow-all"
        }

        async fn check(&self, _resource: &UntypedResource) -> VetoResponse {
            VetoResponse::allowed()
        }
    }

    struct DenyAll;

    #[async_trait]
    impl Veto for DenyAll {
        fn name(&self) -> &str {
            "deny-all"
        }

        async fn check(&self, _resource: &UntypedResource) -> VetoResponse {
            VetoResponse {
                allowed: false,
                veto_name: None,
                message: Some("nope".into()),
                suppress_event: false,
            }
        }
    }

    fn resource() -> UntypedResource {
        Resource::new(
            ResourceKind::new("ec2.aws/v1", "cluster"),
            "fnord-main",
            ResourceMetadata::for_application("fnord"),
            json!({}),
        )
    }

    #[tokio::test]
    async fn test_empty_enforcer_allows() {
        assert!(VetoEnforcer::new().can_check(&resource()).await.allowed);
    }

    #[tokio::test]
    async fn test_first_denial_wins_and_is_named() {
        let enforcer = VetoEnforcer::with_vetoes(vec![Arc::new(AllowAll), Arc::new(DenyAll)]);

        let response = enforcer.can_check(&resource()).await;
        assert!(!response.allowed);
        assert_eq!(response.veto_name.as_deref(), Some("deny-all"));
        assert_eq!(response.message.as_deref(), Some("nope"));
    }

    #[tokio::test]
    async fn test_add_remove_veto() {
        let enforcer = VetoEnforcer::with_vetoes(vec![Arc::new(AllowAll)]);
        assert_eq!(enforcer.list_vetoes().await.len(), 1);

        enforcer.add_veto(Arc::new(DenyAll)).await;
        assert!(!enforcer.can_check(&resource()).await.allowed);

        assert!(enforcer.remove_veto("deny-all").await);
        assert!(enforcer.can_check(&resource()).await.allowed);
    }
}
