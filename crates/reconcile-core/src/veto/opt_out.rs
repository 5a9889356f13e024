//! Applications opted out of actuation

use super::Veto;
use async_trait::async_trait;
use dashmap::DashMap;
use reconcile_types::{UntypedResource, VetoResponse};

/// Denies actuation for resources of opted-out applications
#[derive(Debug, Default)]
pub struct ApplicationOptOutVeto {
    opted_out: DashMap<String, String>,
}

impl ApplicationOptOutVeto {
    pub const NAME: &'static str = "ApplicationOptOutVeto";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn opt_out(&self, application: impl Into<String>, reason: impl Into<String>) {
        self.opted_out.insert(application.into(), reason.into());
    }

    pub fn opt_in(&self, application: &str) -> bool {
        self.opted_out.remove(application).is_some()
    }
}

#[async_trait]
impl Veto for ApplicationOptOutVeto {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn check(&self, resource: &UntypedResource) -> VetoResponse {
        match self.opted_out.get(resource.application()) {
            Some(reason) => VetoResponse::denied(
                Self::NAME,
                format!(
                    "Application {} has opted out of actuation: {}",
                    resource.application(),
                    reason.value()
                ),
            ),
            None => VetoResponse::allowed(),
        }
    }
}
