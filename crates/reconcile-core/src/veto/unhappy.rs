//! Veto for resources that actuation has not been able to fix

use super::Veto;
use crate::clock::{Clock, SystemClock};
use crate::storage::DiffFingerprintRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use reconcile_types::{ResourceId, UntypedResource, VetoResponse};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Denies actuation once the same diff has survived `max_diff_count`
/// actuations, then lets one attempt through every `wait`.
///
/// Denials are recorded as skips only; no ActuationVetoed event is published.
pub struct UnhappyVeto {
    fingerprints: Arc<dyn DiffFingerprintRepository>,
    clock: Arc<dyn Clock>,
    max_diff_count: u32,
    wait: chrono::Duration,
    recheck_after: DashMap<ResourceId, DateTime<Utc>>,
}

impl UnhappyVeto {
    pub const NAME: &'static str = "UnhappyVeto";

    pub fn new(fingerprints: Arc<dyn DiffFingerprintRepository>, max_diff_count: u32, wait: Duration) -> Self {
        Self {
            fingerprints,
            clock: Arc::new(SystemClock),
            max_diff_count,
            wait: chrono::Duration::from_std(wait).unwrap_or_else(|_| chrono::Duration::days(1)),
            recheck_after: DashMap::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn deny(&self, recheck_at: DateTime<Utc>) -> VetoResponse {
        VetoResponse::denied(
            Self::NAME,
            format!(
                "Resource is unhappy and our {} actions have not fixed it. \
                 We will try again after {} or if the diff changes.",
                self.max_diff_count, recheck_at
            ),
        )
        .suppressing_event()
    }
}

#[async_trait]
impl Veto for UnhappyVeto {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn check(&self, resource: &UntypedResource) -> VetoResponse {
        let actions = match self.fingerprints.action_taken_count(&resource.id).await {
            Ok(actions) => actions,
            Err(e) => {
                warn!(resource_id = %resource.id, error = %e, "Unable to read diff fingerprint");
                return VetoResponse::allowed();
            }
        };

        if actions < self.max_diff_count {
            self.recheck_after.remove(&resource.id);
            return VetoResponse::allowed();
        }

        let now = self.clock.now();
        let recheck_at = self.recheck_after.get(&resource.id).map(|entry| *entry.value());
        match recheck_at {
            Some(recheck_at) if now < recheck_at => self.deny(recheck_at),
            Some(_) => {
                // Wait elapsed: allow one attempt and start a new wait
                self.recheck_after.insert(resource.id.clone(), now + self.wait);
                VetoResponse::allowed()
            }
            None => {
                let recheck_at = now + self.wait;
                self.recheck_after.insert(resource.id.clone(), recheck_at);
                self.deny(recheck_at)
            }
        }
    }
}
