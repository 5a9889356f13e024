//! In-memory storage implementation

use super::traits::*;
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reconcile_types::{
    DeliveryArtifact, DeliveryConfig, ResourceEvent, ResourceId, UntypedResource,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Never checked
const NEVER: DateTime<Utc> = DateTime::<Utc>::MIN_UTC;

#[derive(Debug, Clone)]
struct Checked<T> {
    item: T,
    last_checked: DateTime<Utc>,
}

type ArtifactKey = (String, String);
type EnvironmentKey = (String, String, String);

/// In-memory storage for development and testing
#[derive(Debug)]
pub struct InMemoryStorage {
    resources: Arc<RwLock<HashMap<ResourceId, Checked<UntypedResource>>>>,
    history: Arc<RwLock<HashMap<ResourceId, Vec<ResourceEvent>>>>,
    delivery_configs: Arc<RwLock<HashMap<String, Checked<DeliveryConfig>>>>,
    versions: Arc<RwLock<HashMap<ArtifactKey, Vec<String>>>>,
    approvals: Arc<RwLock<HashMap<EnvironmentKey, Vec<String>>>>,
    pins: Arc<RwLock<HashMap<EnvironmentKey, String>>>,
    vetoes: Arc<RwLock<HashMap<EnvironmentKey, Vec<String>>>>,
    fingerprints: Arc<RwLock<HashMap<ResourceId, DiffFingerprint>>>,
    paused_applications: Arc<RwLock<HashSet<String>>>,
    paused_resources: Arc<RwLock<HashSet<ResourceId>>>,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    /// Create a new in-memory storage
    pub fn new() -> Self {
        Self {
            resources: Arc::new(RwLock::new(HashMap::new())),
            history: Arc::new(RwLock::new(HashMap::new())),
            delivery_configs: Arc::new(RwLock::new(HashMap::new())),
            versions: Arc::new(RwLock::new(HashMap::new())),
            approvals: Arc::new(RwLock::new(HashMap::new())),
            pins: Arc::new(RwLock::new(HashMap::new())),
            vetoes: Arc::new(RwLock::new(HashMap::new())),
            fingerprints: Arc::new(RwLock::new(HashMap::new())),
            paused_applications: Arc::new(RwLock::new(HashSet::new())),
            paused_resources: Arc::new(RwLock::new(HashSet::new())),
        }
    }
}

fn artifact_key(artifact: &DeliveryArtifact) -> ArtifactKey {
    (artifact.artifact_type.clone(), artifact.name.clone())
}

fn environment_key(
    config: &DeliveryConfig,
    artifact: &DeliveryArtifact,
    environment: &str,
) -> EnvironmentKey {
    (
        config.name.clone(),
        artifact.reference.clone(),
        environment.to_string(),
    )
}

/// Select up to `limit` entries last checked before `now - min_age`, oldest
/// first, and stamp them with `now`.
fn take_due<K, T>(
    entries: &mut HashMap<K, Checked<T>>,
    min_age: Duration,
    limit: usize,
) -> Vec<T>
where
    K: Clone + Eq + std::hash::Hash,
    T: Clone,
{
    let now = Utc::now();
    let cutoff = chrono::Duration::from_std(min_age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(NEVER);

    let mut due: Vec<(K, DateTime<Utc>)> = entries
        .iter()
        .filter(|(_, entry)| entry.last_checked <= cutoff)
        .map(|(key, entry)| (key.clone(), entry.last_checked))
        .collect();
    due.sort_by_key(|(_, last_checked)| *last_checked);
    due.truncate(limit);

    due.into_iter()
        .filter_map(|(key, _)| {
            entries.get_mut(&key).map(|entry| {
                entry.last_checked = now;
                entry.item.clone()
            })
        })
        .collect()
}

#[async_trait]
impl ResourceRepository for InMemoryStorage {
    async fn get(&self, id: &ResourceId) -> StorageResult<Option<UntypedResource>> {
        let resources = self.resources.read().await;
        Ok(resources.get(id).map(|entry| entry.item.clone()))
    }

    async fn store(&self, mut resource: UntypedResource) -> StorageResult<UntypedResource> {
        let mut resources = self.resources.write().await;
        let last_checked = match resources.get(&resource.id) {
            Some(existing) => {
                resource.version = existing.item.version + 1;
                existing.last_checked
            }
            None => {
                resource.version = 1;
                NEVER
            }
        };
        resources.insert(
            resource.id.clone(),
            Checked {
                item: resource.clone(),
                last_checked,
            },
        );
        Ok(resource)
    }

    async fn delete(&self, id: &ResourceId) -> StorageResult<bool> {
        Ok(self.resources.write().await.remove(id).is_some())
    }

    async fn list(&self) -> StorageResult<Vec<UntypedResource>> {
        let resources = self.resources.read().await;
        Ok(resources.values().map(|entry| entry.item.clone()).collect())
    }

    async fn items_due_for_check(
        &self,
        min_age: Duration,
        limit: usize,
    ) -> StorageResult<Vec<UntypedResource>> {
        let mut resources = self.resources.write().await;
        Ok(take_due(&mut resources, min_age, limit))
    }

    async fn mark_check_due(&self, id: &ResourceId) -> StorageResult<()> {
        let mut resources = self.resources.write().await;
        let entry = resources
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(format!("resource {}", id)))?;
        entry.last_checked = NEVER;
        Ok(())
    }

    async fn append_history(&self, event: ResourceEvent) -> StorageResult<()> {
        let mut history = self.history.write().await;
        let events = history.entry(event.resource_id.clone()).or_default();
        if event.detail.ignore_repeated_in_history()
            && events.last().map(|last| last.kind()) == Some(event.kind())
        {
            return Ok(());
        }
        events.push(event);
        Ok(())
    }

    async fn event_history(&self, id: &ResourceId, limit: usize) -> StorageResult<Vec<ResourceEvent>> {
        let history = self.history.read().await;
        Ok(history
            .get(id)
            .map(|events| events.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn last_event(&self, id: &ResourceId) -> StorageResult<Option<ResourceEvent>> {
        let history = self.history.read().await;
        Ok(history.get(id).and_then(|events| events.last().cloned()))
    }
}

#[async_trait]
impl DeliveryConfigRepository for InMemoryStorage {
    async fn get(&self, name: &str) -> StorageResult<Option<DeliveryConfig>> {
        let configs = self.delivery_configs.read().await;
        Ok(configs.get(name).map(|entry| entry.item.clone()))
    }

    async fn store(&self, config: DeliveryConfig) -> StorageResult<()> {
        let mut configs = self.delivery_configs.write().await;
        let last_checked = configs
            .get(&config.name)
            .map(|entry| entry.last_checked)
            .unwrap_or(NEVER);
        configs.insert(
            config.name.clone(),
            Checked {
                item: config,
                last_checked,
            },
        );
        Ok(())
    }

    async fn delete(&self, name: &str) -> StorageResult<bool> {
        let mut configs = self.delivery_configs.write().await;
        Ok(configs.remove(name).is_some())
    }

    async fn delivery_config_for(&self, id: &ResourceId) -> StorageResult<Option<DeliveryConfig>> {
        let configs = self.delivery_configs.read().await;
        Ok(configs
            .values()
            .find(|entry| entry.item.governs(id))
            .map(|entry| entry.item.clone()))
    }

    async fn items_due_for_check(
        &self,
        min_age: Duration,
        limit: usize,
    ) -> StorageResult<Vec<DeliveryConfig>> {
        let mut configs = self.delivery_configs.write().await;
        Ok(take_due(&mut configs, min_age, limit))
    }

    async fn last_checked(&self, name: &str) -> StorageResult<Option<DateTime<Utc>>> {
        let configs = self.delivery_configs.read().await;
        Ok(configs
            .get(name)
            .map(|entry| entry.last_checked)
            .filter(|checked| *checked != NEVER))
    }

    async fn mark_check_due(&self, name: &str) -> StorageResult<()> {
        let mut configs = self.delivery_configs.write().await;
        let entry = configs
            .get_mut(name)
            .ok_or_else(|| StorageError::NotFound(format!("delivery config {}", name)))?;
        entry.last_checked = NEVER;
        Ok(())
    }
}

#[async_trait]
impl ArtifactRepository for InMemoryStorage {
    async fn store_version(&self, artifact: &DeliveryArtifact, version: &str) -> StorageResult<bool> {
        let mut versions = self.versions.write().await;
        let known = versions.entry(artifact_key(artifact)).or_default();
        if known.iter().any(|v| v == version) {
            return Ok(false);
        }
        known.push(version.to_string());
        Ok(true)
    }

    async fn versions(&self, artifact: &DeliveryArtifact) -> StorageResult<Vec<String>> {
        let versions = self.versions.read().await;
        Ok(versions
            .get(&artifact_key(artifact))
            .map(|known| known.iter().rev().cloned().collect())
            .unwrap_or_default())
    }

    async fn approve_version_for(
        &self,
        delivery_config: &DeliveryConfig,
        artifact: &DeliveryArtifact,
        version: &str,
        environment: &str,
    ) -> StorageResult<bool> {
        let mut approvals = self.approvals.write().await;
        let approved = approvals
            .entry(environment_key(delivery_config, artifact, environment))
            .or_default();
        if approved.last().map(String::as_str) == Some(version) {
            return Ok(false);
        }
        approved.retain(|v| v != version);
        approved.push(version.to_string());
        Ok(true)
    }

    async fn is_approved_for(
        &self,
        delivery_config: &DeliveryConfig,
        artifact: &DeliveryArtifact,
        version: &str,
        environment: &str,
    ) -> StorageResult<bool> {
        let approvals = self.approvals.read().await;
        Ok(approvals
            .get(&environment_key(delivery_config, artifact, environment))
            .map(|approved| approved.iter().any(|v| v == version))
            .unwrap_or(false))
    }

    async fn latest_approved_version_in(
        &self,
        delivery_config: &DeliveryConfig,
        artifact: &DeliveryArtifact,
        environment: &str,
    ) -> StorageResult<Option<String>> {
        let approvals = self.approvals.read().await;
        Ok(approvals
            .get(&environment_key(delivery_config, artifact, environment))
            .and_then(|approved| approved.last().cloned()))
    }

    async fn pin(
        &self,
        delivery_config: &DeliveryConfig,
        artifact: &DeliveryArtifact,
        version: &str,
        environment: &str,
    ) -> StorageResult<()> {
        let mut pins = self.pins.write().await;
        pins.insert(
            environment_key(delivery_config, artifact, environment),
            version.to_string(),
        );
        Ok(())
    }

    async fn unpin(
        &self,
        delivery_config: &DeliveryConfig,
        artifact: &DeliveryArtifact,
        environment: &str,
    ) -> StorageResult<bool> {
        let mut pins = self.pins.write().await;
        Ok(pins
            .remove(&environment_key(delivery_config, artifact, environment))
            .is_some())
    }

    async fn pinned_version(
        &self,
        delivery_config: &DeliveryConfig,
        artifact: &DeliveryArtifact,
        environment: &str,
    ) -> StorageResult<Option<String>> {
        let pins = self.pins.read().await;
        Ok(pins
            .get(&environment_key(delivery_config, artifact, environment))
            .cloned())
    }

    async fn veto_version(
        &self,
        delivery_config: &DeliveryConfig,
        artifact: &DeliveryArtifact,
        version: &str,
        environment: &str,
    ) -> StorageResult<bool> {
        let mut vetoes = self.vetoes.write().await;
        let vetoed = vetoes
            .entry(environment_key(delivery_config, artifact, environment))
            .or_default();
        if vetoed.iter().any(|v| v == version) {
            return Ok(false);
        }
        vetoed.push(version.to_string());
        Ok(true)
    }

    async fn vetoed_versions(
        &self,
        delivery_config: &DeliveryConfig,
        artifact: &DeliveryArtifact,
        environment: &str,
    ) -> StorageResult<Vec<String>> {
        let vetoes = self.vetoes.read().await;
        Ok(vetoes
            .get(&environment_key(delivery_config, artifact, environment))
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl DiffFingerprintRepository for InMemoryStorage {
    async fn store(&self, id: &ResourceId, hash: &str) -> StorageResult<()> {
        let mut fingerprints = self.fingerprints.write().await;
        match fingerprints.get_mut(id) {
            Some(existing) if existing.hash == hash => existing.count += 1,
            _ => {
                fingerprints.insert(
                    id.clone(),
                    DiffFingerprint {
                        hash: hash.to_string(),
                        count: 1,
                        action_taken_count: 0,
                        first_detected_at: Utc::now(),
                    },
                );
            }
        }
        Ok(())
    }

    async fn get(&self, id: &ResourceId) -> StorageResult<Option<DiffFingerprint>> {
        let fingerprints = self.fingerprints.read().await;
        Ok(fingerprints.get(id).cloned())
    }

    async fn mark_action_taken(&self, id: &ResourceId) -> StorageResult<()> {
        let mut fingerprints = self.fingerprints.write().await;
        if let Some(existing) = fingerprints.get_mut(id) {
            existing.action_taken_count += 1;
        }
        Ok(())
    }

    async fn action_taken_count(&self, id: &ResourceId) -> StorageResult<u32> {
        let fingerprints = self.fingerprints.read().await;
        Ok(fingerprints
            .get(id)
            .map(|existing| existing.action_taken_count)
            .unwrap_or(0))
    }

    async fn clear(&self, id: &ResourceId) -> StorageResult<()> {
        self.fingerprints.write().await.remove(id);
        Ok(())
    }
}

#[async_trait]
impl PauseRepository for InMemoryStorage {
    async fn pause_application(&self, application: &str) -> StorageResult<()> {
        self.paused_applications
            .write()
            .await
            .insert(application.to_string());
        Ok(())
    }

    async fn resume_application(&self, application: &str) -> StorageResult<()> {
        self.paused_applications.write().await.remove(application);
        Ok(())
    }

    async fn application_paused(&self, application: &str) -> StorageResult<bool> {
        Ok(self.paused_applications.read().await.contains(application))
    }

    async fn pause_resource(&self, id: &ResourceId) -> StorageResult<()> {
        self.paused_resources.write().await.insert(id.clone());
        Ok(())
    }

    async fn resume_resource(&self, id: &ResourceId) -> StorageResult<()> {
        self.paused_resources.write().await.remove(id);
        Ok(())
    }

    async fn resource_paused(&self, id: &ResourceId) -> StorageResult<bool> {
        Ok(self.paused_resources.read().await.contains(id))
    }
}
