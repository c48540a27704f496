//! In-memory configuration repository.
//!
//! Behaves like `SledRepository` without touching disk. `set_unavailable`
//! makes every call fail as if the backend were unreachable;
//! `set_history_unavailable` only fails history appends.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use super::{history_key, is_newer, ConfigRepository, StorageError, StorageResult};
use crate::site::{ConfigVersion, OwnerId, SiteConfig, SiteConfigPatch, VersionSummary};

#[derive(Default)]
struct MemoryState {
    configs: HashMap<String, SiteConfig>,
    owners: HashMap<OwnerId, String>,
    history: BTreeMap<String, ConfigVersion>,
    counters: HashMap<OwnerId, u64>,
}

#[derive(Default)]
pub struct MemoryRepository {
    state: Mutex<MemoryState>,
    unavailable: AtomicBool,
    history_unavailable: AtomicBool,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle simulated backend outage
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Toggle simulated failure of history appends only
    pub fn set_history_unavailable(&self, unavailable: bool) {
        self.history_unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of stored history entries across all owners
    pub fn version_count(&self) -> usize {
        self.state.lock().history.len()
    }

    fn check_available(&self) -> StorageResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StorageError::Unavailable("memory backend offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ConfigRepository for MemoryRepository {
    async fn find_by_owner(&self, owner_id: &str) -> StorageResult<Option<SiteConfig>> {
        self.check_available()?;
        let state = self.state.lock();
        Ok(state
            .owners
            .get(owner_id)
            .and_then(|id| state.configs.get(id))
            .cloned())
    }

    async fn insert(&self, mut config: SiteConfig) -> StorageResult<SiteConfig> {
        self.check_available()?;
        let owner_id = config
            .user_id
            .clone()
            .ok_or_else(|| StorageError::Corruption("row without owner".to_string()))?;

        let mut state = self.state.lock();
        if state.owners.contains_key(&owner_id) {
            return Err(StorageError::AlreadyExists(owner_id));
        }

        let id = uuid::Uuid::new_v4().to_string();
        config.id = Some(id.clone());
        state.owners.insert(owner_id, id.clone());
        state.configs.insert(id, config.clone());
        Ok(config)
    }

    async fn update(&self, id: &str, patch: &SiteConfigPatch) -> StorageResult<SiteConfig> {
        self.check_available()?;
        let mut state = self.state.lock();
        let row = state
            .configs
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;

        patch.apply_to(row);
        Ok(row.clone())
    }

    async fn append_version(
        &self,
        owner_id: &str,
        snapshot: &SiteConfig,
        description: Option<&str>,
    ) -> StorageResult<ConfigVersion> {
        self.check_available()?;
        if self.history_unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("history log offline".to_string()));
        }
        let mut state = self.state.lock();

        let counter = state.counters.entry(owner_id.to_string()).or_insert(0);
        *counter += 1;

        let version = ConfigVersion {
            id: uuid::Uuid::new_v4().to_string(),
            version_number: *counter,
            created_at: chrono::Utc::now(),
            description: description.map(str::to_string),
            user_id: owner_id.to_string(),
            config_snapshot: snapshot.clone(),
        };
        state
            .history
            .insert(history_key(owner_id, version.version_number), version.clone());
        Ok(version)
    }

    async fn find_version(
        &self,
        owner_id: &str,
        version_number: u64,
    ) -> StorageResult<Option<ConfigVersion>> {
        self.check_available()?;
        Ok(self
            .state
            .lock()
            .history
            .get(&history_key(owner_id, version_number))
            .cloned())
    }

    async fn list_versions(
        &self,
        owner_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<VersionSummary>> {
        self.check_available()?;
        let prefix = format!("{}:", owner_id);
        let state = self.state.lock();

        Ok(state
            .history
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(_, version)| VersionSummary::from(version))
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .take(limit)
            .collect())
    }

    async fn latest_version(&self) -> StorageResult<Option<ConfigVersion>> {
        self.check_available()?;
        let state = self.state.lock();

        let mut latest: Option<&ConfigVersion> = None;
        for version in state.history.values() {
            if latest.map_or(true, |current| is_newer(version, current)) {
                latest = Some(version);
            }
        }
        Ok(latest.cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_round_trip() {
        let repo = MemoryRepository::new();
        let row = repo.insert(SiteConfig::default_for("owner-1")).await.unwrap();

        let patch = SiteConfigPatch {
            stars_count: Some(3),
            ..Default::default()
        };
        let updated = repo.update(row.id.as_deref().unwrap(), &patch).await.unwrap();
        assert_eq!(updated.stars_count, 3);
        assert_eq!(repo.find_by_owner("owner-1").await.unwrap().unwrap().stars_count, 3);
    }

    #[tokio::test]
    async fn test_memory_history_order() {
        let repo = MemoryRepository::new();
        for _ in 0..25 {
            repo.append_version("owner-1", &SiteConfig::default(), None).await.unwrap();
        }
        repo.append_version("owner-10", &SiteConfig::default(), None).await.unwrap();

        let history = repo.list_versions("owner-1", 20).await.unwrap();
        assert_eq!(history.len(), 20);
        assert_eq!(history[0].version_number, 25);
        assert_eq!(history[19].version_number, 6);
        assert!(history.iter().all(|v| v.user_id == "owner-1"));

        let latest = repo.latest_version().await.unwrap().unwrap();
        assert_eq!(latest.version_number, 25);
    }

    #[tokio::test]
    async fn test_unavailable_backend() {
        let repo = MemoryRepository::new();
        repo.set_unavailable(true);

        let result = repo.find_by_owner("owner-1").await;
        assert!(matches!(result, Err(StorageError::Unavailable(_))));

        repo.set_unavailable(false);
        assert!(repo.find_by_owner("owner-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_history_only_outage() {
        let repo = MemoryRepository::new();
        repo.set_history_unavailable(true);

        let row = repo.insert(SiteConfig::default_for("owner-1")).await.unwrap();
        assert!(row.id.is_some());
        let append = repo.append_version("owner-1", &row, None).await;
        assert!(matches!(append, Err(StorageError::Unavailable(_))));
        assert!(repo.list_versions("owner-1", 20).await.unwrap().is_empty());
    }
}
