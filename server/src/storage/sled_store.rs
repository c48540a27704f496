//! Sled-based storage implementation for site configurations.
//!
//! Configuration rows and history snapshots are stored as JSON so that fields
//! added to `SiteConfig` later read back with their defaults. Trees:
//! - `site_config`: row id -> row
//! - `site_config_owners`: owner id -> row id (one row per owner)
//! - `site_config_history`: `owner:version` -> snapshot
//! - `site_config_counters`: owner id -> last assigned version number

use async_trait::async_trait;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use super::{
    history_key, is_newer, ConfigRepository, StorageConfig, StorageError, StorageResult,
};
use crate::site::{ConfigVersion, SiteConfig, SiteConfigPatch, VersionSummary};

/// Tree names for different data types
const TREE_CONFIGS: &str = "site_config";
const TREE_OWNERS: &str = "site_config_owners";
const TREE_HISTORY: &str = "site_config_history";
const TREE_COUNTERS: &str = "site_config_counters";

/// Sled-backed configuration repository
#[derive(Clone)]
pub struct SledRepository {
    db: Arc<Db>,
    configs: Tree,
    owners: Tree,
    history: Tree,
    counters: Tree,
}

impl SledRepository {
    /// Open or create a repository at the configured path
    pub fn open(config: &StorageConfig) -> StorageResult<Self> {
        let path = Path::new(&config.path);

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::InitFailed(format!("Failed to create directory: {}", e))
            })?;
        }

        let db = sled::Config::new()
            .path(&config.path)
            .cache_capacity(config.cache_size)
            .flush_every_ms(if config.flush_interval_ms > 0 {
                Some(config.flush_interval_ms)
            } else {
                None
            })
            .open()?;

        Ok(Self {
            configs: db.open_tree(TREE_CONFIGS)?,
            owners: db.open_tree(TREE_OWNERS)?,
            history: db.open_tree(TREE_HISTORY)?,
            counters: db.open_tree(TREE_COUNTERS)?,
            db: Arc::new(db),
        })
    }

    fn get_row(&self, id: &str) -> StorageResult<Option<SiteConfig>> {
        match self.configs.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn get_version(
        &self,
        owner_id: &str,
        version_number: u64,
    ) -> StorageResult<Option<ConfigVersion>> {
        match self.history.get(history_key(owner_id, version_number).as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_row(&self, config: &SiteConfig) -> StorageResult<()> {
        let id = config
            .id
            .as_deref()
            .ok_or_else(|| StorageError::Corruption("row without id".to_string()))?;
        self.configs.insert(id.as_bytes(), serde_json::to_vec(config)?)?;
        Ok(())
    }

    /// Force flush all pending writes to disk
    pub fn flush(&self) -> StorageResult<()> {
        self.db.flush()?;
        Ok(())
    }

    /// Get storage statistics
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            config_count: self.configs.len(),
            version_count: self.history.len(),
            total_size_bytes: self.db.size_on_disk().unwrap_or(0),
        }
    }
}

#[async_trait]
impl ConfigRepository for SledRepository {
    async fn find_by_owner(&self, owner_id: &str) -> StorageResult<Option<SiteConfig>> {
        let Some(id) = self.owners.get(owner_id.as_bytes())? else {
            return Ok(None);
        };
        let id = String::from_utf8(id.to_vec())
            .map_err(|_| StorageError::Corruption(format!("owner index for {}", owner_id)))?;

        match self.get_row(&id)? {
            Some(row) => Ok(Some(row)),
            None => Err(StorageError::Corruption(format!(
                "owner {} points at missing row {}",
                owner_id, id
            ))),
        }
    }

    async fn insert(&self, mut config: SiteConfig) -> StorageResult<SiteConfig> {
        let owner_id = config
            .user_id
            .clone()
            .ok_or_else(|| StorageError::Corruption("row without owner".to_string()))?;
        let id = uuid::Uuid::new_v4().to_string();

        // Claim the owner slot first so two inserts cannot both succeed
        let claimed = self.owners.compare_and_swap(
            owner_id.as_bytes(),
            None::<&[u8]>,
            Some(id.as_bytes()),
        )?;
        if claimed.is_err() {
            return Err(StorageError::AlreadyExists(owner_id));
        }

        config.id = Some(id);
        self.put_row(&config)?;
        debug!("Inserted configuration row for owner {}", owner_id);
        Ok(config)
    }

    async fn update(&self, id: &str, patch: &SiteConfigPatch) -> StorageResult<SiteConfig> {
        // Read and write in one transaction so concurrent patches to other fields survive
        let result: Result<SiteConfig, TransactionError<StorageError>> =
            self.configs.transaction(|configs| {
                let bytes = configs.get(id.as_bytes())?.ok_or_else(|| {
                    ConflictableTransactionError::Abort(StorageError::NotFound(id.to_string()))
                })?;
                let mut row: SiteConfig = serde_json::from_slice(&bytes)
                    .map_err(|e| ConflictableTransactionError::Abort(StorageError::from(e)))?;

                patch.apply_to(&mut row);
                let encoded = serde_json::to_vec(&row)
                    .map_err(|e| ConflictableTransactionError::Abort(StorageError::from(e)))?;
                configs.insert(id.as_bytes(), encoded)?;
                Ok(row)
            });

        result.map_err(from_transaction)
    }

    async fn append_version(
        &self,
        owner_id: &str,
        snapshot: &SiteConfig,
        description: Option<&str>,
    ) -> StorageResult<ConfigVersion> {
        let id = uuid::Uuid::new_v4().to_string();
        let created_at = chrono::Utc::now();

        let result: Result<ConfigVersion, TransactionError<StorageError>> =
            (&self.history, &self.counters).transaction(|(history, counters)| {
                let current = match counters.get(owner_id.as_bytes())? {
                    Some(bytes) => {
                        decode_counter(&bytes).map_err(ConflictableTransactionError::Abort)?
                    }
                    None => 0,
                };

                let version = ConfigVersion {
                    id: id.clone(),
                    version_number: current + 1,
                    created_at,
                    description: description.map(str::to_string),
                    user_id: owner_id.to_string(),
                    config_snapshot: snapshot.clone(),
                };
                let bytes = serde_json::to_vec(&version)
                    .map_err(|e| ConflictableTransactionError::Abort(StorageError::from(e)))?;

                history.insert(
                    history_key(owner_id, version.version_number).as_bytes(),
                    bytes,
                )?;
                counters.insert(owner_id.as_bytes(), &version.version_number.to_be_bytes()[..])?;
                Ok(version)
            });

        result.map_err(from_transaction)
    }

    async fn find_version(
        &self,
        owner_id: &str,
        version_number: u64,
    ) -> StorageResult<Option<ConfigVersion>> {
        self.get_version(owner_id, version_number)
    }

    async fn list_versions(
        &self,
        owner_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<VersionSummary>> {
        let prefix = format!("{}:", owner_id);

        let mut versions = Vec::new();
        for item in self.history.scan_prefix(prefix.as_bytes()).rev().take(limit) {
            let (_, value) = item?;
            let version: ConfigVersion = serde_json::from_slice(&value)?;
            versions.push(VersionSummary::from(&version));
        }
        Ok(versions)
    }

    async fn latest_version(&self) -> StorageResult<Option<ConfigVersion>> {
        let mut latest: Option<ConfigVersion> = None;

        // The counter of each owner names its newest entry
        for item in self.counters.iter() {
            let (owner, counter) = item?;
            let owner = String::from_utf8_lossy(&owner);
            let Some(candidate) = self.get_version(&owner, decode_counter(&counter)?)? else {
                continue;
            };

            if latest.as_ref().map_or(true, |current| is_newer(&candidate, current)) {
                latest = Some(candidate);
            }
        }
        Ok(latest)
    }
}

fn from_transaction(e: TransactionError<StorageError>) -> StorageError {
    match e {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => StorageError::Sled(e),
    }
}

fn decode_counter(bytes: &[u8]) -> StorageResult<u64> {
    let array: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StorageError::Corruption("version counter".to_string()))?;
    Ok(u64::from_be_bytes(array))
}

/// Statistics about the storage
#[derive(Debug, Clone)]
pub struct StorageStats {
    pub config_count: usize,
    pub version_count: usize,
    pub total_size_bytes: u64,
}

impl Drop for SledRepository {
    fn drop(&mut self) {
        // Attempt to flush on drop, but don't panic
        let _ = self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    fn test_repo() -> (TempDir, SledRepository) {
        let dir = tempdir().unwrap();
        let config = StorageConfig::new(dir.path().join("test.sled").to_string_lossy().to_string());
        let repo = SledRepository::open(&config).unwrap();
        (dir, repo)
    }

    #[tokio::test]
    async fn test_insert_and_find_by_owner() {
        let (_dir, repo) = test_repo();

        let row = repo.insert(SiteConfig::default_for("owner-1")).await.unwrap();
        assert!(row.id.is_some());

        let found = repo.find_by_owner("owner-1").await.unwrap().unwrap();
        assert_eq!(found, row);
        assert!(repo.find_by_owner("owner-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_one_row_per_owner() {
        let (_dir, repo) = test_repo();

        repo.insert(SiteConfig::default_for("owner-1")).await.unwrap();
        let second = repo.insert(SiteConfig::default_for("owner-1")).await;
        assert!(matches!(second, Err(StorageError::AlreadyExists(_))));

        let ownerless = repo.insert(SiteConfig::default()).await;
        assert!(matches!(ownerless, Err(StorageError::Corruption(_))));
    }

    #[tokio::test]
    async fn test_update_merges() {
        let (_dir, repo) = test_repo();
        let row = repo.insert(SiteConfig::default_for("owner-1")).await.unwrap();

        let patch = SiteConfigPatch {
            site_name: Some("Atelier".to_string()),
            ..Default::default()
        };
        let updated = repo.update(row.id.as_deref().unwrap(), &patch).await.unwrap();

        assert_eq!(updated.site_name, "Atelier");
        assert_eq!(updated.primary_color, row.primary_color);
        assert_eq!(repo.find_by_owner("owner-1").await.unwrap().unwrap(), updated);

        let missing = repo.update("nope", &patch).await;
        assert!(matches!(missing, Err(StorageError::NotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_patches_keep_both_fields() {
        let (_dir, repo) = test_repo();
        let row = repo.insert(SiteConfig::default_for("owner-1")).await.unwrap();
        let id = row.id.unwrap();

        for round in 0..50u32 {
            let name = {
                let (repo, id) = (repo.clone(), id.clone());
                tokio::spawn(async move {
                    let patch = SiteConfigPatch {
                        site_name: Some(format!("Atelier {}", round)),
                        ..Default::default()
                    };
                    repo.update(&id, &patch).await.unwrap();
                })
            };
            let count = {
                let (repo, id) = (repo.clone(), id.clone());
                tokio::spawn(async move {
                    let patch = SiteConfigPatch {
                        particles_count: Some(round),
                        ..Default::default()
                    };
                    repo.update(&id, &patch).await.unwrap();
                })
            };
            name.await.unwrap();
            count.await.unwrap();

            let stored = repo.find_by_owner("owner-1").await.unwrap().unwrap();
            assert_eq!(stored.site_name, format!("Atelier {}", round));
            assert_eq!(stored.particles_count, round);
        }
    }

    #[tokio::test]
    async fn test_versions_are_monotonic_per_owner() {
        let (_dir, repo) = test_repo();
        let snapshot = SiteConfig::default_for("owner-1");

        for _ in 0..3 {
            repo.append_version("owner-1", &snapshot, Some("update")).await.unwrap();
        }
        let other = repo.append_version("owner-2", &snapshot, None).await.unwrap();
        assert_eq!(other.version_number, 1);

        let history = repo.list_versions("owner-1", 20).await.unwrap();
        let numbers: Vec<u64> = history.iter().map(|v| v.version_number).collect();
        assert_eq!(numbers, vec![3, 2, 1]);

        let limited = repo.list_versions("owner-1", 2).await.unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].version_number, 3);
    }

    #[tokio::test]
    async fn test_concurrent_appends_never_repeat() {
        let (_dir, repo) = test_repo();
        let snapshot = SiteConfig::default_for("owner-1");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let repo = repo.clone();
            let snapshot = snapshot.clone();
            handles.push(tokio::spawn(async move {
                repo.append_version("owner-1", &snapshot, None).await.unwrap().version_number
            }));
        }

        let mut numbers = Vec::new();
        for handle in handles {
            numbers.push(handle.await.unwrap());
        }
        numbers.sort_unstable();
        assert_eq!(numbers, (1..=8).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_find_version_and_latest() {
        let (_dir, repo) = test_repo();
        assert!(repo.latest_version().await.unwrap().is_none());

        let mut snapshot = SiteConfig::default_for("owner-1");
        snapshot.site_name = "first".to_string();
        repo.append_version("owner-1", &snapshot, None).await.unwrap();
        snapshot.site_name = "second".to_string();
        repo.append_version("owner-1", &snapshot, None).await.unwrap();

        let v1 = repo.find_version("owner-1", 1).await.unwrap().unwrap();
        assert_eq!(v1.config_snapshot.site_name, "first");
        assert!(repo.find_version("owner-1", 9).await.unwrap().is_none());

        let latest = repo.latest_version().await.unwrap().unwrap();
        assert_eq!(latest.version_number, 2);
        assert_eq!(latest.config_snapshot.site_name, "second");
    }

    #[tokio::test]
    async fn test_reopen_keeps_data() {
        let dir = tempdir().unwrap();
        let config = StorageConfig::new(dir.path().join("test.sled").to_string_lossy().to_string())
            .with_flush_interval(0);

        {
            let repo = SledRepository::open(&config).unwrap();
            repo.insert(SiteConfig::default_for("owner-1")).await.unwrap();
            repo.append_version("owner-1", &SiteConfig::default(), None).await.unwrap();
            assert_eq!(repo.stats().config_count, 1);
        }

        let repo = SledRepository::open(&config).unwrap();
        assert!(repo.find_by_owner("owner-1").await.unwrap().is_some());
        let next = repo.append_version("owner-1", &SiteConfig::default(), None).await.unwrap();
        assert_eq!(next.version_number, 2);
    }
}
