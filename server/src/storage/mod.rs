//! Storage module for configuration rows and their version history.
//!
//! The `ConfigRepository` trait is the backend boundary of the configuration
//! store: a record store (one row per owner) plus an append-only log of
//! numbered snapshots. Two implementations are provided:
//! - `SledRepository`: persistent, embedded Sled database
//! - `MemoryRepository`: in-process fake with a switchable failure mode

#[cfg(test)]
mod memory;
mod sled_store;

#[cfg(test)]
pub use memory::MemoryRepository;
pub use sled_store::SledRepository;

use async_trait::async_trait;
use thiserror::Error;

use crate::site::{ConfigVersion, SiteConfig, SiteConfigPatch, VersionSummary};

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Sled database error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Record already exists: {0}")]
    AlreadyExists(String),

    #[error("Corruption detected in record: {0}")]
    Corruption(String),

    #[error("Storage initialization failed: {0}")]
    InitFailed(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Backend record store and history log for site configurations
#[async_trait]
pub trait ConfigRepository: Send + Sync {
    /// Fetch the configuration row owned by `owner_id`
    async fn find_by_owner(&self, owner_id: &str) -> StorageResult<Option<SiteConfig>>;

    /// Insert a new row, assigning its id. The row must carry an owner, and an
    /// owner holds at most one row.
    async fn insert(&self, config: SiteConfig) -> StorageResult<SiteConfig>;

    /// Merge `patch` into the row with the given id and return the result
    async fn update(&self, id: &str, patch: &SiteConfigPatch) -> StorageResult<SiteConfig>;

    /// Append a snapshot to the owner's history. The version number is
    /// assigned atomically by the backend as the owner's previous maximum + 1.
    async fn append_version(
        &self,
        owner_id: &str,
        snapshot: &SiteConfig,
        description: Option<&str>,
    ) -> StorageResult<ConfigVersion>;

    /// Fetch one snapshot of the owner's history
    async fn find_version(
        &self,
        owner_id: &str,
        version_number: u64,
    ) -> StorageResult<Option<ConfigVersion>>;

    /// The owner's history, newest first, at most `limit` entries
    async fn list_versions(&self, owner_id: &str, limit: usize)
        -> StorageResult<Vec<VersionSummary>>;

    /// Most recent snapshot across all owners
    async fn latest_version(&self) -> StorageResult<Option<ConfigVersion>>;
}

/// Configuration for the storage layer
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Path to the Sled database directory
    pub path: String,
    /// Cache size in bytes (default: 64MB)
    pub cache_size: u64,
    /// Flush interval in milliseconds (0 = flush after every write)
    pub flush_interval_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "./data/storefront.sled".to_string(),
            cache_size: 64 * 1024 * 1024, // 64MB
            flush_interval_ms: 500,
        }
    }
}

impl StorageConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_cache_size(mut self, size: u64) -> Self {
        self.cache_size = size;
        self
    }

    pub fn with_flush_interval(mut self, ms: u64) -> Self {
        self.flush_interval_ms = ms;
        self
    }
}

/// Key of a history entry: owner prefix plus zero-padded version, so that a
/// prefix scan yields versions in ascending order
pub(crate) fn history_key(owner_id: &str, version_number: u64) -> String {
    format!("{}:{:020}", owner_id, version_number)
}

/// Ordering used to pick the system-wide latest snapshot
pub(crate) fn is_newer(candidate: &ConfigVersion, current: &ConfigVersion) -> bool {
    (candidate.version_number, candidate.created_at) > (current.version_number, current.created_at)
}
