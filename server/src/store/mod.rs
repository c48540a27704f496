//! Configuration store: the single source of truth for the running site
//! configuration.
//!
//! The store reconciles three sources:
//! - the backend record store and history log (`ConfigRepository`)
//! - the local cache, for a populated configuration before the backend answers
//! - the theme applicator, re-projected after every successful load or write

mod config_store;

pub use config_store::ConfigStore;

use serde::Serialize;
use thiserror::Error;

use crate::site::{SiteConfig, VersionSummary};
use crate::storage::StorageError;

/// Maximum number of history entries kept in memory
pub const HISTORY_LIMIT: usize = 20;

/// Description of the snapshot written when a row is first created
pub const INITIAL_DESCRIPTION: &str = "initial configuration";

/// Description of an update snapshot when the caller gives none
pub const UPDATE_DESCRIPTION: &str = "update";

/// Description of the snapshot written by a restore
pub fn restore_description(version_number: u64) -> String {
    format!("restored version {}", version_number)
}

/// Errors reported by store operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Not authorized: an authenticated owner is required")]
    Unauthorized,

    #[error("Version {0} not found")]
    VersionNotFound(u64),

    #[error("Invalid change: {0}")]
    InvalidChange(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Observable state of the store
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreState {
    /// Current configuration; `None` only before the first load
    pub config: Option<SiteConfig>,
    pub loading: bool,
    /// Message of the last failed operation
    pub error: Option<String>,
    /// Newest first, at most `HISTORY_LIMIT` entries
    pub history: Vec<VersionSummary>,
    /// Version number the current configuration corresponds to, when known
    pub current_version: Option<u64>,
}
