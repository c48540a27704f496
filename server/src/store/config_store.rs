//! ConfigStore implementation.
//!
//! Mutations follow one sequence: authorize, write the row, append a history
//! snapshot, then update memory, cache and theme. In-memory state only ever
//! reflects completed backend writes (or the cache / defaults during load).
//! The state lock is never held across an await.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{
    restore_description, StoreError, StoreState, HISTORY_LIMIT, INITIAL_DESCRIPTION,
    UPDATE_DESCRIPTION,
};
use crate::auth::Session;
use crate::cache::LocalCache;
use crate::site::{SiteConfig, SiteConfigPatch, VersionSummary};
use crate::storage::{ConfigRepository, StorageError};
use crate::theme::ThemeApplicator;

/// Process-wide configuration container
pub struct ConfigStore {
    repository: Arc<dyn ConfigRepository>,
    cache: LocalCache,
    theme: Arc<ThemeApplicator>,
    state: RwLock<StoreState>,
}

impl ConfigStore {
    pub fn new(
        repository: Arc<dyn ConfigRepository>,
        cache: LocalCache,
        theme: Arc<ThemeApplicator>,
    ) -> Self {
        Self {
            repository,
            cache,
            theme,
            state: RwLock::new(StoreState::default()),
        }
    }

    /// Snapshot of the whole observable state
    pub fn state(&self) -> StoreState {
        self.state.read().clone()
    }

    pub fn config(&self) -> Option<SiteConfig> {
        self.state.read().config.clone()
    }

    /// Current configuration, or the defaults before the first load
    pub fn current(&self) -> SiteConfig {
        self.config().unwrap_or_default()
    }

    /// History list, newest first
    pub fn history(&self) -> Vec<VersionSummary> {
        self.state.read().history.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.state.read().error.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.read().loading
    }

    pub fn current_version(&self) -> Option<u64> {
        self.state.read().current_version
    }

    pub fn theme(&self) -> &Arc<ThemeApplicator> {
        &self.theme
    }

    /// Load the authoritative configuration.
    ///
    /// Never fails: on any backend error the defaults are installed and the
    /// error is recorded in the state.
    pub async fn load(&self, session: Option<&Session>) -> SiteConfig {
        {
            let mut state = self.state.write();
            state.loading = true;
            state.error = None;
        }

        if let Some(cached) = self.cache.read() {
            debug!("Serving cached configuration while loading");
            self.theme.apply(&cached);
            self.state.write().config = Some(cached);
        }

        match self.resolve(session).await {
            Ok((config, version)) => {
                let history = match session {
                    Some(session) => self.fetch_history(&session.user_id).await,
                    None => None,
                };

                self.cache.write(&config);
                self.theme.apply(&config);

                let mut state = self.state.write();
                state.config = Some(config.clone());
                state.current_version = version;
                match history {
                    Some(history) => {
                        if state.current_version.is_none() {
                            state.current_version = history.first().map(|v| v.version_number);
                        }
                        state.history = history;
                    }
                    // History belongs to an owner; a public load shows none
                    None if session.is_none() => state.history.clear(),
                    None => {}
                }
                state.loading = false;
                config
            }
            Err(e) => {
                error!("Failed to load configuration, using defaults: {}", e);
                let config = SiteConfig::default();
                self.theme.apply(&config);

                let mut state = self.state.write();
                state.config = Some(config.clone());
                state.current_version = None;
                state.error = Some(e.to_string());
                state.loading = false;
                config
            }
        }
    }

    /// Merge `patch` into the caller's configuration and record a version
    pub async fn update(
        &self,
        session: Option<&Session>,
        patch: &SiteConfigPatch,
        description: Option<&str>,
    ) -> Result<SiteConfig, StoreError> {
        self.state.write().error = None;
        let result = self.try_update(session, patch, description).await;
        self.record("update", result)
    }

    async fn try_update(
        &self,
        session: Option<&Session>,
        patch: &SiteConfigPatch,
        description: Option<&str>,
    ) -> Result<SiteConfig, StoreError> {
        let session = session.ok_or(StoreError::Unauthorized)?;
        if patch.is_empty() {
            return Err(StoreError::InvalidChange("no fields to update".to_string()));
        }
        patch.validate().map_err(StoreError::InvalidChange)?;

        let owner = &session.user_id;
        let (row, _) = self.ensure_row(owner, false).await?;
        let updated = self.repository.update(row_id(&row)?, patch).await?;
        info!("Updated configuration fields {:?}", patch.changed_fields());

        Ok(self
            .commit(owner, updated, description.unwrap_or(UPDATE_DESCRIPTION))
            .await)
    }

    /// Reset the caller's configuration to the field values of a past version.
    ///
    /// History is never rewritten: the restore is recorded as a new version.
    pub async fn restore_version(
        &self,
        session: Option<&Session>,
        version_number: u64,
    ) -> Result<SiteConfig, StoreError> {
        self.state.write().error = None;
        let result = self.try_restore(session, version_number).await;
        self.record("restore", result)
    }

    async fn try_restore(
        &self,
        session: Option<&Session>,
        version_number: u64,
    ) -> Result<SiteConfig, StoreError> {
        let session = session.ok_or(StoreError::Unauthorized)?;
        let owner = &session.user_id;

        let snapshot = self
            .repository
            .find_version(owner, version_number)
            .await?
            .ok_or(StoreError::VersionNotFound(version_number))?;

        let (row, _) = self.ensure_row(owner, false).await?;
        let full_mask = SiteConfigPatch::from_config(&snapshot.config_snapshot);
        let restored = self.repository.update(row_id(&row)?, &full_mask).await?;
        info!("Restored configuration to version {}", version_number);

        Ok(self
            .commit(owner, restored, &restore_description(version_number))
            .await)
    }

    /// Reload the caller's history list from the backend
    pub async fn refresh_history(
        &self,
        session: Option<&Session>,
    ) -> Result<Vec<VersionSummary>, StoreError> {
        let session = session.ok_or(StoreError::Unauthorized)?;
        let history = self
            .repository
            .list_versions(&session.user_id, HISTORY_LIMIT)
            .await?;
        self.state.write().history = history.clone();
        Ok(history)
    }

    /// Resolve the configuration a load should install, with its version if known
    async fn resolve(
        &self,
        session: Option<&Session>,
    ) -> Result<(SiteConfig, Option<u64>), StoreError> {
        let Some(session) = session else {
            return match self.repository.latest_version().await? {
                Some(version) => {
                    debug!("Using published configuration v{}", version.version_number);
                    Ok((version.config_snapshot, Some(version.version_number)))
                }
                None => {
                    debug!("No published configuration, using defaults");
                    Ok((SiteConfig::default(), None))
                }
            };
        };

        self.ensure_row(&session.user_id, true).await
    }

    /// Fetch the owner's row, creating it from defaults when absent.
    ///
    /// With `record_initial`, a newly created row is also written to history.
    async fn ensure_row(
        &self,
        owner: &str,
        record_initial: bool,
    ) -> Result<(SiteConfig, Option<u64>), StoreError> {
        if let Some(row) = self.repository.find_by_owner(owner).await? {
            return Ok((row, None));
        }

        info!("No configuration for {}, creating one from defaults", owner);
        let row = match self.repository.insert(SiteConfig::default_for(owner)).await {
            Ok(row) => row,
            // Another request created it in the meantime
            Err(StorageError::AlreadyExists(_)) => {
                let row = self
                    .repository
                    .find_by_owner(owner)
                    .await?
                    .ok_or_else(|| StorageError::NotFound(owner.to_string()))?;
                return Ok((row, None));
            }
            Err(e) => return Err(e.into()),
        };

        if !record_initial {
            return Ok((row, None));
        }

        match self
            .repository
            .append_version(owner, &row, Some(INITIAL_DESCRIPTION))
            .await
        {
            Ok(version) => Ok((row, Some(version.version_number))),
            Err(e) => {
                warn!("Failed to record initial configuration: {}", e);
                Ok((row, None))
            }
        }
    }

    /// Record a written row: history snapshot, memory, cache and theme.
    ///
    /// A failed history append does not undo the row write; it is logged and
    /// kept as the store error.
    async fn commit(&self, owner: &str, row: SiteConfig, description: &str) -> SiteConfig {
        let version = match self
            .repository
            .append_version(owner, &row, Some(description))
            .await
        {
            Ok(version) => {
                debug!("Recorded configuration v{}", version.version_number);
                Some(version.version_number)
            }
            Err(e) => {
                warn!("Failed to record configuration history: {}", e);
                self.state.write().error = Some(e.to_string());
                None
            }
        };

        self.cache.write(&row);
        self.theme.apply(&row);
        let history = self.fetch_history(owner).await;

        let mut state = self.state.write();
        state.config = Some(row.clone());
        state.current_version = version;
        if let Some(history) = history {
            state.history = history;
        }
        row
    }

    async fn fetch_history(&self, owner: &str) -> Option<Vec<VersionSummary>> {
        match self.repository.list_versions(owner, HISTORY_LIMIT).await {
            Ok(history) => Some(history),
            Err(e) => {
                warn!("Failed to load configuration history: {}", e);
                None
            }
        }
    }

    fn record(
        &self,
        operation: &str,
        result: Result<SiteConfig, StoreError>,
    ) -> Result<SiteConfig, StoreError> {
        if let Err(e) = &result {
            match e {
                StoreError::Unauthorized => warn!("Rejected unauthorized {}", operation),
                _ => warn!("Configuration {} failed: {}", operation, e),
            }
            self.state.write().error = Some(e.to_string());
        }
        result
    }
}

fn row_id(row: &SiteConfig) -> Result<&str, StoreError> {
    row.id
        .as_deref()
        .ok_or_else(|| StorageError::Corruption("configuration row without id".to_string()).into())
}
