//! Local persisted state.
//!
//! - `LocalCache`: best-effort mirror of the last loaded or saved configuration,
//!   used to serve a populated configuration before the backend answers
//! - `SessionMarker`: the last admin session token, used to skip a sign-in
//!   after a restart
//!
//! Both live under a single directory, one file per fixed key. Reads never
//! fail: a missing or corrupt entry is a miss. Writes never fail the caller.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::site::SiteConfig;

/// Cache key of the configuration mirror
pub const CONFIG_CACHE_KEY: &str = "storefront_config_cache";

/// Key of the admin session marker
pub const ADMIN_SESSION_KEY: &str = "admin_session";

/// Write `contents` next to `path` and move it into place
fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)
}

/// Persisted mirror of the last known configuration
#[derive(Debug, Clone)]
pub struct LocalCache {
    path: PathBuf,
}

impl LocalCache {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(format!("{}.json", CONFIG_CACHE_KEY)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last stored configuration, or `None` if absent or unreadable
    pub fn read(&self) -> Option<SiteConfig> {
        let bytes = fs::read(&self.path).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(config) => Some(config),
            Err(e) => {
                debug!("Ignoring corrupt cache entry {}: {}", self.path.display(), e);
                None
            }
        }
    }

    /// Store the full configuration, replacing any prior entry
    pub fn write(&self, config: &SiteConfig) {
        let result = serde_json::to_vec(config)
            .map_err(std::io::Error::from)
            .and_then(|bytes| write_atomic(&self.path, &bytes));

        if let Err(e) = result {
            warn!("Failed to write config cache {}: {}", self.path.display(), e);
        }
    }
}

/// Persisted record of an established admin session
#[derive(Debug, Clone)]
pub struct SessionMarker {
    path: PathBuf,
}

impl SessionMarker {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(ADMIN_SESSION_KEY),
        }
    }

    /// Token of the previous admin session, if one was recorded
    pub fn token(&self) -> Option<String> {
        let token = fs::read_to_string(&self.path).ok()?;
        let token = token.trim();
        (!token.is_empty()).then(|| token.to_string())
    }

    #[cfg(test)]
    pub fn is_set(&self) -> bool {
        self.token().is_some()
    }

    pub fn set(&self, token: &str) {
        if let Err(e) = write_atomic(&self.path, token.as_bytes()) {
            warn!("Failed to record admin session: {}", e);
        }
    }

    pub fn clear(&self) {
        let _ = fs::remove_file(&self.path);
    }
}
