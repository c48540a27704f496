use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{OwnerId, SiteConfig};

/// Immutable snapshot of a configuration at the moment of a write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigVersion {
    /// Unique snapshot identifier
    pub id: String,
    /// Strictly increasing per owner, never repeated
    pub version_number: u64,
    pub created_at: DateTime<Utc>,
    pub description: Option<String>,
    pub user_id: OwnerId,
    /// Full copy of the configuration after the write
    pub config_snapshot: SiteConfig,
}

/// History list entry (a version without its snapshot)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionSummary {
    pub id: String,
    pub version_number: u64,
    pub created_at: DateTime<Utc>,
    pub description: Option<String>,
    pub user_id: OwnerId,
}

impl From<&ConfigVersion> for VersionSummary {
    fn from(version: &ConfigVersion) -> Self {
        Self {
            id: version.id.clone(),
            version_number: version.version_number,
            created_at: version.created_at,
            description: version.description.clone(),
            user_id: version.user_id.clone(),
        }
    }
}
