//! Identity module for the storefront administrator.
//!
//! This module handles:
//! - Password sign-in issuing signed session tokens
//! - Session verification, expiry and sign-out revocation
//! - Change notifications for sign-in / sign-out

mod service;

pub use service::AuthService;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::site::OwnerId;

/// Longest session a token may be issued for (30 days)
pub const MAX_SESSION_TTL_SECONDS: u64 = 30 * 24 * 60 * 60;

/// Errors that can occur during identity operations
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("JWT error: {0}")]
    JwtError(#[from] jsonwebtoken::errors::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Session revoked")]
    Revoked,

    #[error("Missing admin credentials")]
    MissingCredentials,
}

/// Configuration for the identity service
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Administrator email (the single owner identity)
    pub admin_email: String,
    /// Hex SHA-256 of the administrator password
    pub admin_password_hash: String,
    /// HS256 signing secret
    pub secret: String,
    /// Default session TTL in seconds
    pub session_ttl_seconds: u64,
}

impl AuthConfig {
    /// Create a new config from clear credentials; the password is hashed here
    pub fn new(
        admin_email: impl Into<String>,
        admin_password: &str,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            admin_email: admin_email.into(),
            admin_password_hash: hash_password(admin_password),
            secret: secret.into(),
            session_ttl_seconds: 6 * 60 * 60, // 6 hours default
        }
    }

    /// Set session TTL
    pub fn with_ttl(mut self, seconds: u64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.admin_email.trim().is_empty() {
            return Err(AuthError::InvalidConfig("Admin email is empty".to_string()));
        }
        if self.secret.len() < 16 {
            return Err(AuthError::InvalidConfig(
                "Secret must be at least 16 characters".to_string(),
            ));
        }
        if self.session_ttl_seconds == 0 {
            return Err(AuthError::InvalidConfig("Session TTL is zero".to_string()));
        }
        if self.session_ttl_seconds > MAX_SESSION_TTL_SECONDS {
            return Err(AuthError::InvalidConfig(format!(
                "Session TTL exceeds {} seconds",
                MAX_SESSION_TTL_SECONDS
            )));
        }
        Ok(())
    }

    /// Stable owner id of the administrator, derived from the email
    pub fn admin_owner_id(&self) -> OwnerId {
        let digest = Sha256::digest(self.admin_email.trim().to_lowercase().as_bytes());
        format!("admin-{}", &hex::encode(digest)[..16])
    }
}

/// Hex SHA-256 of a password
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// An authenticated administrator session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Owner id of the signed-in identity
    pub user_id: OwnerId,
    pub email: String,
    /// Bearer token
    pub token: String,
    /// Unix timestamp of expiry
    pub expires_at: u64,
}

/// Identity change notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthEvent {
    SignedIn { user_id: OwnerId },
    SignedOut { user_id: OwnerId },
}
