//! Process configuration read from the environment.
//!
//! Optional values fall back to their defaults with a warning when malformed;
//! the administrator credentials are required.

use std::{fmt::Display, path::PathBuf, str::FromStr};
use tracing::{info, warn};

use crate::auth::{AuthConfig, AuthError};
use crate::media::MediaConfig;
use crate::storage::StorageConfig;

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_STORAGE_PATH: &str = "./data/storefront.sled";
const DEFAULT_CACHE_DIR: &str = "./data/cache";
const DEFAULT_MEDIA_ROOT: &str = "./data/media";
const DEFAULT_SESSION_TTL_SECONDS: u64 = 6 * 60 * 60;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;
const DEFAULT_STORAGE_CACHE_BYTES: u64 = 64 * 1024 * 1024;
const DEFAULT_STORAGE_FLUSH_MS: u64 = 500;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub storage: StorageConfig,
    /// Directory of the local cache and the session marker
    pub cache_dir: PathBuf,
    pub auth: AuthConfig,
    pub media: MediaConfig,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, AuthError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AuthError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port: u16 = parse_or(&lookup, "PORT", DEFAULT_PORT);
        let storage_path =
            lookup("STORAGE_PATH").unwrap_or_else(|| DEFAULT_STORAGE_PATH.to_string());
        let cache_bytes = parse_or(&lookup, "STORAGE_CACHE_BYTES", DEFAULT_STORAGE_CACHE_BYTES);
        let flush_ms = parse_or(&lookup, "STORAGE_FLUSH_INTERVAL_MS", DEFAULT_STORAGE_FLUSH_MS);
        let cache_dir = lookup("CACHE_DIR").unwrap_or_else(|| DEFAULT_CACHE_DIR.to_string());
        let media_root = lookup("MEDIA_ROOT").unwrap_or_else(|| DEFAULT_MEDIA_ROOT.to_string());
        let public_base_url = lookup("PUBLIC_BASE_URL")
            .unwrap_or_else(|| format!("http://localhost:{}", port));

        let email = lookup("ADMIN_EMAIL").ok_or(AuthError::MissingCredentials)?;
        let password = lookup("ADMIN_PASSWORD").ok_or(AuthError::MissingCredentials)?;
        let secret = lookup("AUTH_SECRET").ok_or(AuthError::MissingCredentials)?;
        let ttl = parse_or(&lookup, "SESSION_TTL_SECONDS", DEFAULT_SESSION_TTL_SECONDS);

        let auth = AuthConfig::new(email, &password, secret.clone()).with_ttl(ttl);
        auth.validate()?;

        let media = MediaConfig::new(media_root, public_base_url)
            .with_signing_secret(secret)
            .with_max_upload_bytes(parse_or(
                &lookup,
                "MAX_UPLOAD_BYTES",
                DEFAULT_MAX_UPLOAD_BYTES,
            ));

        Ok(Self {
            port,
            storage: StorageConfig::new(storage_path)
                .with_cache_size(cache_bytes)
                .with_flush_interval(flush_ms),
            cache_dir: PathBuf::from(cache_dir),
            auth,
            media,
        })
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|e| {
            warn!("Invalid {key} value {raw:?}: {e}, using default: {default}");
            default
        }),
        None => {
            info!("{key} not set, using default: {default}");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    const CREDENTIALS: [(&str, &str); 3] = [
        ("ADMIN_EMAIL", "admin@example.com"),
        ("ADMIN_PASSWORD", "gallery"),
        ("AUTH_SECRET", "a-secret-that-is-long-enough"),
    ];

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_lookup(lookup_from(&CREDENTIALS)).unwrap();

        assert_eq!(config.port, 5000);
        assert_eq!(config.storage.path, DEFAULT_STORAGE_PATH);
        assert_eq!(config.storage.cache_size, 64 * 1024 * 1024);
        assert_eq!(config.cache_dir, PathBuf::from(DEFAULT_CACHE_DIR));
        assert_eq!(config.media.public_base_url, "http://localhost:5000");
        assert_eq!(config.media.max_upload_bytes, 5 * 1024 * 1024);
        assert_eq!(config.media.signing_secret, "a-secret-that-is-long-enough");
        assert_eq!(config.auth.session_ttl_seconds, 21600);
    }

    #[test]
    fn test_overrides_and_malformed_values() {
        let mut pairs = CREDENTIALS.to_vec();
        pairs.extend([
            ("PORT", "8080"),
            ("SESSION_TTL_SECONDS", "not-a-number"),
            ("MAX_UPLOAD_BYTES", "1024"),
            ("STORAGE_CACHE_BYTES", "2048"),
            ("STORAGE_FLUSH_INTERVAL_MS", "0"),
            ("PUBLIC_BASE_URL", "https://shop.example.com"),
        ]);
        let config = ServerConfig::from_lookup(lookup_from(&pairs)).unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.auth.session_ttl_seconds, DEFAULT_SESSION_TTL_SECONDS);
        assert_eq!(config.media.max_upload_bytes, 1024);
        assert_eq!(config.storage.cache_size, 2048);
        assert_eq!(config.storage.flush_interval_ms, 0);
        assert_eq!(config.media.public_base_url, "https://shop.example.com");
    }

    #[test]
    fn test_missing_credentials() {
        let result = ServerConfig::from_lookup(lookup_from(&CREDENTIALS[..2]));
        assert!(matches!(result, Err(AuthError::MissingCredentials)));
    }

    #[test]
    fn test_oversized_session_ttl_rejected() {
        let mut pairs = CREDENTIALS.to_vec();
        pairs.push(("SESSION_TTL_SECONDS", "18446744073709551615"));
        let result = ServerConfig::from_lookup(lookup_from(&pairs));
        assert!(matches!(result, Err(AuthError::InvalidConfig(_))));
    }

    #[test]
    fn test_weak_secret_rejected() {
        let pairs = [
            ("ADMIN_EMAIL", "admin@example.com"),
            ("ADMIN_PASSWORD", "gallery"),
            ("AUTH_SECRET", "short"),
        ];
        let result = ServerConfig::from_lookup(lookup_from(&pairs));
        assert!(matches!(result, Err(AuthError::InvalidConfig(_))));
    }
}
