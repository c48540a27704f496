//! Object storage for media references (product images, custom-order
//! references, avatars).
//!
//! Objects live under `<root>/<bucket>/<path>`. Public buckets are readable by
//! URL; private buckets only through time-limited signed URLs.

use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

/// Bucket of product images (public)
pub const PRODUCT_IMAGES_BUCKET: &str = "produits-images";
/// Bucket of custom-order reference images (private)
pub const CUSTOM_ORDERS_BUCKET: &str = "commandes-personnalisees";
/// Bucket of user avatars (public)
pub const AVATARS_BUCKET: &str = "avatars";

/// Longest lifetime a signed URL may be issued for
pub const MAX_SIGNED_URL_TTL: u64 = 7 * 24 * 60 * 60;

/// Errors that can occur during media operations
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown bucket: {0}")]
    UnknownBucket(String),

    #[error("Invalid object path: {0}")]
    InvalidPath(String),

    #[error("File must be an image (got {0})")]
    NotAnImage(String),

    #[error("File too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("Object already exists: {0}")]
    AlreadyExists(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid URL lifetime: {0} seconds (max {max})", max = MAX_SIGNED_URL_TTL)]
    InvalidTtl(u64),
}

pub type MediaResult<T> = Result<T, MediaError>;

/// Configuration for object storage
#[derive(Debug, Clone)]
pub struct MediaConfig {
    /// Filesystem root of all buckets
    pub root: PathBuf,
    /// URL prefix used to build public and signed URLs
    pub public_base_url: String,
    /// Secret used to sign private URLs
    pub signing_secret: String,
    /// Maximum upload size in bytes (default: 5MB)
    pub max_upload_bytes: usize,
    /// Buckets readable without a signature
    pub public_buckets: Vec<String>,
    /// Buckets readable only with a signature
    pub private_buckets: Vec<String>,
}

impl MediaConfig {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into(),
            signing_secret: String::new(),
            max_upload_bytes: 5 * 1024 * 1024,
            public_buckets: vec![PRODUCT_IMAGES_BUCKET.to_string(), AVATARS_BUCKET.to_string()],
            private_buckets: vec![CUSTOM_ORDERS_BUCKET.to_string()],
        }
    }

    pub fn with_signing_secret(mut self, secret: impl Into<String>) -> Self {
        self.signing_secret = secret.into();
        self
    }

    pub fn with_max_upload_bytes(mut self, max: usize) -> Self {
        self.max_upload_bytes = max;
        self
    }
}

/// Query parameters of a signed URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlSignature {
    pub expires: u64,
    pub signature: String,
}

/// Filesystem-backed object store
pub struct MediaStore {
    config: MediaConfig,
}

impl MediaStore {
    pub fn new(config: MediaConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MediaConfig {
        &self.config
    }

    pub fn is_public(&self, bucket: &str) -> bool {
        self.config.public_buckets.iter().any(|b| b == bucket)
    }

    fn check_bucket(&self, bucket: &str) -> MediaResult<()> {
        let private = self.config.private_buckets.iter().any(|b| b == bucket);
        if self.is_public(bucket) || private {
            Ok(())
        } else {
            Err(MediaError::UnknownBucket(bucket.to_string()))
        }
    }

    /// Resolve an object path inside its bucket directory
    fn object_file(&self, bucket: &str, path: &str) -> MediaResult<PathBuf> {
        self.check_bucket(bucket)?;
        validate_object_path(path)?;
        Ok(self.config.root.join(bucket).join(path))
    }

    /// Store an object. Existing objects are only replaced when `upsert` is set.
    pub async fn upload(
        &self,
        bucket: &str,
        path: &str,
        content_type: &str,
        bytes: &[u8],
        upsert: bool,
    ) -> MediaResult<String> {
        validate_image(content_type, bytes.len(), self.config.max_upload_bytes)?;
        let file = self.object_file(bucket, path)?;

        if !upsert && fs::try_exists(&file).await? {
            return Err(MediaError::AlreadyExists(format!("{}/{}", bucket, path)));
        }
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&file, bytes).await?;

        info!("Uploaded {}/{} ({} bytes)", bucket, path, bytes.len());
        Ok(path.to_string())
    }

    pub async fn read(&self, bucket: &str, path: &str) -> MediaResult<Vec<u8>> {
        let file = self.object_file(bucket, path)?;
        match fs::read(&file).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(MediaError::NotFound(format!("{}/{}", bucket, path)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete objects; missing objects are skipped. Returns how many were removed.
    pub async fn remove(&self, bucket: &str, paths: &[&str]) -> MediaResult<usize> {
        let mut removed = 0;
        for path in paths {
            let file = self.object_file(bucket, path)?;
            match fs::remove_file(&file).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!("Nothing to remove at {}/{}", bucket, path);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }

    pub fn public_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/media/{}/{}",
            self.config.public_base_url.trim_end_matches('/'),
            bucket,
            path
        )
    }

    fn signature_for(&self, bucket: &str, path: &str, expires: u64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.config.signing_secret.as_bytes());
        hasher.update(format!("{}/{}", bucket, path).as_bytes());
        hasher.update(expires.to_le_bytes());
        hex::encode(hasher.finalize())
    }

    /// Time-limited URL for an object, valid for `ttl_seconds` from `now`
    pub fn signed_url(
        &self,
        bucket: &str,
        path: &str,
        ttl_seconds: u64,
        now: u64,
    ) -> MediaResult<String> {
        self.check_bucket(bucket)?;
        validate_object_path(path)?;

        if ttl_seconds == 0 || ttl_seconds > MAX_SIGNED_URL_TTL {
            return Err(MediaError::InvalidTtl(ttl_seconds));
        }
        let expires = now
            .checked_add(ttl_seconds)
            .ok_or(MediaError::InvalidTtl(ttl_seconds))?;
        let signature = self.signature_for(bucket, path, expires);
        Ok(format!(
            "{}?expires={}&signature={}",
            self.public_url(bucket, path),
            expires,
            signature
        ))
    }

    /// Check a signed URL's parameters at time `now`
    pub fn verify_signature(
        &self,
        bucket: &str,
        path: &str,
        signature: &UrlSignature,
        now: u64,
    ) -> bool {
        signature.expires >= now
            && self.signature_for(bucket, path, signature.expires) == signature.signature
    }
}

/// Check that a file is an image within the size limit
pub fn validate_image(content_type: &str, size: usize, max: usize) -> MediaResult<()> {
    if !content_type.starts_with("image/") {
        return Err(MediaError::NotAnImage(content_type.to_string()));
    }
    if size > max {
        return Err(MediaError::TooLarge { size, max });
    }
    Ok(())
}

/// Reject paths that could escape their bucket
pub fn validate_object_path(path: &str) -> MediaResult<()> {
    let invalid = || MediaError::InvalidPath(path.to_string());

    if path.is_empty() || path.contains('\\') || path.split('/').any(str::is_empty) {
        return Err(invalid());
    }
    let all_normal = Path::new(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if !all_normal {
        return Err(invalid());
    }
    Ok(())
}

/// Object name `<prefix>/<millis>.<ext>` for an uploaded file
pub fn object_name(prefix: &str, file_name: &str, now_millis: i64) -> String {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_else(|| "bin".to_string());
    format!("{}/{}.{}", prefix.trim_matches('/'), now_millis, ext)
}

/// Content type for a stored object, from its extension
pub fn content_type_for(path: &str) -> &'static str {
    let ext = path.rsplit('.').next().unwrap_or("").to_lowercase();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "avif" => "image/avif",
        _ => "application/octet-stream",
    }
}
