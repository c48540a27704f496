//! Storefront Server - Site Configuration Store
//!
//! Serves the storefront's site-wide configuration and its version history:
//! - Sled embedded database for configuration rows and history snapshots
//! - Local cache and theme projection for the running configuration
//! - Axum HTTP API for the public storefront and the admin panel
//! - Object storage for product and custom-order images

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, DefaultBodyLimit, FromRequestParts, Path, Query, State},
    http::{header, request::Parts, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::sync::broadcast;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, error, info, warn};

mod auth;
mod cache;
mod media;
mod server_config;
mod site;
mod storage;
mod store;
mod theme;

use anyhow::Context;
use auth::{AuthError, AuthEvent, AuthService, Session};
use cache::{LocalCache, SessionMarker};
use media::{content_type_for, object_name, MediaError, MediaStore, UrlSignature};
use server_config::ServerConfig;
use site::{SiteConfig, SiteConfigPatch, VersionSummary};
use storage::{ConfigRepository, SledRepository, StorageError};
use store::{ConfigStore, StoreError};
use theme::ThemeApplicator;

/// Default lifetime of a signed media URL
const DEFAULT_SIGNED_URL_TTL: u64 = 60 * 60;

/// Interval between purges of expired token revocations
const REVOCATION_PURGE_INTERVAL: Duration = Duration::from_secs(5 * 60);

// ============================================================================
// APPLICATION STATE
// ============================================================================

/// Shared application state
pub struct AppState {
    /// Configuration store
    store: Arc<ConfigStore>,
    /// Administrator identity
    auth: Arc<AuthService>,
    /// Media object storage
    media: Arc<MediaStore>,
    /// Last admin session, kept across restarts
    marker: SessionMarker,
    /// Server start time
    started_at: std::time::Instant,
}

impl AppState {
    pub fn new(
        config: &ServerConfig,
        repository: Arc<dyn ConfigRepository>,
    ) -> Result<Self, AuthError> {
        let auth = Arc::new(AuthService::new(config.auth.clone())?);
        let theme = Arc::new(ThemeApplicator::new());
        let cache = LocalCache::new(&config.cache_dir);
        debug!("Local configuration cache at {}", cache.path().display());
        let store = Arc::new(ConfigStore::new(repository, cache, theme));

        Ok(Self {
            store,
            auth,
            media: Arc::new(MediaStore::new(config.media.clone())),
            marker: SessionMarker::new(&config.cache_dir),
            started_at: std::time::Instant::now(),
        })
    }

    /// Initial load, as the previous admin session if it is still valid
    pub async fn restore_session(&self) -> Option<Session> {
        let session = match self.marker.token() {
            Some(token) => match self.auth.current_session(&token) {
                Ok(session) => {
                    info!("Resuming admin session for {}", session.email);
                    Some(session)
                }
                Err(e) => {
                    debug!("Discarding stale admin session: {}", e);
                    self.marker.clear();
                    None
                }
            },
            None => None,
        };

        self.store.load(session.as_ref()).await;
        session
    }

    /// Reload the public configuration whenever the administrator signs out
    pub fn spawn_auth_listener(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let state = self.clone();
        let mut events = self.auth.subscribe();

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(AuthEvent::SignedIn { user_id }) => {
                        debug!("Auth event: {} signed in", user_id);
                    }
                    Ok(AuthEvent::SignedOut { user_id }) => {
                        info!("{} signed out, reloading public configuration", user_id);
                        state.store.load(None).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Auth listener lagged by {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Error, Debug)]
enum ApiError {
    #[error("Missing or invalid session")]
    Unauthorized,

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Media(#[from] MediaError),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(e) => match e {
                StoreError::Unauthorized => StatusCode::UNAUTHORIZED,
                StoreError::VersionNotFound(_) => StatusCode::NOT_FOUND,
                StoreError::InvalidChange(_) => StatusCode::BAD_REQUEST,
                StoreError::Storage(StorageError::Unavailable(_)) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                StoreError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Auth(e) => match e {
                AuthError::InvalidConfig(_) => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::UNAUTHORIZED,
            },
            ApiError::Media(e) => match e {
                MediaError::UnknownBucket(_) | MediaError::NotFound(_) => StatusCode::NOT_FOUND,
                MediaError::InvalidPath(_)
                | MediaError::NotAnImage(_)
                | MediaError::InvalidTtl(_) => StatusCode::BAD_REQUEST,
                MediaError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                MediaError::AlreadyExists(_) => StatusCode::CONFLICT,
                MediaError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        };

        if status.is_server_error() {
            error!("Request failed: {}", self);
        }

        let body = ErrorBody {
            success: false,
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

// ============================================================================
// SESSION EXTRACTION
// ============================================================================

/// Session of the administrator making the request
struct AdminSession(Session);

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminSession {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(ApiError::Unauthorized)?;
        let session = state.auth.current_session(token).map_err(|e| {
            debug!("Rejected bearer token: {}", e);
            ApiError::Unauthorized
        })?;
        Ok(AdminSession(session))
    }
}

/// Session of the caller if the bearer token resolves to one.
///
/// Configuration mutations take this so that the store makes the
/// authorization decision.
struct OptionalSession(Option<Session>);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for OptionalSession {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let session = bearer_token(&parts.headers).and_then(|token| {
            state
                .auth
                .current_session(token)
                .map_err(|e| debug!("Ignoring bearer token: {}", e))
                .ok()
        });
        Ok(OptionalSession(session))
    }
}

// ============================================================================
// API TYPES
// ============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_seconds: u64,
    config_loaded: bool,
    loading: bool,
    current_version: Option<u64>,
    last_error: Option<String>,
    theme_applied: bool,
}

#[derive(Debug, Deserialize)]
struct ShippingQuery {
    subtotal: f64,
}

#[derive(Debug, Serialize)]
struct ShippingResponse {
    subtotal: f64,
    shipping: f64,
    free_shipping_threshold: f64,
}

#[derive(Debug, Deserialize)]
struct SignInRequest {
    email: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct SuccessResponse {
    success: bool,
}

#[derive(Debug, Deserialize)]
struct UpdateConfigRequest {
    changes: SiteConfigPatch,
    description: Option<String>,
}

#[derive(Debug, Serialize)]
struct ConfigResponse {
    config: SiteConfig,
    current_version: Option<u64>,
    history: Vec<VersionSummary>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct HistoryResponse {
    history: Vec<VersionSummary>,
    total: usize,
}

#[derive(Debug, Deserialize)]
struct UploadQuery {
    upsert: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct NamedUploadQuery {
    prefix: Option<String>,
    file_name: String,
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    path: String,
    /// Direct URL, for public buckets only
    public_url: Option<String>,
}

#[derive(Debug, Serialize)]
struct RemoveResponse {
    removed: usize,
}

#[derive(Debug, Deserialize)]
struct SignedUrlQuery {
    ttl: Option<u64>,
}

#[derive(Debug, Serialize)]
struct SignedUrlResponse {
    url: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct MediaQuery {
    expires: Option<u64>,
    signature: Option<String>,
}

impl ConfigResponse {
    fn from_store(store: &ConfigStore) -> Self {
        let state = store.state();
        Self {
            config: state.config.unwrap_or_default(),
            current_version: state.current_version,
            history: state.history,
            error: state.error,
        }
    }
}

fn unix_now() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
}

// ============================================================================
// HTTP HANDLERS
// ============================================================================

/// Health check endpoint
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        config_loaded: state.store.config().is_some(),
        loading: state.store.is_loading(),
        current_version: state.store.current_version(),
        last_error: state.store.last_error(),
        theme_applied: state.store.theme().is_applied(),
    })
}

/// Current storefront configuration, without the row and owner ids
async fn get_config(State(state): State<Arc<AppState>>) -> Json<SiteConfig> {
    let mut config = state.store.current();
    config.id = None;
    config.user_id = None;
    Json(config)
}

/// Theme variables as JSON
async fn theme_variables(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.store.theme().variables())
}

/// Shipping cost of a cart subtotal under the current configuration
async fn shipping_quote(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ShippingQuery>,
) -> Result<Json<ShippingResponse>, ApiError> {
    if !query.subtotal.is_finite() || query.subtotal < 0.0 {
        return Err(ApiError::MalformedPayload(
            "subtotal must be a non-negative number".to_string(),
        ));
    }
    let config = state.store.current();
    Ok(Json(ShippingResponse {
        subtotal: query.subtotal,
        shipping: config.shipping_for(query.subtotal),
        free_shipping_threshold: config.free_shipping_threshold,
    }))
}

/// Theme variables as a stylesheet
async fn theme_css(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/css; charset=utf-8")],
        state.store.theme().to_css(),
    )
}

async fn sign_in(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SignInRequest>, JsonRejection>,
) -> Result<Json<Session>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::MalformedPayload(e.body_text()))?;
    let session = state.auth.sign_in(&request.email, &request.password)?;

    state.marker.set(&session.token);
    state.store.load(Some(&session)).await;
    Ok(Json(session))
}

async fn sign_out(
    State(state): State<Arc<AppState>>,
    AdminSession(session): AdminSession,
) -> Result<Json<SuccessResponse>, ApiError> {
    state.auth.sign_out(&session.token)?;
    state.marker.clear();
    Ok(Json(SuccessResponse { success: true }))
}

async fn get_session(AdminSession(session): AdminSession) -> Json<Session> {
    Json(session)
}

/// Reload and return the administrator's configuration
async fn admin_get_config(
    State(state): State<Arc<AppState>>,
    AdminSession(session): AdminSession,
) -> Json<ConfigResponse> {
    state.store.load(Some(&session)).await;
    Json(ConfigResponse::from_store(&state.store))
}

async fn admin_update_config(
    State(state): State<Arc<AppState>>,
    OptionalSession(session): OptionalSession,
    payload: Result<Json<UpdateConfigRequest>, JsonRejection>,
) -> Result<Json<ConfigResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::MalformedPayload(e.body_text()))?;

    state
        .store
        .update(session.as_ref(), &request.changes, request.description.as_deref())
        .await?;
    Ok(Json(ConfigResponse::from_store(&state.store)))
}

async fn admin_history(
    State(state): State<Arc<AppState>>,
    OptionalSession(session): OptionalSession,
) -> Result<Json<HistoryResponse>, ApiError> {
    let history = state.store.refresh_history(session.as_ref()).await?;
    let total = history.len();
    Ok(Json(HistoryResponse { history, total }))
}

async fn admin_restore(
    State(state): State<Arc<AppState>>,
    OptionalSession(session): OptionalSession,
    Path(version_number): Path<u64>,
) -> Result<Json<ConfigResponse>, ApiError> {
    state
        .store
        .restore_version(session.as_ref(), version_number)
        .await?;
    Ok(Json(ConfigResponse::from_store(&state.store)))
}

async fn upload_media(
    State(state): State<Arc<AppState>>,
    AdminSession(_): AdminSession,
    Path((bucket, path)): Path<(String, String)>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<UploadResponse>, ApiError> {
    store_object(&state, &bucket, &path, &headers, &body, query.upsert.unwrap_or(false)).await
}

/// Upload under a generated `<prefix>/<millis>.<ext>` name
async fn upload_named_media(
    State(state): State<Arc<AppState>>,
    AdminSession(_): AdminSession,
    Path(bucket): Path<String>,
    Query(query): Query<NamedUploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<UploadResponse>, ApiError> {
    let prefix = query.prefix.as_deref().unwrap_or("uploads");
    let path = object_name(prefix, &query.file_name, chrono::Utc::now().timestamp_millis());
    store_object(&state, &bucket, &path, &headers, &body, false).await
}

async fn store_object(
    state: &AppState,
    bucket: &str,
    path: &str,
    headers: &HeaderMap,
    body: &[u8],
    upsert: bool,
) -> Result<Json<UploadResponse>, ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream");

    let path = state
        .media
        .upload(bucket, path, content_type, body, upsert)
        .await?;

    let public_url = state
        .media
        .is_public(bucket)
        .then(|| state.media.public_url(bucket, &path));
    Ok(Json(UploadResponse { path, public_url }))
}

async fn delete_media(
    State(state): State<Arc<AppState>>,
    AdminSession(_): AdminSession,
    Path((bucket, path)): Path<(String, String)>,
) -> Result<Json<RemoveResponse>, ApiError> {
    let removed = state.media.remove(&bucket, &[path.as_str()]).await?;
    Ok(Json(RemoveResponse { removed }))
}

async fn media_url(
    State(state): State<Arc<AppState>>,
    AdminSession(_): AdminSession,
    Path((bucket, path)): Path<(String, String)>,
    Query(query): Query<SignedUrlQuery>,
) -> Result<Json<SignedUrlResponse>, ApiError> {
    let ttl = query.ttl.unwrap_or(DEFAULT_SIGNED_URL_TTL);
    let url = state.media.signed_url(&bucket, &path, ttl, unix_now())?;
    Ok(Json(SignedUrlResponse {
        url,
        expires_in: ttl,
    }))
}

/// Serve an object; private buckets require a valid signature
async fn serve_media(
    State(state): State<Arc<AppState>>,
    Path((bucket, path)): Path<(String, String)>,
    Query(query): Query<MediaQuery>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.media.is_public(&bucket) {
        let signature = match (query.expires, query.signature) {
            (Some(expires), Some(signature)) => UrlSignature { expires, signature },
            _ => return Err(ApiError::Unauthorized),
        };
        if !state
            .media
            .verify_signature(&bucket, &path, &signature, unix_now())
        {
            warn!("Rejected media signature for {}/{}", bucket, path);
            return Err(ApiError::Unauthorized);
        }
    }

    let bytes = state.media.read(&bucket, &path).await?;
    Ok(([(header::CONTENT_TYPE, content_type_for(&path))], bytes))
}

// ============================================================================
// ROUTER
// ============================================================================

fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    let upload_limit = state.media.config().max_upload_bytes;

    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Public storefront
        .route("/api/config", get(get_config))
        .route("/theme.css", get(theme_css))
        .route("/api/theme", get(theme_variables))
        .route("/api/shipping", get(shipping_quote))
        .route("/media/:bucket/*path", get(serve_media))
        // Identity
        .route("/api/auth/sign-in", post(sign_in))
        .route("/api/auth/sign-out", post(sign_out))
        .route("/api/auth/session", get(get_session))
        // Admin configuration
        .route(
            "/api/admin/config",
            get(admin_get_config).patch(admin_update_config),
        )
        .route("/api/admin/config/history", get(admin_history))
        .route(
            "/api/admin/config/history/:version/restore",
            post(admin_restore),
        )
        // Admin media
        .route("/api/admin/media/:bucket", post(upload_named_media))
        .route(
            "/api/admin/media/:bucket/*path",
            axum::routing::put(upload_media).delete(delete_media),
        )
        .route("/api/admin/media-url/:bucket/*path", get(media_url))
        // Add state and middleware
        .with_state(state)
        .layer(DefaultBodyLimit::max(upload_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

// ============================================================================
// MAIN ENTRY POINT
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "storefront_server=info,tower_http=info".into()),
        )
        .init();

    let config = ServerConfig::from_env().context("Invalid server configuration")?;

    // Initialize storage
    info!("Initializing storage at: {}", config.storage.path);
    let repository = SledRepository::open(&config.storage).context("Failed to open storage")?;
    let stats = repository.stats();
    info!(
        "Storage initialized: {} configurations, {} versions, {} bytes",
        stats.config_count, stats.version_count, stats.total_size_bytes
    );

    // Create application state and load the configuration
    let state = Arc::new(AppState::new(&config, Arc::new(repository))?);
    info!(
        "Administrator {} has owner id {}",
        config.auth.admin_email,
        state.auth.owner_id()
    );
    state.restore_session().await;

    // Start background tasks
    let _auth_listener = state.spawn_auth_listener();
    let auth = state.auth.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(REVOCATION_PURGE_INTERVAL);
        loop {
            interval.tick().await;
            auth.purge_revoked();
        }
    });

    let app = build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    info!("Storefront server v{} starting", env!("CARGO_PKG_VERSION"));
    info!("   Listening on: http://{}", addr);
    info!("   Public config: http://{}/api/config", addr);
    info!("   Health check: http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
