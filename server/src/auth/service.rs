//! Session token issuing and verification.
//!
//! Tokens are HS256 JWTs carrying the owner id, email and a random `jti`.
//! Signing out revokes the `jti` until the token would have expired anyway.

use dashmap::DashMap;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::{hash_password, AuthConfig, AuthError, AuthEvent, Session};

/// Session token claims
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionClaims {
    /// Subject (owner id)
    sub: String,
    email: String,
    /// Issued at timestamp
    iat: u64,
    /// Expiration timestamp
    exp: u64,
    /// JWT ID
    jti: String,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Generate a random token identifier
fn generate_token_id() -> String {
    let random_bytes: [u8; 16] = rand::random();
    hex::encode(random_bytes)
}

/// Identity service for the storefront administrator
pub struct AuthService {
    config: AuthConfig,
    owner_id: String,
    /// Revoked token ids -> their expiry
    revoked: DashMap<String, u64>,
    events: broadcast::Sender<AuthEvent>,
}

impl AuthService {
    pub fn new(config: AuthConfig) -> Result<Self, AuthError> {
        config.validate()?;
        let (events, _) = broadcast::channel(64);
        Ok(Self {
            owner_id: config.admin_owner_id(),
            config,
            revoked: DashMap::new(),
            events,
        })
    }

    /// Owner id of the administrator
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Exchange credentials for a session
    pub fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let email_matches =
            email.trim().eq_ignore_ascii_case(self.config.admin_email.trim());
        let password_matches = constant_time_eq(
            hash_password(password).as_bytes(),
            self.config.admin_password_hash.as_bytes(),
        );

        if !(email_matches && password_matches) {
            warn!("Rejected sign-in for {}", email);
            return Err(AuthError::InvalidCredentials);
        }

        let session = self.issue(self.config.session_ttl_seconds)?;
        info!("Administrator signed in: {}", session.email);
        let _ = self.events.send(AuthEvent::SignedIn {
            user_id: session.user_id.clone(),
        });
        Ok(session)
    }

    fn issue(&self, ttl_seconds: u64) -> Result<Session, AuthError> {
        let now = now_secs();
        let exp = now.checked_add(ttl_seconds).ok_or_else(|| {
            AuthError::InvalidConfig(format!("Session TTL {} overflows", ttl_seconds))
        })?;

        let claims = SessionClaims {
            sub: self.owner_id.clone(),
            email: self.config.admin_email.clone(),
            iat: now,
            exp,
            jti: generate_token_id(),
        };

        let header = Header::new(Algorithm::HS256);
        let key = EncodingKey::from_secret(self.config.secret.as_bytes());
        let token = encode(&header, &claims, &key)?;

        Ok(Session {
            user_id: claims.sub,
            email: claims.email,
            token,
            expires_at: exp,
        })
    }

    fn decode_claims(&self, token: &str) -> Result<SessionClaims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        let key = DecodingKey::from_secret(self.config.secret.as_bytes());
        let data = decode::<SessionClaims>(token, &key, &validation)?;

        if self.revoked.contains_key(&data.claims.jti) {
            return Err(AuthError::Revoked);
        }
        Ok(data.claims)
    }

    /// Resolve the session a bearer token stands for
    pub fn current_session(&self, token: &str) -> Result<Session, AuthError> {
        let claims = self.decode_claims(token)?;
        Ok(Session {
            user_id: claims.sub,
            email: claims.email,
            token: token.to_string(),
            expires_at: claims.exp,
        })
    }

    /// Revoke the session behind `token`
    pub fn sign_out(&self, token: &str) -> Result<(), AuthError> {
        let claims = self.decode_claims(token)?;
        self.revoked.insert(claims.jti, claims.exp);

        info!("Administrator signed out: {}", claims.email);
        let _ = self.events.send(AuthEvent::SignedOut {
            user_id: claims.sub,
        });
        Ok(())
    }

    /// Subscribe to sign-in / sign-out notifications
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    /// Drop revocations of tokens that have expired on their own
    pub fn purge_revoked(&self) -> usize {
        let now = now_secs();
        let before = self.revoked.len();
        self.revoked.retain(|_, exp| *exp > now);
        let removed = before - self.revoked.len();
        if removed > 0 {
            debug!("Purged {} expired revocations", removed);
        }
        removed
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
