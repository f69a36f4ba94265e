pub mod memory;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{config::AppConfig, models::OauthApplication};

pub use memory::MemoryCredentialStore;
pub use postgres::PgCredentialStore;

/// Grant and token lifetimes, sourced from configuration.
#[derive(Debug, Clone, Copy)]
pub struct CredentialTtls {
    pub auth_code: Duration,
    pub access_token: Duration,
    pub refresh_token: Duration,
}

impl CredentialTtls {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            auth_code: Duration::minutes(config.auth_code_ttl_minutes),
            access_token: Duration::minutes(config.access_token_ttl_minutes),
            refresh_token: Duration::days(config.refresh_token_ttl_days),
        }
    }
}

/// A freshly registered application together with the one-time plaintext
/// secret. The store only retains the argon2 hash.
#[derive(Debug, Clone)]
pub struct CreatedApplication {
    pub application: OauthApplication,
    pub client_secret: String,
}

/// What a successfully redeemed authorization code proves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeGrant {
    pub client_id: String,
    pub user_id: Uuid,
    pub redirect_uri: String,
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

#[derive(Debug, Clone)]
pub struct AccessTokenRecord {
    pub user_id: Uuid,
    pub client_id: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PurgeReport {
    pub codes: u64,
    pub tokens: u64,
}

/// Persistence contract for OAuth applications, authorization codes, and
/// token pairs.
///
/// `redeem_code` and `rotate_token` are single-winner operations: under
/// concurrent calls with the same value, exactly one succeeds and the rest
/// observe `None`. Expiry is evaluated against the clock at lookup, so a
/// grant that outlived its TTL is indistinguishable from one that never
/// existed.
#[async_trait]
pub trait CredentialStore: Send + Sync + 'static {
    async fn create_application(
        &self,
        name: &str,
        redirect_uri: &str,
        owner_user_id: Uuid,
    ) -> Result<CreatedApplication>;

    async fn application_by_client_id(&self, client_id: &str) -> Result<Option<OauthApplication>>;

    async fn applications_by_owner(&self, owner_user_id: Uuid) -> Result<Vec<OauthApplication>>;

    async fn delete_application(&self, application_id: Uuid, owner_user_id: Uuid) -> Result<bool>;

    async fn set_application_status(&self, client_id: &str, active: bool) -> Result<bool>;

    async fn issue_code(
        &self,
        client_id: &str,
        user_id: Uuid,
        redirect_uri: &str,
    ) -> Result<String>;

    async fn redeem_code(&self, code: &str) -> Result<Option<CodeGrant>>;

    async fn issue_token(&self, client_id: &str, user_id: Uuid) -> Result<IssuedToken>;

    async fn token_by_access(&self, access_token: &str) -> Result<Option<AccessTokenRecord>>;

    /// Consumes the refresh token and issues a fresh pair, provided the
    /// token belongs to `client_id` and is unexpired and unconsumed. The
    /// paired access token is left to age out on its own.
    async fn rotate_token(&self, refresh_token: &str, client_id: &str)
        -> Result<Option<IssuedToken>>;

    async fn purge_expired(&self) -> Result<PurgeReport>;
}

pub fn generate_opaque_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn generate_client_credentials() -> (String, String) {
    let mut id_bytes = [0u8; 24];
    OsRng.fill_bytes(&mut id_bytes);
    let mut secret_bytes = [0u8; 32];
    OsRng.fill_bytes(&mut secret_bytes);
    (hex::encode(id_bytes), hex::encode(secret_bytes))
}

/// Opaque values are stored hashed so a leaked table cannot be replayed.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}
