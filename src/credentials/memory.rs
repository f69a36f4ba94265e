use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{auth::password, models::OauthApplication};

use super::{
    generate_client_credentials, generate_opaque_token, hash_token, AccessTokenRecord, CodeGrant,
    CreatedApplication, CredentialStore, CredentialTtls, IssuedToken, PurgeReport,
};

#[derive(Debug, Clone)]
struct StoredCode {
    client_id: String,
    user_id: Uuid,
    redirect_uri: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct StoredToken {
    access_token_hash: String,
    refresh_token_hash: String,
    client_id: String,
    user_id: Uuid,
    access_expires_at: DateTime<Utc>,
    refresh_expires_at: DateTime<Utc>,
    refresh_consumed_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Inner {
    applications: Vec<OauthApplication>,
    codes: HashMap<String, StoredCode>,
    tokens: HashMap<Uuid, StoredToken>,
    access_index: HashMap<String, Uuid>,
    refresh_index: HashMap<String, Uuid>,
}

/// In-process credential store: every map lives behind one mutex, so
/// check-and-consume is naturally a single critical section. Suitable for
/// single-node deployments and for the test harness.
pub struct MemoryCredentialStore {
    ttls: CredentialTtls,
    inner: Mutex<Inner>,
}

impl MemoryCredentialStore {
    pub fn new(ttls: CredentialTtls) -> Self {
        Self {
            ttls,
            inner: Mutex::new(Inner::default()),
        }
    }
}

fn make_token(inner: &mut Inner, ttls: &CredentialTtls, client_id: &str, user_id: Uuid) -> IssuedToken {
    let access_token = generate_opaque_token();
    let refresh_token = generate_opaque_token();
    let now = Utc::now();
    let id = Uuid::new_v4();

    let stored = StoredToken {
        access_token_hash: hash_token(&access_token),
        refresh_token_hash: hash_token(&refresh_token),
        client_id: client_id.to_string(),
        user_id,
        access_expires_at: now + ttls.access_token,
        refresh_expires_at: now + ttls.refresh_token,
        refresh_consumed_at: None,
    };
    inner.access_index.insert(stored.access_token_hash.clone(), id);
    inner
        .refresh_index
        .insert(stored.refresh_token_hash.clone(), id);
    inner.tokens.insert(id, stored);

    IssuedToken {
        access_token,
        refresh_token,
        expires_in: ttls.access_token.num_seconds(),
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn create_application(
        &self,
        name: &str,
        redirect_uri: &str,
        owner_user_id: Uuid,
    ) -> Result<CreatedApplication> {
        let (client_id, client_secret) = generate_client_credentials();
        let now = Utc::now().naive_utc();
        let application = OauthApplication {
            id: Uuid::new_v4(),
            name: name.to_string(),
            client_id,
            client_secret_hash: password::hash_secret(&client_secret)?,
            redirect_uri: redirect_uri.to_string(),
            owner_user_id,
            active: true,
            created_at: now,
            updated_at: now,
        };

        let mut inner = self.inner.lock().await;
        inner.applications.push(application.clone());

        Ok(CreatedApplication {
            application,
            client_secret,
        })
    }

    async fn application_by_client_id(&self, client_id: &str) -> Result<Option<OauthApplication>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .applications
            .iter()
            .find(|app| app.client_id == client_id)
            .cloned())
    }

    async fn applications_by_owner(&self, owner_user_id: Uuid) -> Result<Vec<OauthApplication>> {
        let inner = self.inner.lock().await;
        let mut apps: Vec<OauthApplication> = inner
            .applications
            .iter()
            .filter(|app| app.owner_user_id == owner_user_id)
            .cloned()
            .collect();
        apps.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(apps)
    }

    async fn delete_application(&self, application_id: Uuid, owner_user_id: Uuid) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let before = inner.applications.len();
        inner
            .applications
            .retain(|app| !(app.id == application_id && app.owner_user_id == owner_user_id));
        Ok(inner.applications.len() < before)
    }

    async fn set_application_status(&self, client_id: &str, active: bool) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner
            .applications
            .iter_mut()
            .find(|app| app.client_id == client_id)
        {
            Some(app) => {
                app.active = active;
                app.updated_at = Utc::now().naive_utc();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn issue_code(
        &self,
        client_id: &str,
        user_id: Uuid,
        redirect_uri: &str,
    ) -> Result<String> {
        let code = generate_opaque_token();
        let stored = StoredCode {
            client_id: client_id.to_string(),
            user_id,
            redirect_uri: redirect_uri.to_string(),
            expires_at: Utc::now() + self.ttls.auth_code,
        };

        let mut inner = self.inner.lock().await;
        inner.codes.insert(hash_token(&code), stored);
        Ok(code)
    }

    async fn redeem_code(&self, code: &str) -> Result<Option<CodeGrant>> {
        let mut inner = self.inner.lock().await;
        // Removal and expiry check happen under the same lock; a second
        // caller finds nothing.
        match inner.codes.remove(&hash_token(code)) {
            Some(stored) if stored.expires_at > Utc::now() => Ok(Some(CodeGrant {
                client_id: stored.client_id,
                user_id: stored.user_id,
                redirect_uri: stored.redirect_uri,
            })),
            _ => Ok(None),
        }
    }

    async fn issue_token(&self, client_id: &str, user_id: Uuid) -> Result<IssuedToken> {
        let mut inner = self.inner.lock().await;
        Ok(make_token(&mut inner, &self.ttls, client_id, user_id))
    }

    async fn token_by_access(&self, access_token: &str) -> Result<Option<AccessTokenRecord>> {
        let inner = self.inner.lock().await;
        let record = inner
            .access_index
            .get(&hash_token(access_token))
            .and_then(|id| inner.tokens.get(id))
            .filter(|token| token.access_expires_at > Utc::now())
            .map(|token| AccessTokenRecord {
                user_id: token.user_id,
                client_id: token.client_id.clone(),
                expires_at: token.access_expires_at,
            });
        Ok(record)
    }

    async fn rotate_token(
        &self,
        refresh_token: &str,
        client_id: &str,
    ) -> Result<Option<IssuedToken>> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();

        let id = match inner.refresh_index.get(&hash_token(refresh_token)) {
            Some(id) => *id,
            None => return Ok(None),
        };
        let user_id = match inner.tokens.get_mut(&id) {
            Some(token)
                if token.client_id == client_id
                    && token.refresh_consumed_at.is_none()
                    && token.refresh_expires_at > now =>
            {
                token.refresh_consumed_at = Some(now);
                token.user_id
            }
            _ => return Ok(None),
        };

        Ok(Some(make_token(&mut inner, &self.ttls, client_id, user_id)))
    }

    async fn purge_expired(&self) -> Result<PurgeReport> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();

        let codes_before = inner.codes.len();
        inner.codes.retain(|_, code| code.expires_at > now);
        let codes = (codes_before - inner.codes.len()) as u64;

        let dead: Vec<Uuid> = inner
            .tokens
            .iter()
            .filter(|(_, token)| {
                token.access_expires_at <= now && token.refresh_expires_at <= now
            })
            .map(|(id, _)| *id)
            .collect();
        for id in &dead {
            if let Some(token) = inner.tokens.remove(id) {
                inner.access_index.remove(&token.access_token_hash);
                inner.refresh_index.remove(&token.refresh_token_hash);
            }
        }

        Ok(PurgeReport {
            codes,
            tokens: dead.len() as u64,
        })
    }
}
