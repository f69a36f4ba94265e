pub mod render;

use std::collections::HashMap;

use anyhow::Context;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{credentials::generate_opaque_token, trace::MatchLocation};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PreviewTokenError {
    #[error("preview token not found")]
    NotFound,
    #[error("preview token expired")]
    Expired,
    #[error("preview token already used")]
    AlreadyUsed,
}

/// What a preview token unlocks: one document, one set of highlights, for
/// the user it was minted for.
#[derive(Debug, Clone)]
pub struct PreviewGrant {
    pub document_id: Uuid,
    pub user_id: Uuid,
    pub locator: Vec<MatchLocation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    Valid,
    Consumed,
}

struct Entry {
    grant: PreviewGrant,
    expires_at: DateTime<Utc>,
    state: EntryState,
}

/// Arena of single-use preview grants keyed by opaque token value. The
/// valid→consumed transition happens under one lock, so a replayed preview
/// click cannot unlock the document twice.
pub struct PreviewTokens {
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl PreviewTokens {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn issue(
        &self,
        document_id: Uuid,
        user_id: Uuid,
        locator: Vec<MatchLocation>,
    ) -> String {
        let token = generate_opaque_token();
        let entry = Entry {
            grant: PreviewGrant {
                document_id,
                user_id,
                locator,
            },
            expires_at: Utc::now() + self.ttl,
            state: EntryState::Valid,
        };

        let mut entries = self.entries.lock().await;
        entries.insert(token.clone(), entry);
        token
    }

    pub async fn redeem(&self, token: &str) -> Result<PreviewGrant, PreviewTokenError> {
        let mut entries = self.entries.lock().await;
        let entry = entries.get_mut(token).ok_or(PreviewTokenError::NotFound)?;

        if entry.expires_at <= Utc::now() {
            return Err(PreviewTokenError::Expired);
        }
        if entry.state == EntryState::Consumed {
            return Err(PreviewTokenError::AlreadyUsed);
        }

        entry.state = EntryState::Consumed;
        Ok(entry.grant.clone())
    }

    /// Drops expired and consumed entries; the arena otherwise only grows.
    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now && entry.state == EntryState::Valid);
        before - entries.len()
    }
}

pub fn encode_locator(locator: &[MatchLocation]) -> anyhow::Result<String> {
    let json = serde_json::to_vec(locator).context("failed to serialize highlight locator")?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

pub fn decode_locator(encoded: &str) -> anyhow::Result<Vec<MatchLocation>> {
    let json = URL_SAFE_NO_PAD
        .decode(encoded)
        .context("highlight locator is not valid base64")?;
    serde_json::from_slice(&json).context("highlight locator is not valid JSON")
}
