use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use diesel::prelude::*;
use diesel::PgConnection;
use uuid::Uuid;

use crate::{
    auth::password,
    db::PgPool,
    models::{NewAuthorizationCode, NewOauthApplication, NewOauthToken, OauthApplication},
    schema::{authorization_codes, oauth_applications, oauth_tokens},
};

use super::{
    generate_client_credentials, generate_opaque_token, hash_token, AccessTokenRecord, CodeGrant,
    CreatedApplication, CredentialStore, CredentialTtls, IssuedToken, PurgeReport,
};

/// Credential store backed by Postgres. Single-use redemption and rotation
/// are expressed as conditional single-statement writes so the database
/// arbitrates concurrent attempts.
pub struct PgCredentialStore {
    pool: PgPool,
    ttls: CredentialTtls,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool, ttls: CredentialTtls) -> Self {
        Self { pool, ttls }
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("credential store pool error: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("credential store task panicked")?
    }
}

fn insert_token(
    conn: &mut PgConnection,
    ttls: &CredentialTtls,
    client_id: &str,
    user_id: Uuid,
) -> Result<IssuedToken> {
    let access_token = generate_opaque_token();
    let refresh_token = generate_opaque_token();
    let now = Utc::now();

    let record = NewOauthToken {
        id: Uuid::new_v4(),
        access_token_hash: hash_token(&access_token),
        refresh_token_hash: hash_token(&refresh_token),
        client_id: client_id.to_string(),
        user_id,
        access_expires_at: (now + ttls.access_token).naive_utc(),
        refresh_expires_at: (now + ttls.refresh_token).naive_utc(),
    };

    diesel::insert_into(oauth_tokens::table)
        .values(&record)
        .execute(conn)
        .context("failed to insert token pair")?;

    Ok(IssuedToken {
        access_token,
        refresh_token,
        expires_in: ttls.access_token.num_seconds(),
    })
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn create_application(
        &self,
        name: &str,
        redirect_uri: &str,
        owner_user_id: Uuid,
    ) -> Result<CreatedApplication> {
        let name = name.to_string();
        let redirect_uri = redirect_uri.to_string();
        self.with_conn(move |conn| {
            let (client_id, client_secret) = generate_client_credentials();
            let record = NewOauthApplication {
                id: Uuid::new_v4(),
                name,
                client_id,
                client_secret_hash: password::hash_secret(&client_secret)?,
                redirect_uri,
                owner_user_id,
                active: true,
            };

            diesel::insert_into(oauth_applications::table)
                .values(&record)
                .execute(conn)
                .context("failed to insert application")?;

            let application: OauthApplication = oauth_applications::table
                .find(record.id)
                .first(conn)
                .context("failed to reload application")?;

            Ok(CreatedApplication {
                application,
                client_secret,
            })
        })
        .await
    }

    async fn application_by_client_id(&self, client_id: &str) -> Result<Option<OauthApplication>> {
        let client_id = client_id.to_string();
        self.with_conn(move |conn| {
            oauth_applications::table
                .filter(oauth_applications::client_id.eq(&client_id))
                .first::<OauthApplication>(conn)
                .optional()
                .context("failed to load application")
        })
        .await
    }

    async fn applications_by_owner(&self, owner_user_id: Uuid) -> Result<Vec<OauthApplication>> {
        self.with_conn(move |conn| {
            oauth_applications::table
                .filter(oauth_applications::owner_user_id.eq(owner_user_id))
                .order(oauth_applications::created_at.desc())
                .load::<OauthApplication>(conn)
                .context("failed to list applications")
        })
        .await
    }

    async fn delete_application(&self, application_id: Uuid, owner_user_id: Uuid) -> Result<bool> {
        self.with_conn(move |conn| {
            let deleted = diesel::delete(
                oauth_applications::table
                    .filter(oauth_applications::id.eq(application_id))
                    .filter(oauth_applications::owner_user_id.eq(owner_user_id)),
            )
            .execute(conn)
            .context("failed to delete application")?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn set_application_status(&self, client_id: &str, active: bool) -> Result<bool> {
        let client_id = client_id.to_string();
        self.with_conn(move |conn| {
            let updated = diesel::update(
                oauth_applications::table.filter(oauth_applications::client_id.eq(&client_id)),
            )
            .set((
                oauth_applications::active.eq(active),
                oauth_applications::updated_at.eq(Utc::now().naive_utc()),
            ))
            .execute(conn)
            .context("failed to update application status")?;
            Ok(updated > 0)
        })
        .await
    }

    async fn issue_code(
        &self,
        client_id: &str,
        user_id: Uuid,
        redirect_uri: &str,
    ) -> Result<String> {
        let client_id = client_id.to_string();
        let redirect_uri = redirect_uri.to_string();
        let ttl = self.ttls.auth_code;
        self.with_conn(move |conn| {
            let code = generate_opaque_token();
            let record = NewAuthorizationCode {
                code_hash: hash_token(&code),
                client_id,
                user_id,
                redirect_uri,
                expires_at: (Utc::now() + ttl).naive_utc(),
            };

            diesel::insert_into(authorization_codes::table)
                .values(&record)
                .execute(conn)
                .context("failed to insert authorization code")?;

            Ok(code)
        })
        .await
    }

    async fn redeem_code(&self, code: &str) -> Result<Option<CodeGrant>> {
        let code_hash = hash_token(code);
        self.with_conn(move |conn| {
            // Conditional delete-returning: the database picks exactly one
            // winner among concurrent redemptions, and an expired row is
            // never matched.
            let grant = diesel::delete(
                authorization_codes::table
                    .filter(authorization_codes::code_hash.eq(&code_hash))
                    .filter(authorization_codes::expires_at.gt(Utc::now().naive_utc())),
            )
            .returning((
                authorization_codes::client_id,
                authorization_codes::user_id,
                authorization_codes::redirect_uri,
            ))
            .get_result::<(String, Uuid, String)>(conn)
            .optional()
            .context("failed to redeem authorization code")?;

            Ok(grant.map(|(client_id, user_id, redirect_uri)| CodeGrant {
                client_id,
                user_id,
                redirect_uri,
            }))
        })
        .await
    }

    async fn issue_token(&self, client_id: &str, user_id: Uuid) -> Result<IssuedToken> {
        let client_id = client_id.to_string();
        let ttls = self.ttls;
        self.with_conn(move |conn| insert_token(conn, &ttls, &client_id, user_id))
            .await
    }

    async fn token_by_access(&self, access_token: &str) -> Result<Option<AccessTokenRecord>> {
        let access_hash = hash_token(access_token);
        self.with_conn(move |conn| {
            let row = oauth_tokens::table
                .filter(oauth_tokens::access_token_hash.eq(&access_hash))
                .filter(oauth_tokens::access_expires_at.gt(Utc::now().naive_utc()))
                .select((
                    oauth_tokens::user_id,
                    oauth_tokens::client_id,
                    oauth_tokens::access_expires_at,
                ))
                .first::<(Uuid, String, chrono::NaiveDateTime)>(conn)
                .optional()
                .context("failed to look up access token")?;

            Ok(row.map(|(user_id, client_id, expires_at)| AccessTokenRecord {
                user_id,
                client_id,
                expires_at: Utc.from_utc_datetime(&expires_at),
            }))
        })
        .await
    }

    async fn rotate_token(
        &self,
        refresh_token: &str,
        client_id: &str,
    ) -> Result<Option<IssuedToken>> {
        let refresh_hash = hash_token(refresh_token);
        let client_id = client_id.to_string();
        let ttls = self.ttls;
        self.with_conn(move |conn| {
            let now = Utc::now().naive_utc();
            // Single-winner consume of the refresh token.
            let consumed = diesel::update(
                oauth_tokens::table
                    .filter(oauth_tokens::refresh_token_hash.eq(&refresh_hash))
                    .filter(oauth_tokens::client_id.eq(&client_id))
                    .filter(oauth_tokens::refresh_expires_at.gt(now))
                    .filter(oauth_tokens::refresh_consumed_at.is_null()),
            )
            .set(oauth_tokens::refresh_consumed_at.eq(Some(now)))
            .returning(oauth_tokens::user_id)
            .get_result::<Uuid>(conn)
            .optional()
            .context("failed to consume refresh token")?;

            match consumed {
                Some(user_id) => Ok(Some(insert_token(conn, &ttls, &client_id, user_id)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn purge_expired(&self) -> Result<PurgeReport> {
        self.with_conn(move |conn| {
            let now = Utc::now().naive_utc();
            let codes = diesel::delete(
                authorization_codes::table.filter(authorization_codes::expires_at.le(now)),
            )
            .execute(conn)
            .context("failed to purge authorization codes")?;

            let tokens = diesel::delete(
                oauth_tokens::table
                    .filter(oauth_tokens::access_expires_at.le(now))
                    .filter(oauth_tokens::refresh_expires_at.le(now)),
            )
            .execute(conn)
            .context("failed to purge tokens")?;

            Ok(PurgeReport {
                codes: codes as u64,
                tokens: tokens as u64,
            })
        })
        .await
    }
}
