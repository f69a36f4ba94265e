pub mod jwt;
pub mod password;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{credentials::CredentialStore, error::AppError, state::AppState};

/// First-party user authenticated by a login JWT. Gates application
/// management and the authorize endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub username: String,
    pub role: String,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::unauthorized())?;

        let claims = state
            .jwt
            .verify_token(bearer.token())
            .map_err(|_| AppError::unauthorized())?;

        Ok(AuthenticatedUser {
            user_id: claims.sub,
            username: claims.username,
            role: claims.role,
        })
    }
}

/// Third-party caller authenticated by an opaque OAuth access token. The
/// token is resolved through the credential store, which evaluates expiry at
/// lookup time.
#[derive(Debug, Clone)]
pub struct OAuthUser {
    pub user_id: Uuid,
    pub client_id: String,
}

#[async_trait]
impl FromRequestParts<AppState> for OAuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::unauthorized())?;

        let record = state
            .credentials
            .token_by_access(bearer.token())
            .await
            .map_err(AppError::internal)?
            .ok_or_else(|| AppError::invalid_token("expired or unknown access token"))?;

        Ok(OAuthUser {
            user_id: record.user_id,
            client_id: record.client_id,
        })
    }
}
