use axum::{
    extract::{Query, State},
    response::Redirect,
    Json,
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    auth::{password, AuthenticatedUser},
    credentials::CredentialStore,
    error::{AppError, AppResult},
    models::OauthApplication,
    state::AppState,
};

#[derive(Deserialize)]
pub struct AuthorizeParams {
    pub client_id: String,
    pub redirect_uri: String,
    pub response_type: Option<String>,
    pub state: Option<String>,
    /// Set to `false` by the consent UI when the user declines.
    pub approve: Option<bool>,
}

#[derive(Deserialize)]
pub struct TokenRequest {
    pub grant_type: String,
    pub client_id: String,
    pub client_secret: String,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub refresh_token: Option<String>,
}

#[derive(Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub refresh_token: String,
}

fn redirect_with(redirect_uri: &str, params: &[(&str, &str)]) -> AppResult<Redirect> {
    let mut url = Url::parse(redirect_uri)
        .map_err(|_| AppError::invalid_request("redirect_uri is not a valid URL"))?;
    for (key, value) in params {
        url.query_pairs_mut().append_pair(key, value);
    }
    Ok(Redirect::to(url.as_str()))
}

/// Authorization endpoint. Validation failures are reported to the caller
/// directly; nothing is ever sent to an unregistered redirect target, and no
/// code exists until every check has passed.
pub async fn authorize(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(params): Query<AuthorizeParams>,
) -> AppResult<Redirect> {
    if let Some(response_type) = &params.response_type {
        if response_type != "code" {
            return Err(AppError::invalid_request(
                "only the code response_type is supported",
            ));
        }
    }

    let app = state
        .credentials
        .application_by_client_id(&params.client_id)
        .await
        .map_err(AppError::internal)?
        .filter(|app| app.active)
        .ok_or_else(AppError::invalid_client)?;

    // Exact string match only; prefix tricks land here and stop.
    if app.redirect_uri != params.redirect_uri {
        return Err(AppError::invalid_request("redirect_uri mismatch"));
    }

    let state_param = params.state.as_deref();
    if params.approve == Some(false) {
        let mut query: Vec<(&str, &str)> = vec![("error", "access_denied")];
        if let Some(value) = state_param {
            query.push(("state", value));
        }
        return redirect_with(&app.redirect_uri, &query);
    }

    let code = state
        .credentials
        .issue_code(&app.client_id, user.user_id, &app.redirect_uri)
        .await
        .map_err(AppError::internal)?;

    let mut query: Vec<(&str, &str)> = vec![("code", code.as_str())];
    if let Some(value) = state_param {
        query.push(("state", value));
    }
    redirect_with(&app.redirect_uri, &query)
}

/// Token endpoint. Client authentication failures all collapse into
/// `invalid_client`, and grant failures into a single coarse message, so the
/// response never reveals which specific check failed.
pub async fn token(
    State(state): State<AppState>,
    Json(payload): Json<TokenRequest>,
) -> AppResult<Json<TokenResponse>> {
    let app = authenticate_client(&state, &payload.client_id, &payload.client_secret).await?;

    match payload.grant_type.as_str() {
        "authorization_code" => {
            let code = payload
                .code
                .as_deref()
                .ok_or_else(|| AppError::invalid_request("code is required"))?;
            let redirect_uri = payload
                .redirect_uri
                .as_deref()
                .ok_or_else(|| AppError::invalid_request("redirect_uri is required"))?;

            let grant = state
                .credentials
                .redeem_code(code)
                .await
                .map_err(AppError::internal)?
                .filter(|grant| {
                    grant.client_id == app.client_id && grant.redirect_uri == redirect_uri
                })
                .ok_or_else(|| {
                    AppError::invalid_request("invalid or expired authorization code")
                })?;

            let issued = state
                .credentials
                .issue_token(&app.client_id, grant.user_id)
                .await
                .map_err(AppError::internal)?;
            tracing::info!(client_id = %app.client_id, "issued token pair for authorization code");

            Ok(Json(to_token_response(issued)))
        }
        "refresh_token" => {
            let refresh_token = payload
                .refresh_token
                .as_deref()
                .ok_or_else(|| AppError::invalid_request("refresh_token is required"))?;

            let issued = state
                .credentials
                .rotate_token(refresh_token, &app.client_id)
                .await
                .map_err(AppError::internal)?
                .ok_or_else(|| AppError::invalid_token("invalid or expired refresh token"))?;
            tracing::info!(client_id = %app.client_id, "rotated refresh token");

            Ok(Json(to_token_response(issued)))
        }
        _ => Err(AppError::invalid_request(
            "grant_type must be authorization_code or refresh_token",
        )),
    }
}

async fn authenticate_client(
    state: &AppState,
    client_id: &str,
    client_secret: &str,
) -> AppResult<OauthApplication> {
    let app = state
        .credentials
        .application_by_client_id(client_id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(AppError::invalid_client)?;

    let secret_ok = password::verify_secret(client_secret, &app.client_secret_hash).unwrap_or(false);
    if !secret_ok || !app.active {
        return Err(AppError::invalid_client());
    }
    Ok(app)
}

fn to_token_response(issued: crate::credentials::IssuedToken) -> TokenResponse {
    TokenResponse {
        access_token: issued.access_token,
        token_type: "Bearer".to_string(),
        expires_in: issued.expires_in,
        refresh_token: issued.refresh_token,
    }
}
