use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    credentials::CredentialStore,
    error::{AppError, AppResult},
    models::OauthApplication,
    state::AppState,
};

#[derive(Deserialize)]
pub struct CreateApplicationRequest {
    pub name: String,
    pub redirect_uri: String,
}

#[derive(Serialize)]
pub struct ApplicationResponse {
    pub id: Uuid,
    pub name: String,
    pub client_id: String,
    /// Present exactly once, in the creation response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    pub active: bool,
    pub created_at: NaiveDateTime,
}

fn to_response(app: OauthApplication, client_secret: Option<String>) -> ApplicationResponse {
    ApplicationResponse {
        id: app.id,
        name: app.name,
        client_id: app.client_id,
        client_secret,
        redirect_uri: app.redirect_uri,
        active: app.active,
        created_at: app.created_at,
    }
}

pub async fn create_application(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateApplicationRequest>,
) -> AppResult<(StatusCode, Json<ApplicationResponse>)> {
    if payload.name.trim().is_empty() {
        return Err(AppError::invalid_request("name must not be empty"));
    }
    if Url::parse(&payload.redirect_uri).is_err() {
        return Err(AppError::invalid_request(
            "redirect_uri must be an absolute URL",
        ));
    }

    let created = state
        .credentials
        .create_application(payload.name.trim(), &payload.redirect_uri, user.user_id)
        .await
        .map_err(AppError::internal)?;

    Ok((
        StatusCode::CREATED,
        Json(to_response(
            created.application,
            Some(created.client_secret),
        )),
    ))
}

pub async fn list_applications(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<ApplicationResponse>>> {
    let apps = state
        .credentials
        .applications_by_owner(user.user_id)
        .await
        .map_err(AppError::internal)?;

    Ok(Json(
        apps.into_iter().map(|app| to_response(app, None)).collect(),
    ))
}

pub async fn delete_application(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(application_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let deleted = state
        .credentials
        .delete_application(application_id, user.user_id)
        .await
        .map_err(AppError::internal)?;

    if !deleted {
        return Err(AppError::not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}
