use axum::{
    extract::{Path, Query, State},
    response::Html,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    directory::Directory,
    error::{AppError, AppResult},
    preview::{decode_locator, render::render_preview_page, PreviewTokenError},
    state::AppState,
    storage::ObjectStorage,
};

#[derive(Deserialize)]
pub struct PreviewParams {
    pub token: String,
    /// Client-side copy of the locator; the token's server-side locator
    /// wins whenever it is present.
    pub highlight: Option<String>,
}

pub async fn document_preview(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    Query(params): Query<PreviewParams>,
) -> AppResult<Html<String>> {
    let grant = state
        .previews
        .redeem(&params.token)
        .await
        .map_err(|err| match err {
            PreviewTokenError::NotFound => AppError::invalid_token("unknown preview token"),
            PreviewTokenError::Expired => AppError::invalid_token("preview token expired"),
            PreviewTokenError::AlreadyUsed => {
                AppError::invalid_token("preview token already used")
            }
        })?;

    if grant.document_id != document_id {
        return Err(AppError::access_denied(
            "preview token does not match this document",
        ));
    }

    let locator = if grant.locator.is_empty() {
        match &params.highlight {
            Some(encoded) => decode_locator(encoded)
                .map_err(|_| AppError::invalid_request("malformed highlight locator"))?,
            None => Vec::new(),
        }
    } else {
        grant.locator
    };

    let document = state
        .directory
        .document(document_id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(AppError::document_not_found)?;

    let bytes = state
        .storage
        .get_object(&document.text_object_key)
        .await
        .map_err(AppError::internal)?;
    let content = String::from_utf8_lossy(&bytes);

    Ok(Html(render_preview_page(&document.name, &content, &locator)))
}
