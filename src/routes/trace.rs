use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::OAuthUser,
    error::{AppError, AppResult},
    preview::encode_locator,
    scope::resolve_scope,
    trace::{MatchCandidate, MatchLocation, TraceQuery},
    state::AppState,
};

#[derive(Deserialize)]
pub struct TextTraceRequest {
    pub text: String,
    pub match_mode: Option<String>,
    pub top_k: Option<i64>,
    pub threshold: Option<f64>,
}

#[derive(Serialize)]
pub struct TraceMatch {
    pub document_id: Uuid,
    pub document_name: String,
    pub knowledge_base: String,
    pub score: f32,
    pub preview_url: String,
    pub matched_text: String,
}

#[derive(Serialize)]
pub struct TextTraceResponse {
    pub matches: Vec<TraceMatch>,
    pub total: usize,
}

pub async fn text_trace(
    State(state): State<AppState>,
    user: OAuthUser,
    Json(payload): Json<TextTraceRequest>,
) -> AppResult<Json<TextTraceResponse>> {
    // Cheap rejection first; a throttled caller never reaches the matchers.
    if !state.limiter.check(user.user_id).await {
        return Err(AppError::rate_limit_exceeded());
    }

    let query = TraceQuery::from_request(
        &payload.text,
        payload.match_mode.as_deref(),
        payload.top_k,
        payload.threshold,
    )?;

    let scope = resolve_scope(state.directory.as_ref(), user.user_id).await?;
    if scope.is_empty() {
        return Ok(Json(TextTraceResponse {
            matches: Vec::new(),
            total: 0,
        }));
    }

    let candidates = state.ranker.match_text(&payload.text, &scope, &query).await?;
    tracing::info!(
        user_id = %user.user_id,
        client_id = %user.client_id,
        total = candidates.len(),
        "text trace completed"
    );

    let mut matches = Vec::with_capacity(candidates.len());
    for candidate in &candidates {
        let locator = document_locator(&candidates, candidate.document_id);
        let token = state
            .previews
            .issue(candidate.document_id, user.user_id, locator.clone())
            .await;
        let highlight = encode_locator(&locator).map_err(AppError::internal)?;
        let preview_url = format!(
            "/open/document/preview/{}?token={}&highlight={}",
            candidate.document_id, token, highlight
        );

        matches.push(TraceMatch {
            document_id: candidate.document_id,
            document_name: candidate.document_name.clone(),
            knowledge_base: scope
                .name_of(candidate.knowledge_base_id)
                .unwrap_or_default()
                .to_string(),
            score: candidate.score,
            preview_url,
            matched_text: candidate.snippet.clone(),
        });
    }

    Ok(Json(TextTraceResponse {
        total: matches.len(),
        matches,
    }))
}

/// Every location this result set found in one document, so the preview can
/// step through all of them.
fn document_locator(candidates: &[MatchCandidate], document_id: Uuid) -> Vec<MatchLocation> {
    candidates
        .iter()
        .filter(|candidate| candidate.document_id == document_id)
        .map(|candidate| candidate.location.clone())
        .collect()
}
