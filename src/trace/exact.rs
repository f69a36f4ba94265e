use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::{error::AppResult, scope::KnowledgeScope};

use super::{call_with_retry, truncate_snippet, MatchCandidate, MatchLocation, MatchOrigin};

/// One lexical hit from the external full-text index, scored with raw BM25.
#[derive(Debug, Clone)]
pub struct IndexHit {
    pub document_id: Uuid,
    pub document_name: String,
    pub knowledge_base_id: Uuid,
    pub score: f32,
    pub location: MatchLocation,
    pub snippet: String,
}

/// Query side of the external full-text search engine, restricted to a set
/// of knowledge bases.
#[async_trait]
pub trait SearchIndex: Send + Sync + 'static {
    async fn search(
        &self,
        text: &str,
        knowledge_base_ids: &[Uuid],
        limit: u32,
    ) -> Result<Vec<IndexHit>>;
}

/// Wraps the search index and normalizes BM25 relevance into [0, 1] with the
/// fixed map `s / (s + k)`. The constant is configuration so hybrid merging
/// stays reproducible across deployments.
pub struct ExactMatcher {
    index: Arc<dyn SearchIndex>,
    norm_k: f32,
    timeout: Duration,
}

impl ExactMatcher {
    pub fn new(index: Arc<dyn SearchIndex>, norm_k: f32, timeout: Duration) -> Self {
        Self {
            index,
            norm_k,
            timeout,
        }
    }

    pub async fn find_exact(
        &self,
        text: &str,
        scope: &KnowledgeScope,
        top_k: u32,
    ) -> AppResult<Vec<MatchCandidate>> {
        if scope.is_empty() {
            return Ok(Vec::new());
        }

        let kb_ids = scope.ids();
        let hits = call_with_retry("full-text index", self.timeout, || {
            self.index.search(text, &kb_ids, top_k)
        })
        .await?;

        Ok(hits
            .into_iter()
            .filter(|hit| scope.contains(hit.knowledge_base_id))
            .map(|hit| MatchCandidate {
                document_id: hit.document_id,
                document_name: hit.document_name,
                knowledge_base_id: hit.knowledge_base_id,
                score: normalize_bm25(hit.score, self.norm_k),
                origin: MatchOrigin::Exact,
                location: hit.location,
                snippet: truncate_snippet(&hit.snippet),
            })
            .collect())
    }
}

fn normalize_bm25(score: f32, k: f32) -> f32 {
    let score = score.max(0.0);
    let k = if k > 0.0 { k } else { 1.0 };
    score / (score + k)
}

/// Quickwit-style HTTP search API.
pub struct QuickwitSearchIndex {
    client: Client,
    endpoint: String,
    index: String,
}

impl QuickwitSearchIndex {
    pub fn new(endpoint: impl Into<String>, index: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            index: index.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct QuickwitResponse {
    hits: Vec<QuickwitHit>,
}

#[derive(Debug, Deserialize)]
struct QuickwitHit {
    score: f32,
    document_id: Uuid,
    document_name: String,
    knowledge_base_id: Uuid,
    start_offset: u32,
    end_offset: u32,
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    snippet: String,
}

#[async_trait]
impl SearchIndex for QuickwitSearchIndex {
    async fn search(
        &self,
        text: &str,
        knowledge_base_ids: &[Uuid],
        limit: u32,
    ) -> Result<Vec<IndexHit>> {
        let url = format!("{}/api/v1/{}/search", self.endpoint, self.index);
        let kb_filter: Vec<String> = knowledge_base_ids.iter().map(Uuid::to_string).collect();
        let body = json!({
            "query": text.to_lowercase(),
            "search_field": "text",
            "filter": { "knowledge_base_id": kb_filter },
            "max_hits": limit,
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("full-text search request failed")?
            .error_for_status()
            .context("full-text search returned an error status")?;

        let parsed: QuickwitResponse = response
            .json()
            .await
            .context("full-text search returned malformed JSON")?;

        Ok(parsed
            .hits
            .into_iter()
            .map(|hit| IndexHit {
                document_id: hit.document_id,
                document_name: hit.document_name,
                knowledge_base_id: hit.knowledge_base_id,
                score: hit.score,
                location: MatchLocation::Text {
                    start: hit.start_offset,
                    end: hit.end_offset,
                    page: hit.page,
                },
                snippet: hit.snippet,
            })
            .collect())
    }
}
