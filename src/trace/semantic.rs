use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::{error::AppResult, scope::KnowledgeScope};

use super::{call_with_retry, truncate_snippet, MatchCandidate, MatchLocation, MatchOrigin};

/// Turns query text into an embedding via the external embedding capability.
#[async_trait]
pub trait TextEmbedder: Send + Sync + 'static {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// One chunk hit from the external vector index, scored by cosine
/// similarity.
#[derive(Debug, Clone)]
pub struct ChunkHit {
    pub document_id: Uuid,
    pub document_name: String,
    pub knowledge_base_id: Uuid,
    pub score: f32,
    pub location: MatchLocation,
    pub snippet: String,
}

#[async_trait]
pub trait VectorIndex: Send + Sync + 'static {
    async fn search(
        &self,
        vector: &[f32],
        knowledge_base_ids: &[Uuid],
        limit: u32,
    ) -> Result<Vec<ChunkHit>>;
}

pub struct SemanticMatcher {
    embedder: Arc<dyn TextEmbedder>,
    index: Arc<dyn VectorIndex>,
    timeout: Duration,
}

impl SemanticMatcher {
    pub fn new(
        embedder: Arc<dyn TextEmbedder>,
        index: Arc<dyn VectorIndex>,
        timeout: Duration,
    ) -> Self {
        Self {
            embedder,
            index,
            timeout,
        }
    }

    pub async fn find_semantic(
        &self,
        text: &str,
        scope: &KnowledgeScope,
        top_k: u32,
    ) -> AppResult<Vec<MatchCandidate>> {
        if scope.is_empty() {
            return Ok(Vec::new());
        }

        let vector = call_with_retry("embedding API", self.timeout, || self.embedder.embed(text))
            .await?;

        let kb_ids = scope.ids();
        let hits = call_with_retry("vector index", self.timeout, || {
            self.index.search(&vector, &kb_ids, top_k)
        })
        .await?;

        Ok(hits
            .into_iter()
            .filter(|hit| scope.contains(hit.knowledge_base_id))
            .map(|hit| MatchCandidate {
                document_id: hit.document_id,
                document_name: hit.document_name,
                knowledge_base_id: hit.knowledge_base_id,
                score: hit.score.clamp(0.0, 1.0),
                origin: MatchOrigin::Semantic,
                location: hit.location,
                snippet: truncate_snippet(&hit.snippet),
            })
            .collect())
    }
}

/// OpenAI-style embeddings endpoint.
pub struct HttpEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpEmbedder {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
            api_key,
        }
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

#[async_trait]
impl TextEmbedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = json!({
            "model": self.model,
            "input": [text],
        });

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .context("embedding request failed")?
            .error_for_status()
            .context("embedding API returned an error status")?;

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .context("embedding API returned malformed JSON")?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|item| item.embedding)
            .ok_or_else(|| anyhow!("embedding response contained no vectors"))
    }
}

/// Qdrant-style REST vector search, filtered by knowledge base.
pub struct HttpVectorIndex {
    client: Client,
    endpoint: String,
    collection: String,
}

impl HttpVectorIndex {
    pub fn new(endpoint: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            collection: collection.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct VectorSearchResponse {
    result: Vec<VectorPoint>,
}

#[derive(Debug, Deserialize)]
struct VectorPoint {
    score: f32,
    payload: VectorPayload,
}

#[derive(Debug, Deserialize)]
struct VectorPayload {
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
impl VectorIndex for HttpVectorIndex {
    async fn search(
        &self,
        vector: &[f32],
        knowledge_base_ids: &[Uuid],
        limit: u32,
    ) -> Result<Vec<ChunkHit>> {
        let url = format!(
            "{}/collections/{}/points/search",
            self.endpoint, self.collection
        );
        let kb_filter: Vec<String> = knowledge_base_ids.iter().map(Uuid::to_string).collect();
        let body = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
            "filter": {
                "must": [
                    { "key": "knowledge_base_id", "match": { "any": kb_filter } }
                ]
            },
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("vector search request failed")?
            .error_for_status()
            .context("vector index returned an error status")?;

        let parsed: VectorSearchResponse = response
            .json()
            .await
            .context("vector index returned malformed JSON")?;

        Ok(parsed
            .result
            .into_iter()
            .map(|point| ChunkHit {
                document_id: point.payload.document_id,
                document_name: point.payload.document_name,
                knowledge_base_id: point.payload.knowledge_base_id,
                score: point.score,
                location: MatchLocation::Text {
                    start: point.payload.start_offset,
                    end: point.payload.end_offset,
                    page: point.payload.page,
                },
                snippet: point.payload.snippet,
            })
            .collect())
    }
}
