// Shared across the integration suites; each binary uses its own subset.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, ensure, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

use http_body_util::BodyExt;
use textrace::auth::jwt::JwtService;
use textrace::auth::password;
use textrace::config::{AppConfig, CredentialBackend};
use textrace::credentials::{CredentialStore, CredentialTtls, MemoryCredentialStore};
use textrace::directory::{Directory, KnowledgeBaseRef};
use textrace::models::{Document, User};
use textrace::preview::PreviewTokens;
use textrace::ratelimit::RateLimiter;
use textrace::routes;
use textrace::state::AppState;
use textrace::storage::ObjectStorage;
use textrace::trace::exact::{ExactMatcher, IndexHit, SearchIndex};
use textrace::trace::ranker::{HybridRanker, RankPolicy};
use textrace::trace::semantic::{ChunkHit, SemanticMatcher, TextEmbedder, VectorIndex};
use textrace::trace::MatchLocation;

pub const EXACT_NORM_K: f32 = 10.0;

#[derive(Default)]
struct DirectoryData {
    users: Vec<User>,
    user_kbs: HashMap<Uuid, Vec<KnowledgeBaseRef>>,
    documents: HashMap<Uuid, Document>,
}

/// In-memory stand-in for the user/org/knowledge-base management system.
#[derive(Default)]
pub struct FakeDirectory {
    data: Mutex<DirectoryData>,
}

impl FakeDirectory {
    pub async fn add_user(&self, username: &str, password_hash: &str, role: &str) -> Uuid {
        let id = Uuid::new_v4();
        let now = chrono::Utc::now().naive_utc();
        let mut data = self.data.lock().await;
        data.users.push(User {
            id,
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            role: role.to_string(),
            created_at: now,
            updated_at: now,
        });
        id
    }

    pub async fn grant_knowledge_base(&self, user_id: Uuid, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        let mut data = self.data.lock().await;
        data.user_kbs.entry(user_id).or_default().push(KnowledgeBaseRef {
            id,
            name: name.to_string(),
        });
        id
    }

    pub async fn add_document(&self, knowledge_base_id: Uuid, name: &str, key: &str) -> Uuid {
        let id = Uuid::new_v4();
        let now = chrono::Utc::now().naive_utc();
        let mut data = self.data.lock().await;
        data.documents.insert(
            id,
            Document {
                id,
                knowledge_base_id,
                name: name.to_string(),
                kind: "text".to_string(),
                text_object_key: key.to_string(),
                created_at: now,
                updated_at: now,
            },
        );
        id
    }

    pub async fn remove_document(&self, document_id: Uuid) {
        let mut data = self.data.lock().await;
        data.documents.remove(&document_id);
    }
}

#[async_trait]
impl Directory for FakeDirectory {
    async fn user_by_username(&self, username: &str) -> Result<Option<User>> {
        let data = self.data.lock().await;
        Ok(data
            .users
            .iter()
            .find(|user| user.username == username)
            .cloned())
    }

    async fn knowledge_bases_for_user(&self, user_id: Uuid) -> Result<Vec<KnowledgeBaseRef>> {
        let data = self.data.lock().await;
        Ok(data.user_kbs.get(&user_id).cloned().unwrap_or_default())
    }

    async fn document(&self, document_id: Uuid) -> Result<Option<Document>> {
        let data = self.data.lock().await;
        Ok(data.documents.get(&document_id).cloned())
    }
}

/// Scripted full-text index: returns the seeded hits whose knowledge base
/// is in scope, and counts invocations so short-circuit behavior is
/// observable.
#[derive(Default)]
pub struct FakeSearchIndex {
    hits: Mutex<Vec<IndexHit>>,
    error: Mutex<Option<String>>,
    calls: AtomicUsize,
}

impl FakeSearchIndex {
    pub async fn push(&self, hit: IndexHit) {
        self.hits.lock().await.push(hit);
    }

    pub async fn fail_with(&self, message: &str) {
        *self.error.lock().await = Some(message.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchIndex for FakeSearchIndex {
    async fn search(
        &self,
        _text: &str,
        knowledge_base_ids: &[Uuid],
        limit: u32,
    ) -> Result<Vec<IndexHit>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.error.lock().await.clone() {
            return Err(anyhow!(message));
        }
        let hits = self.hits.lock().await;
        Ok(hits
            .iter()
            .filter(|hit| knowledge_base_ids.contains(&hit.knowledge_base_id))
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct FakeVectorIndex {
    hits: Mutex<Vec<ChunkHit>>,
    calls: AtomicUsize,
}

impl FakeVectorIndex {
    pub async fn push(&self, hit: ChunkHit) {
        self.hits.lock().await.push(hit);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VectorIndex for FakeVectorIndex {
    async fn search(
        &self,
        _vector: &[f32],
        knowledge_base_ids: &[Uuid],
        limit: u32,
    ) -> Result<Vec<ChunkHit>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let hits = self.hits.lock().await;
        Ok(hits
            .iter()
            .filter(|hit| knowledge_base_ids.contains(&hit.knowledge_base_id))
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

pub struct FakeEmbedder;

#[async_trait]
impl TextEmbedder for FakeEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![0.1; 8])
    }
}

#[derive(Default)]
pub struct FakeStorage {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl FakeStorage {
    pub async fn put(&self, key: &str, bytes: Vec<u8>) {
        self.objects.lock().await.insert(key.to_string(), bytes);
    }
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let objects = self.objects.lock().await;
        objects
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow!("object {key} missing"))
    }
}

/// TTL and throttle knobs individual tests tighten to force expiry paths.
pub struct TestOptions {
    pub auth_code_ttl_minutes: i64,
    pub refresh_token_ttl_days: i64,
    pub preview_token_ttl_minutes: i64,
    pub trace_rate_limit_per_minute: u32,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            auth_code_ttl_minutes: 5,
            refresh_token_ttl_days: 7,
            preview_token_ttl_minutes: 30,
            trace_rate_limit_per_minute: 60,
        }
    }
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    pub directory: Arc<FakeDirectory>,
    pub search: Arc<FakeSearchIndex>,
    pub vectors: Arc<FakeVectorIndex>,
    pub storage: Arc<FakeStorage>,
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        Self::with_options(TestOptions::default()).await
    }

    pub async fn with_options(options: TestOptions) -> Result<Self> {
        let config = AppConfig {
            database_url: "postgres://unused".to_string(),
            database_max_pool_size: 1,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            jwt_secret: "test-secret".to_string(),
            jwt_issuer: "test-issuer".to_string(),
            jwt_audience: "test-audience".to_string(),
            jwt_expiry_minutes: 60,
            credential_backend: CredentialBackend::Memory,
            auth_code_ttl_minutes: options.auth_code_ttl_minutes,
            access_token_ttl_minutes: 120,
            refresh_token_ttl_days: options.refresh_token_ttl_days,
            preview_token_ttl_minutes: options.preview_token_ttl_minutes,
            trace_rate_limit_per_minute: options.trace_rate_limit_per_minute,
            matcher_timeout_secs: 2,
            exact_score_norm_k: EXACT_NORM_K,
            exact_match_boost: 0.1,
            boost_before_threshold: true,
            search_endpoint: "http://search.invalid".to_string(),
            search_index: "corpus".to_string(),
            vector_endpoint: "http://vectors.invalid".to_string(),
            vector_collection: "corpus".to_string(),
            embedding_endpoint: "http://embeddings.invalid".to_string(),
            embedding_model: "test-embedding".to_string(),
            embedding_api_key: None,
            cors_allowed_origin: None,
            aws_endpoint_url: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            aws_region: "us-east-1".to_string(),
            s3_bucket: "test-bucket".to_string(),
        };

        let ttls = CredentialTtls::from_config(&config);
        let credentials: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::new(ttls));
        let directory = Arc::new(FakeDirectory::default());
        let search = Arc::new(FakeSearchIndex::default());
        let vectors = Arc::new(FakeVectorIndex::default());
        let storage = Arc::new(FakeStorage::default());

        let matcher_timeout = Duration::from_secs(config.matcher_timeout_secs);
        let exact = ExactMatcher::new(search.clone(), config.exact_score_norm_k, matcher_timeout);
        let semantic = SemanticMatcher::new(
            Arc::new(FakeEmbedder),
            vectors.clone(),
            matcher_timeout,
        );
        let ranker = Arc::new(HybridRanker::new(
            exact,
            semantic,
            RankPolicy {
                boost: config.exact_match_boost,
                boost_before_threshold: config.boost_before_threshold,
            },
        ));

        let previews = Arc::new(PreviewTokens::new(chrono::Duration::minutes(
            config.preview_token_ttl_minutes,
        )));
        let limiter = Arc::new(RateLimiter::per_minute(config.trace_rate_limit_per_minute));
        let jwt = JwtService::from_config(&config)?;

        let state = AppState::new(
            config,
            jwt,
            credentials,
            directory.clone(),
            storage.clone(),
            ranker,
            previews,
            limiter,
        );
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            router,
            directory,
            search,
            vectors,
            storage,
        })
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub async fn insert_user(&self, username: &str, user_password: &str, role: &str) -> Result<Uuid> {
        let hash = password::hash_secret(user_password)?;
        Ok(self.directory.add_user(username, &hash, role).await)
    }

    pub async fn login_token(&self, username: &str, user_password: &str) -> Result<String> {
        #[derive(Serialize)]
        struct LoginPayload<'a> {
            username: &'a str,
            password: &'a str,
        }

        let response = self
            .post_json(
                "/api/auth/login",
                &LoginPayload {
                    username,
                    password: user_password,
                },
                None,
            )
            .await?;

        ensure!(
            response.status() == StatusCode::OK,
            "login failed with status {}",
            response.status()
        );

        let body = body_to_vec(response.into_body()).await?;
        #[derive(Deserialize)]
        struct LoginResponse {
            access_token: String,
        }
        let parsed: LoginResponse = serde_json::from_slice(&body)?;
        Ok(parsed.access_token)
    }

    pub async fn register_application(
        &self,
        token: &str,
        name: &str,
        redirect_uri: &str,
    ) -> Result<RegisteredApplication> {
        let response = self
            .post_json(
                "/oauth/applications",
                &serde_json::json!({ "name": name, "redirect_uri": redirect_uri }),
                Some(token),
            )
            .await?;

        ensure!(
            response.status() == StatusCode::CREATED,
            "application registration failed with status {}",
            response.status()
        );

        let body = body_to_vec(response.into_body()).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Runs the authorize redirect and extracts the issued code from the
    /// callback URL.
    pub async fn authorize_code(
        &self,
        login_token: &str,
        client_id: &str,
        redirect_uri: &str,
        state_param: Option<&str>,
    ) -> Result<String> {
        let response = self
            .authorize_raw(login_token, client_id, redirect_uri, state_param, None)
            .await?;
        ensure!(
            response.status().is_redirection(),
            "authorize failed with status {}",
            response.status()
        );
        let location = redirect_location(&response)?;
        let url = url::Url::parse(&location)?;
        url.query_pairs()
            .find(|(key, _)| key == "code")
            .map(|(_, value)| value.to_string())
            .ok_or_else(|| anyhow!("callback carried no code: {location}"))
    }

    pub async fn authorize_raw(
        &self,
        login_token: &str,
        client_id: &str,
        redirect_uri: &str,
        state_param: Option<&str>,
        approve: Option<bool>,
    ) -> Result<hyper::Response<Body>> {
        let mut path = format!(
            "/oauth/authorize?client_id={}&redirect_uri={}",
            client_id,
            urlencode(redirect_uri)
        );
        if let Some(value) = state_param {
            path.push_str(&format!("&state={}", urlencode(value)));
        }
        if let Some(value) = approve {
            path.push_str(&format!("&approve={value}"));
        }
        self.get(&path, Some(login_token)).await
    }

    pub async fn exchange_code(
        &self,
        client_id: &str,
        client_secret: &str,
        code: &str,
        redirect_uri: &str,
    ) -> Result<hyper::Response<Body>> {
        self.post_json(
            "/oauth/token",
            &serde_json::json!({
                "grant_type": "authorization_code",
                "client_id": client_id,
                "client_secret": client_secret,
                "code": code,
                "redirect_uri": redirect_uri,
            }),
            None,
        )
        .await
    }

    pub async fn refresh_token(
        &self,
        client_id: &str,
        client_secret: &str,
        refresh_token: &str,
    ) -> Result<hyper::Response<Body>> {
        self.post_json(
            "/oauth/token",
            &serde_json::json!({
                "grant_type": "refresh_token",
                "client_id": client_id,
                "client_secret": client_secret,
                "refresh_token": refresh_token,
            }),
            None,
        )
        .await
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::GET).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let builder = Request::builder().method(Method::DELETE).uri(path);
        let builder = if let Some(token) = token {
            builder.header("authorization", format!("Bearer {token}"))
        } else {
            builder
        };
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    /// Seeds a document whose extracted text lives in the fake object store.
    pub async fn add_document(
        &self,
        knowledge_base_id: Uuid,
        name: &str,
        text: &str,
    ) -> Result<Uuid> {
        let key = format!("text/{}.txt", Uuid::new_v4());
        self.storage.put(&key, text.as_bytes().to_vec()).await;
        Ok(self
            .directory
            .add_document(knowledge_base_id, name, &key)
            .await)
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisteredApplication {
    pub id: Uuid,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub redirect_uri: String,
}

#[derive(Debug, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub refresh_token: String,
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

pub async fn json_body<T: serde::de::DeserializeOwned>(body: Body) -> Result<T> {
    let bytes = body_to_vec(body).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

pub fn redirect_location(response: &hyper::Response<Body>) -> Result<String> {
    Ok(response
        .headers()
        .get("location")
        .ok_or_else(|| anyhow!("redirect without location header"))?
        .to_str()?
        .to_string())
}

pub fn urlencode(raw: &str) -> String {
    let mut encoded = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            other => encoded.push_str(&format!("%{other:02X}")),
        }
    }
    encoded
}

/// Raw BM25 score that normalizes to the requested [0,1] score under the
/// harness constant.
pub fn raw_score_for(normalized: f32) -> f32 {
    normalized * EXACT_NORM_K / (1.0 - normalized)
}

#[allow(dead_code)]
pub fn exact_hit(knowledge_base_id: Uuid, document_id: Uuid, name: &str, normalized: f32) -> IndexHit {
    exact_hit_at(knowledge_base_id, document_id, name, normalized, 0, 24)
}

#[allow(dead_code)]
pub fn exact_hit_at(
    knowledge_base_id: Uuid,
    document_id: Uuid,
    name: &str,
    normalized: f32,
    start: u32,
    end: u32,
) -> IndexHit {
    IndexHit {
        document_id,
        document_name: name.to_string(),
        knowledge_base_id,
        score: raw_score_for(normalized),
        location: MatchLocation::Text {
            start,
            end,
            page: None,
        },
        snippet: format!("snippet from {name}"),
    }
}

#[allow(dead_code)]
pub fn semantic_hit(
    knowledge_base_id: Uuid,
    document_id: Uuid,
    name: &str,
    score: f32,
) -> ChunkHit {
    ChunkHit {
        document_id,
        document_name: name.to_string(),
        knowledge_base_id,
        score,
        location: MatchLocation::Text {
            start: 100,
            end: 140,
            page: None,
        },
        snippet: format!("chunk from {name}"),
    }
}
