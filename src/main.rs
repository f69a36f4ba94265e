use std::{sync::Arc, time::Duration};

use tracing_subscriber::EnvFilter;

use textrace::{
    auth::jwt::JwtService,
    config::{AppConfig, CredentialBackend},
    credentials::{CredentialStore, CredentialTtls, MemoryCredentialStore, PgCredentialStore},
    db,
    directory::PgDirectory,
    preview::PreviewTokens,
    ratelimit::RateLimiter,
    routes,
    state::AppState,
    storage::S3Storage,
    trace::{
        exact::{ExactMatcher, QuickwitSearchIndex},
        ranker::{HybridRanker, RankPolicy},
        semantic::{HttpEmbedder, HttpVectorIndex, SemanticMatcher},
    },
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "api",
        database_url = %config.redacted_database_url(),
        search_endpoint = %config.search_endpoint,
        vector_endpoint = %config.vector_endpoint,
        s3_bucket = %config.s3_bucket,
        "loaded configuration"
    );

    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    db::run_pending_migrations(&pool)?;

    let ttls = CredentialTtls::from_config(&config);
    let credentials: Arc<dyn CredentialStore> = match config.credential_backend {
        CredentialBackend::Postgres => Arc::new(PgCredentialStore::new(pool.clone(), ttls)),
        CredentialBackend::Memory => Arc::new(MemoryCredentialStore::new(ttls)),
    };
    let directory = Arc::new(PgDirectory::new(pool));

    let storage = Arc::new(S3Storage::connect(&config).await?);
    let jwt = JwtService::from_config(&config)?;

    let matcher_timeout = Duration::from_secs(config.matcher_timeout_secs);
    let exact = ExactMatcher::new(
        Arc::new(QuickwitSearchIndex::new(
            config.search_endpoint.clone(),
            config.search_index.clone(),
        )),
        config.exact_score_norm_k,
        matcher_timeout,
    );
    let semantic = SemanticMatcher::new(
        Arc::new(HttpEmbedder::new(
            config.embedding_endpoint.clone(),
            config.embedding_model.clone(),
            config.embedding_api_key.clone(),
        )),
        Arc::new(HttpVectorIndex::new(
            config.vector_endpoint.clone(),
            config.vector_collection.clone(),
        )),
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

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let state = AppState::new(
        config,
        jwt,
        credentials,
        directory,
        storage,
        ranker,
        previews,
        limiter,
    );

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "api server listening");
    axum::serve(listener, routes::create_router(state)).await?;

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
