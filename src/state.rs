use std::sync::Arc;

use crate::{
    auth::jwt::JwtService,
    config::AppConfig,
    credentials::CredentialStore,
    directory::Directory,
    preview::PreviewTokens,
    ratelimit::RateLimiter,
    storage::ObjectStorage,
    trace::ranker::HybridRanker,
};

/// Shared handles for one running service. Everything is passed explicitly;
/// no component reaches for ambient globals.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub jwt: JwtService,
    pub credentials: Arc<dyn CredentialStore>,
    pub directory: Arc<dyn Directory>,
    pub storage: Arc<dyn ObjectStorage>,
    pub ranker: Arc<HybridRanker>,
    pub previews: Arc<PreviewTokens>,
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: AppConfig,
        jwt: JwtService,
        credentials: Arc<dyn CredentialStore>,
        directory: Arc<dyn Directory>,
        storage: Arc<dyn ObjectStorage>,
        ranker: Arc<HybridRanker>,
        previews: Arc<PreviewTokens>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            jwt,
            credentials,
            directory,
            storage,
            ranker,
            previews,
            limiter,
        }
    }
}
