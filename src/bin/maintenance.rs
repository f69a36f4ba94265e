use tracing_subscriber::EnvFilter;

use textrace::{
    config::AppConfig,
    credentials::{CredentialStore, CredentialTtls, PgCredentialStore},
    db,
};

/// Garbage-collects expired authorization codes and fully expired token
/// pairs. Run periodically; redemption correctness never depends on it.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        "loaded configuration"
    );

    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    let store = PgCredentialStore::new(pool, CredentialTtls::from_config(&config));

    let report = store.purge_expired().await?;
    tracing::info!(
        codes = report.codes,
        tokens = report.tokens,
        "purged expired grants"
    );

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
