use tracing::{error, info};

use sicoes_harvest::config::HarvestConfig;
use sicoes_harvest::crawl;
use sicoes_harvest::storage::gcs::GcsStore;
use sicoes_harvest::storage::DedupStore;

#[tokio::main]
async fn main() {
    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config = match HarvestConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("❌ Invalid configuration: {:#}", e);
            std::process::exit(1);
        }
    };
    info!(
        "🚀 Job started. Target window: {} → {}",
        config.window.from_field(),
        config.window.to_field()
    );

    let store = match GcsStore::authenticate(config.bucket.as_str()).await {
        Ok(gcs) => DedupStore::new(gcs, config.folder.clone()),
        Err(e) => {
            error!("❌ Could not authenticate with storage: {}", e);
            std::process::exit(1);
        }
    };

    match crawl::run(&config, &store).await {
        Ok(saved) => info!("Job finished. Total uploaded: {}", saved),
        Err(e) => {
            error!("Fatal: {:#}", e);
            std::process::exit(1);
        }
    }
}
