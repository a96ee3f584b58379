//! Palisade - Content Moderation Service
//!
//! Main entry point: logging, configuration, and the server lifecycle.

use palisade::{App, ServiceConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    log::info!("═══════════════════════════════════════════════");
    log::info!("  Palisade - Content Moderation Service");
    log::info!("  Version: {}", palisade::VERSION);
    log::info!("═══════════════════════════════════════════════");

    let config = ServiceConfig::from_env()?;
    log::info!("Configuration:");
    log::info!("  Bind address: {}", config.server_address());
    log::info!(
        "  Counter store: {}",
        config.redis_url.as_deref().unwrap_or("(in-process)")
    );
    log::info!("  Database: {}", config.database_url);
    log::info!(
        "  Rate limit: {}/{}s",
        config.rate_limit.limit,
        config.rate_limit.window.as_secs()
    );

    let app = App::new(config).await?;
    let result = app.run().await;

    match &result {
        Ok(()) => log::info!("Palisade shutdown complete"),
        Err(e) => log::error!("server error: {}", e),
    }

    result
}
