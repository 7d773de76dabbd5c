use pricewatch::application::handlers::api_handler::router;
use pricewatch::application::services::orchestrator::PipelineOrchestrator;
use pricewatch::config::PipelineConfig;
use pricewatch::persistence::{init_database_with, DatabaseConfig, SqliteCatalogStore};
use pricewatch::rate_limit::create_rate_limiter;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Missing .env is fine, the environment may already be set
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pricewatch=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = PipelineConfig::from_env();
    info!(
        "Pricewatch starting: source '{}', {} categories",
        config.source_name,
        config.categories.len()
    );
    match &config.source_base_url {
        Some(url) => info!("Upstream: {}", url),
        None => info!("PRICEWATCH_SOURCE_BASE_URL not set, scrape and health will be rejected"),
    }

    let database = DatabaseConfig::from_env();
    let pool = init_database_with(&database).await?;
    let store = Arc::new(SqliteCatalogStore::new(pool.clone()));

    let limiter = create_rate_limiter(config.server.requests_per_minute);
    let addr: SocketAddr = config.server.bind_address.parse()?;
    let orchestrator = Arc::new(PipelineOrchestrator::new(config, store)?);
    let app = router(orchestrator, limiter);

    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server = axum::serve(listener, app);

    let shutdown_signal = async move {
        let ctrl_c = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C signal"),
                Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                    info!("Received SIGTERM signal");
                }
                Err(e) => error!("Failed to install SIGTERM handler: {}", e),
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    };

    info!("Server started successfully. Press Ctrl+C to stop.");
    server.with_graceful_shutdown(shutdown_signal).await?;

    info!("Server shutting down gracefully...");
    pool.close().await;

    info!("Shutdown complete");
    Ok(())
}
