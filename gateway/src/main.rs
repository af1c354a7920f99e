//! FXQL Gateway Binary
//!
//! Reads one JSON request envelope per line from stdin and writes one JSON
//! reply per line to stdout, in input order.

use std::sync::Arc;

use tokio::io::BufReader;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fxql_gateway::stdio::serve_lines;
use fxql_gateway::{FxqlService, GatewayConfig};
use fxql_store::MemoryEntryStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries replies.
    let filter = std::env::var("RUST_LOG")
        .or_else(|_| std::env::var("LOG_LEVEL"))
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    info!("Starting FXQL gateway");

    let config = GatewayConfig::from_env();
    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let store = Arc::new(MemoryEntryStore::new());
    let service = Arc::new(FxqlService::new(config, store.clone()));
    service.start().await?;

    let input = BufReader::new(tokio::io::stdin());
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    };
    serve_lines(service.clone(), input, tokio::io::stdout(), shutdown).await?;

    if let Err(e) = service.stop().await {
        error!(error = %e, "Error during shutdown");
    }

    info!(
        entries = store.len(),
        batches = store.batch_count(),
        metrics = ?service.metrics().snapshot(),
        "FXQL gateway shutdown complete"
    );
    Ok(())
}
