//! Tally API Server
//!
//! Main entry point for the refund reconciliation service.

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tally_api::{AppState, create_router};
use tally_core::refund::{MemoryRefundStore, PaymentValidator, RefundService, RefundStore};
use tally_db::{PgRefundStore, connect_with};
use tally_shared::{AppConfig, LedgerBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tally=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::load().context("Failed to load configuration")?;

    match config.ledger.backend {
        LedgerBackend::Postgres => {
            let database = config
                .database
                .as_ref()
                .context("database.url is required for the postgres backend")?;
            let db = connect_with(database).await?;
            info!(
                max_connections = database.max_connections,
                "Connected to database"
            );
            serve(&config, PgRefundStore::new(db)).await
        }
        LedgerBackend::Memory => {
            warn!("Using the in-memory ledger, refunds are lost on restart");
            serve(&config, MemoryRefundStore::new()).await
        }
    }
}

async fn serve<S: RefundStore + 'static>(config: &AppConfig, store: S) -> anyhow::Result<()> {
    let validator = PaymentValidator::from_config(&config.ledger);
    let state = AppState::new(RefundService::new(Arc::new(store), validator));
    let app = create_router(state, config.server.max_body_bytes);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
