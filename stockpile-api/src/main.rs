use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use stockpile_api::{app, AppState};
use stockpile_core::StockEngine;
use stockpile_store::{app_config::Config, DbClient, PgProductStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stockpile_api=debug,stockpile_core=info,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Stockpile API on port {}", config.server.port);

    let db = DbClient::new(&config.database)
        .await
        .context("Failed to connect to database")?;
    db.ping().await.context("Failed to ping database")?;

    let store = PgProductStore::new(db.pool.clone());
    let engine = StockEngine::new(store, config.product_defaults.clone());
    let app_state = AppState::new(Arc::new(engine));

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
