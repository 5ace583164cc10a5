use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use prbot_core::{ReviewerBalancer, SqliteStore};
use prbot_server::config::Config;
use prbot_server::service::build_router;
use prbot_server::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting prbot {}", prbot_server::get_bot_version());

    let config = Config::from_env().context("Failed to load configuration")?;

    let db_path = config.reviewer_db_path();
    info!("Using reviewer database: {}", db_path.display());
    let store = SqliteStore::new(&db_path)
        .with_context(|| format!("Failed to open reviewer database {}", db_path.display()))?;

    let balancer = Arc::new(ReviewerBalancer::new(Arc::new(store)));
    let pool = balancer
        .pool()
        .await
        .context("Failed to read reviewer pool")?;
    info!(
        "Loaded {} reviewers, assignment mode: {}",
        pool.len(),
        config.assignment_mode
    );

    let app_state = Arc::new(AppState::from_config(&config, balancer)?);
    let app = build_router(app_state);

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Server listening on port {}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
