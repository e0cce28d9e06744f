use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use canteen_server::api::router;
use canteen_server::config::Config;
use canteen_server::db::Database;
use canteen_server::gc::idempotency_gc_loop;
use canteen_server::storage::LocalStorage;
use canteen_server::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting canteen server {}", canteen_server::get_version());

    let config = Config::from_env().context("Failed to load configuration")?;

    let db_path = config.database_path();
    info!("Using database: {}", db_path.display());
    let db = Database::open(&db_path).context("Failed to initialize SQLite database")?;

    let storage = LocalStorage::new(&config.upload_dir, config.public_base_url.clone())
        .with_context(|| {
            format!(
                "Failed to create upload directory {}",
                config.upload_dir.display()
            )
        })?;
    info!("Storing uploads in {}", storage.root().display());

    let port = config.port;
    let app_state = Arc::new(AppState::new(config, db, Arc::new(storage)));

    let gc_state = app_state.clone();
    tokio::spawn(async move {
        idempotency_gc_loop(gc_state).await;
    });

    let app = router(app_state);

    let listener = TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!("Server listening on port {}", port);

    axum::serve(listener, app).await?;

    Ok(())
}
