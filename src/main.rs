// mec-db node - eventually-consistent key-value store

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use mec_db::{api::create_router, app_state::AppState, config::Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Load configuration: first argument, or ~/mec/config.conf
    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);
    let config = Config::load(&path)?;

    // Initialize application state: store, fabric, coordinator, membership
    let app_state = AppState::new(config.clone()).await?;

    // Build the application router
    let app = Router::new()
        .merge(create_router(app_state.coordinator.clone()))
        .layer(CorsLayer::permissive());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.httpport));
    tracing::info!(
        "mec-db node {} serving on http://{} (cluster port {})",
        config.name,
        addr,
        config.port
    );

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
