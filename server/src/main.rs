//! Ferry Server binary.

use ferry_server::config::Config;
use ferry_server::db::{self, Repository};
use ferry_server::AppState;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ferry_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting Ferry Server on {}:{}", config.host, config.port);

    let repo = match &config.database_url {
        Some(url) => {
            let pool = db::create_pool(url, config.max_connections).await?;
            tracing::info!("Running database migrations...");
            db::run_migrations(&pool).await?;
            Repository::postgres(pool)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; records are kept in memory only");
            Repository::memory()
        }
    };

    let state = AppState {
        repo,
        config: Arc::new(config.clone()),
    };
    let app = ferry_server::app(state);

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
