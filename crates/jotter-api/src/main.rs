mod config;
mod error;
mod routes;

use std::sync::Arc;

use config::AppConfig;
use jotter_core::sync::SyncScheduler;
use jotter_core::RecordService;
use routes::{app_router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only load .env in development; production uses platform-native env injection.
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("jotter_api=info".parse().expect("valid directive"))
                .add_directive("jotter_core=info".parse().expect("valid directive")),
        )
        .init();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!("Starting jotter-api with config: {:?}", config);

    let (mutation_tx, mutation_rx) = tokio::sync::mpsc::unbounded_channel();
    let service =
        RecordService::open_path(&config.db_path)?.with_mutation_notifier(mutation_tx);

    let state = AppState::from_config(config.clone(), service).await?;

    // Mutations announce themselves on the channel; the scheduler drives
    // sessions through the same rate-limit and single-flight gates as
    // interactive calls.
    SyncScheduler::new(state.orchestrator(), mutation_rx).spawn();

    let bind_addr = state.config.bind_addr.clone();
    let router = app_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("jotter-api listening on {}", bind_addr);
    axum::serve(listener, router).await?;
    Ok(())
}
