use anyhow::Result;
use std::sync::Arc;

mod config;
mod error;
mod logging;
mod routes;
mod services;
pub mod models;

use crate::error::AppError;
use crate::services::excel::TabularExtractor;
use crate::services::file_store::FileStore;
use crate::services::uploads::UploadDir;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    logging::init_logging()?;

    // Load configuration
    let config = config::load_config()?;
    let addr = config.bind_addr;

    // Build our application state
    let state = Arc::new(AppState::new(config).await?);

    let app = routes::app(state);

    // Run it
    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// Application state
#[derive(Clone)]
pub struct AppState {
    pub config: config::Config,
    pub store: Arc<FileStore>,
    pub uploads: UploadDir,
    pub extractor: TabularExtractor,
}

impl AppState {
    async fn new(config: config::Config) -> Result<Self, AppError> {
        let store = FileStore::open(&config.database_path)?;
        Self::with_store(config, store).await
    }

    async fn with_store(config: config::Config, store: FileStore) -> Result<Self, AppError> {
        let uploads = UploadDir::create(config.upload_dir.clone()).await?;
        let extractor = TabularExtractor::new(config.duplicate_headers);
        Ok(Self {
            config,
            store: Arc::new(store),
            uploads,
            extractor,
        })
    }
}
