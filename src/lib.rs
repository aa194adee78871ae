mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod media;
pub mod models;
pub mod session;
mod state;

use std::sync::Arc;

use tracing::info;

use crate::config::SessionConfig;
use crate::events::create_event_bus;
use crate::media::capture::FileCaptureProvider;
use crate::session::engine::spawn_session_engine;
use crate::state::ServiceContext;

/// Create a ServiceContext and spawn the session engine behind it.
fn create_service_context(config: SessionConfig) -> ServiceContext {
    info!("Display name: {}", config.display_name);
    info!("Recordings directory: {:?}", config.recordings_dir);

    let (event_tx, _event_rx) = create_event_bus();
    let provider = Arc::new(FileCaptureProvider::from_config(&config));
    let session = spawn_session_engine(config.clone(), provider, event_tx.clone());

    ServiceContext {
        session,
        event_tx,
        config: Arc::new(config),
    }
}

/// Run in headless mode (no GUI, API server only).
pub async fn run_headless(config: SessionConfig, api_port: u16) -> std::io::Result<()> {
    tracing_subscriber::fmt::init();

    let ctx = create_service_context(config);
    info!("Running in headless mode");

    // Run API server (blocks until shutdown)
    api::server::start_api_server(ctx, api_port).await
}
