//! # AdPulse
//!
//! Real-time layer of an advertising analytics dashboard.
//!
//! This is the application entry point that initializes:
//! - Tracing/logging subsystem
//! - Configuration loading
//! - Shared store connections (Redis or in-process)
//! - HTTP/WebSocket server

use anyhow::Result;
use tracing::info;

use adpulse::config::Settings;
use adpulse::startup::Application;

#[tokio::main]
async fn main() -> Result<()> {
    adpulse::telemetry::init_tracing();

    info!("Starting AdPulse...");

    let settings = Settings::load()?;
    info!(
        host = %settings.server.host,
        port = %settings.server.port,
        backend = ?settings.redis.backend,
        environment = %settings.environment,
        "Configuration loaded"
    );

    let application = Application::build(settings).await?;

    info!("Server ready to accept connections");
    application.run_until_stopped().await?;

    Ok(())
}
