use session_memory::{api::start_server, AppContext, Settings};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::from_env()?;
    let port = settings.port;

    info!("Session Memory - STM API Server");
    info!("Port: {}", port);
    info!(settings = ?settings, "settings loaded");

    let ctx = Arc::new(AppContext::from_settings(settings)?);

    info!("Short-term memory initialized");

    start_server(ctx, port).await?;

    Ok(())
}
