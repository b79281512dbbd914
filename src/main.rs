use std::sync::Arc;

use recall_mcp::{build_app, config::Config, logging, memory_store::Mem0Client, AppState};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging();

    let config = Config::from_env()?;
    let memory = Arc::new(Mem0Client::new(
        config.mem0_base_url.clone(),
        config.mem0_api_key.clone(),
    )?);
    let state = AppState::new(memory);
    let app = build_app(state);
    let listener = tokio::net::TcpListener::bind(config.bind_socket()?).await?;

    info!(
        bind_addr = %config.bind_addr,
        bind_port = config.bind_port,
        "server starting"
    );

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
