use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use watch_sync::{config::Config, room::InMemoryRooms};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg   = Config::from_env()?;
    let rooms = Arc::new(InMemoryRooms::new());
    let (app, _gateway) = watch_sync::app(&cfg, rooms);

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    tracing::info!(addr = %cfg.bind_addr, "sync server listening");
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
