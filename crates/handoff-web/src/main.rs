mod api;
mod app;
mod config;
mod dto;
mod error;
mod logging;
mod middleware;
mod shutdown;
mod state;
mod static_files;
#[cfg(test)]
mod test_support;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use handoff_core::{CredentialDirectory, TokenBroker};

use crate::config::ServerConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_dir = std::env::var_os("HANDOFF_LOG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("log"));
    let log_file = logging::init(&log_dir)?;
    tracing::debug!("Writing logs to {}", log_file.display());
    error::install_panic_hook();

    let result = run().await;
    if let Err(e) = &result {
        tracing::error!("Fatal: {e:#}");
    }
    tracing::info!("Exiting with code {}", exit_code(&result));
    result
}

fn exit_code<T>(result: &anyhow::Result<T>) -> i32 {
    if result.is_ok() {
        0
    } else {
        1
    }
}

async fn run() -> anyhow::Result<()> {
    let config = ServerConfig::load()?;
    let directory = CredentialDirectory::load(&config.credentials_path)?;
    let broker = Arc::new(TokenBroker::new(
        Arc::new(directory),
        config.broker.to_broker_config(),
    ));

    let bind_addr = config.bind_addr;
    let state = AppState {
        config: Arc::new(config),
        broker: broker.clone(),
    };
    let app = app::build_app(state);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!("handoff-web listening on http://{}", listener.local_addr()?);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown::shutdown_signal())
    .await?;

    broker.shutdown();
    tracing::info!("Server closed.");
    Ok(())
}
