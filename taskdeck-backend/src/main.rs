//! `taskdeck-backend`: accounts, sessions and per-user task rows served over
//! a WebSocket at `/ws`. State lives in memory only.
//!
//! ```bash
//! taskdeck-backend --bind 127.0.0.1:9100 --require-confirmation
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use taskdeck_backend::config::{BackendCliArgs, BackendConfig};
use taskdeck_backend::server;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = BackendCliArgs::parse();
    let config = match BackendConfig::load(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("taskdeck-backend: {e}");
            return ExitCode::FAILURE;
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(
        addr = %config.bind_addr,
        require_confirmation = config.require_confirmation,
        max_payload_size = config.max_payload_size,
        "starting taskdeck backend"
    );

    let (addr, handle) =
        match server::start_server_with_state(&config.bind_addr, Arc::new(config.state())).await {
            Ok(started) => started,
            Err(e) => {
                tracing::error!(addr = %config.bind_addr, error = %e, "could not bind backend");
                return ExitCode::FAILURE;
            }
        };
    tracing::info!(%addr, "accepting task clients at /ws");

    match handle.await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "backend server task failed");
            ExitCode::FAILURE
        }
    }
}
