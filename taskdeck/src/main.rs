//! `TaskDeck`: per-user task lists from the terminal.
//!
//! Reads commands from stdin, one per line. With a backend URL the client
//! talks to a `taskdeck-backend` over WebSocket; without one it runs an
//! offline demo against an in-memory backend. Configuration via CLI flags,
//! environment variables, or config file (`~/.config/taskdeck/config.toml`).
//!
//! ```bash
//! # Offline demo mode
//! cargo run --bin taskdeck
//!
//! # Connect to a backend
//! cargo run --bin taskdeck -- --backend-url ws://127.0.0.1:9100/ws
//! ```

use std::io::Write as _;
use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_appender::non_blocking::WorkerGuard;

use taskdeck::app::{App, Reply};
use taskdeck::config::{CliArgs, ClientConfig};
use taskdeck::remote::memory::MemoryBackend;
use taskdeck::remote::ws::WsBackend;
use taskdeck::remote::{AuthService, TaskService};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    // Logs go to a file so they never interleave with command output.
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    tracing::info!("taskdeck starting");

    let result = match config.to_ws_options() {
        Some(options) => match WsBackend::connect(options).await {
            Ok(backend) => {
                println!("Connected to {}", backend.url());
                run(App::new(backend.clone(), backend), &config).await
            }
            Err(e) => {
                eprintln!("Error: could not reach backend: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => {
            println!("Offline demo: accounts and tasks live only in memory");
            let backend = MemoryBackend::new();
            run(App::new(backend.clone(), backend), &config).await
        }
    };

    tracing::info!("taskdeck exiting");
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("taskdeck.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// Starts the stores, then executes stdin lines until `quit` or EOF.
async fn run<A: AuthService, T: TaskService>(
    mut app: App<A, T>,
    config: &ClientConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    app = app.with_default_filter(config.default_filter);
    app.start().await?;

    match app.session()?.user() {
        Some(user) => println!("Signed in as {}", user.email),
        None => println!("Not signed in. Type `help` for commands."),
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        match app.handle_line(&line).await {
            Reply::Lines(output) => {
                for text in output {
                    println!("{text}");
                }
            }
            Reply::Quit => break,
        }
    }
    Ok(())
}
