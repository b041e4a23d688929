//! Configuration system for the `TaskDeck` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/taskdeck/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use taskdeck_proto::task::{Completion, TaskFilter};

use crate::remote::ws::WsOptions;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// The backend URL is not a `ws://` or `wss://` URL.
    #[error("invalid backend url {url}: {reason}")]
    InvalidUrl {
        /// The rejected URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A setting has a value outside its domain.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Dotted key of the setting.
        key: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    backend: BackendFileConfig,
    ui: UiFileConfig,
}

/// `[backend]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct BackendFileConfig {
    url: Option<String>,
    connect_timeout_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
    session_file: Option<PathBuf>,
}

/// `[ui]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct UiFileConfig {
    default_filter: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend WebSocket URL; `None` runs the offline demo.
    pub backend_url: Option<String>,
    /// Timeout for connecting to the backend.
    pub connect_timeout: Duration,
    /// Timeout for each backend request.
    pub request_timeout: Duration,
    /// Where the session is persisted between runs.
    pub session_file: Option<PathBuf>,
    /// Filter applied by a bare `list` command.
    pub default_filter: TaskFilter,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend_url: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            session_file: default_session_file(),
            default_filter: TaskFilter::all(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read or
    /// parsed, or if a setting is invalid.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, &file)
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let backend_url = cli
            .backend_url
            .clone()
            .or_else(|| file.backend.url.clone());
        if let Some(url) = &backend_url {
            validate_backend_url(url)?;
        }

        let default_filter = match &file.ui.default_filter {
            Some(value) => TaskFilter::completion(value.parse::<Completion>().map_err(|e| {
                ConfigError::InvalidValue {
                    key: "ui.default_filter",
                    reason: e.to_string(),
                }
            })?),
            None => defaults.default_filter,
        };

        Ok(Self {
            backend_url,
            connect_timeout: file
                .backend
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            request_timeout: file
                .backend
                .request_timeout_secs
                .map_or(defaults.request_timeout, Duration::from_secs),
            session_file: cli
                .session_file
                .clone()
                .or_else(|| file.backend.session_file.clone())
                .or(defaults.session_file),
            default_filter,
        })
    }

    /// Build [`WsOptions`] for the configured backend.
    ///
    /// Returns `None` when no backend URL is set (offline demo mode).
    #[must_use]
    pub fn to_ws_options(&self) -> Option<WsOptions> {
        let url = self.backend_url.clone()?;
        Some(WsOptions {
            url,
            connect_timeout: self.connect_timeout,
            request_timeout: self.request_timeout,
            session_file: self.session_file.clone(),
        })
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Per-user task lists over a hosted backend")]
pub struct CliArgs {
    /// WebSocket URL of the backend (omit for the offline demo).
    #[arg(long, env = "TASKDECK_BACKEND_URL")]
    pub backend_url: Option<String>,

    /// Path to config file (default: `~/.config/taskdeck/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Where to persist the session between runs.
    #[arg(long)]
    pub session_file: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "TASKDECK_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/taskdeck.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn default_session_file() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("taskdeck").join("session.json"))
}

fn validate_backend_url(raw: &str) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidUrl {
        url: raw.to_string(),
        reason,
    };
    let parsed = url::Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(invalid(format!("unsupported scheme {other}, expected ws or wss"))),
    }
}

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ConfigFile::default());
    };
    let path = config_dir.join("taskdeck").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
