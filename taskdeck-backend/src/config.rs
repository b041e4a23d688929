//! Settings for the development backend.
//!
//! A setting given on the command line (or through its `TASKDECK_BACKEND_*`
//! variable) wins over `~/.config/taskdeck-backend/config.toml`, which wins
//! over the built-in value. A missing default file is not an error; a missing
//! `--config` file is.

use std::path::{Path, PathBuf};

use crate::server::{BackendState, DEFAULT_MAX_PAYLOAD_SIZE};
use crate::store::BackendStore;

/// Errors that can occur when loading backend settings.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

/// On-disk settings; every key is optional.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SettingsFile {
    /// `[listen]`
    listen: ListenSection,
    /// `[accounts]`
    accounts: AccountsSection,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ListenSection {
    addr: Option<String>,
    max_frame_bytes: Option<usize>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct AccountsSection {
    require_confirmation: Option<bool>,
}

/// Command-line flags of `taskdeck-backend`.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "TaskDeck development backend")]
pub struct BackendCliArgs {
    /// Socket address to listen on.
    #[arg(short, long, env = "TASKDECK_BACKEND_ADDR")]
    pub bind: Option<String>,

    /// Settings file to use instead of the default location.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Largest accepted request frame, in bytes.
    #[arg(long)]
    pub max_payload_size: Option<usize>,

    /// Withhold sessions from new accounts until their email is confirmed.
    #[arg(long)]
    pub require_confirmation: bool,

    /// Tracing filter used when `RUST_LOG` is unset.
    #[arg(long, default_value = "info", env = "TASKDECK_BACKEND_LOG")]
    pub log_level: String,
}

/// Resolved backend settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub bind_addr: String,
    pub max_payload_size: usize,
    /// Sign-up withholds a session until the email is confirmed.
    pub require_confirmation: bool,
    pub log_level: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9100".to_string(),
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            require_confirmation: false,
            log_level: "info".to_string(),
        }
    }
}

impl BackendConfig {
    /// Reads the settings file named by `--config` (or the default one) and
    /// merges it under the command line.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the settings file cannot be read or parsed.
    pub fn load(cli: &BackendCliArgs) -> Result<Self, ConfigError> {
        let file = match cli.config.as_deref() {
            Some(path) => read_settings(path)?,
            None => read_default_settings()?,
        };
        Ok(Self::merge(cli, &file))
    }

    /// `--require-confirmation` can switch confirmation on, never off.
    fn merge(cli: &BackendCliArgs, file: &SettingsFile) -> Self {
        let builtin = Self::default();
        Self {
            bind_addr: cli
                .bind
                .clone()
                .or_else(|| file.listen.addr.clone())
                .unwrap_or(builtin.bind_addr),
            max_payload_size: cli
                .max_payload_size
                .or(file.listen.max_frame_bytes)
                .unwrap_or(builtin.max_payload_size),
            require_confirmation: cli.require_confirmation
                || file.accounts.require_confirmation.unwrap_or(false),
            log_level: cli.log_level.clone(),
        }
    }

    /// An empty account and task store honoring the confirmation setting.
    #[must_use]
    pub fn store(&self) -> BackendStore {
        if self.require_confirmation {
            BackendStore::with_confirmation()
        } else {
            BackendStore::new()
        }
    }

    /// Server state over a fresh [`store`](Self::store).
    #[must_use]
    pub fn state(&self) -> BackendState {
        BackendState::with_config(self.max_payload_size, self.store())
    }
}

fn read_settings(path: &Path) -> Result<SettingsFile, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&contents)?)
}

fn read_default_settings() -> Result<SettingsFile, ConfigError> {
    let Some(dir) = dirs::config_dir() else {
        return Ok(SettingsFile::default());
    };
    let path = dir.join("taskdeck-backend").join("config.toml");
    match read_settings(&path) {
        Err(ConfigError::ReadFile { source, .. })
            if source.kind() == std::io::ErrorKind::NotFound =>
        {
            Ok(SettingsFile::default())
        }
        other => other,
    }
}
