//! Command-line and environment layer of the client settings.
//!
//! Resolution order: built-in defaults, then the JSON settings file
//! (`--config-path`, default `sync_client.json`), then these arguments.
//! Every argument also reads a `SYNC_*` environment variable.

use std::path::PathBuf;

use clap::Args;
use lib_sync::configs::{ClientSettings, ConfigError, DEFAULT_CONFIG_FILE};
use lib_sync::loggers::LogSettings;

#[derive(Args, Debug, Clone, Default)]
pub struct SettingsArgs {
    #[clap(long, env = "SYNC_CONFIG_PATH", global = true, help = "Path to the JSON settings file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "SYNC_BASE_URL", global = true, help = "Absolute base URL of the gallery API.")]
    pub base_url: Option<String>,

    #[clap(long, env = "SYNC_AUTH_TOKEN", global = true, hide_env_values = true, help = "Bearer token sent with every request.")]
    pub auth_token: Option<String>,

    #[clap(long, env = "SYNC_REQUEST_TIMEOUT_MS", global = true, help = "Timeout in milliseconds for each attempt.")]
    pub request_timeout_ms: Option<u64>,

    #[clap(long, env = "SYNC_MAX_RETRIES", global = true, help = "Retries after the first attempt.")]
    pub max_retries: Option<u32>,

    #[clap(long, env = "SYNC_BASE_DELAY_MS", global = true, help = "Backoff delay in milliseconds before the first retry.")]
    pub base_delay_ms: Option<u64>,

    #[clap(long, env = "SYNC_MAX_DELAY_MS", global = true, help = "Maximum backoff delay in milliseconds.")]
    pub max_delay_ms: Option<u64>,

    #[clap(long, env = "SYNC_BACKOFF_FACTOR", global = true, help = "Growth factor between consecutive backoff delays.")]
    pub backoff_factor: Option<f64>,

    #[clap(long, env = "SYNC_REFRESH_DEBOUNCE_MS", global = true, help = "Quiet period in milliseconds before an auto-refresh.")]
    pub refresh_debounce_ms: Option<u64>,

    #[clap(long, env = "SYNC_REFRESH_MIN_INTERVAL_MS", global = true, help = "Minimum milliseconds between two auto-refreshes.")]
    pub refresh_min_interval_ms: Option<u64>,

    #[clap(long, env = "SYNC_LOG_LEVEL", global = true, help = "Log filter (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "SYNC_LOG_DIR", global = true, help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,
}

impl SettingsArgs {
    /// The top layer: only what was given on the command line or in the environment.
    pub fn overrides(&self) -> ClientSettings {
        ClientSettings {
            base_url: self.base_url.clone(),
            auth_token: self.auth_token.clone(),
            request_timeout_ms: self.request_timeout_ms,
            max_retries: self.max_retries,
            base_delay_ms: self.base_delay_ms,
            max_delay_ms: self.max_delay_ms,
            backoff_factor: self.backoff_factor,
            refresh_debounce_ms: self.refresh_debounce_ms,
            refresh_min_interval_ms: self.refresh_min_interval_ms,
            log_level: self.log_level.clone(),
            log_dir: self.log_dir.clone(),
        }
    }

    pub fn resolve(&self) -> Result<ClientSettings, ConfigError> {
        let path = self
            .config_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        ClientSettings::resolve(&path, self.overrides())
    }
}

pub fn log_settings(settings: &ClientSettings) -> LogSettings {
    let defaults = LogSettings::default();
    LogSettings {
        level: settings.log_level.clone().unwrap_or(defaults.level),
        dir: settings.log_dir.clone().unwrap_or(defaults.dir),
        file_prefix: "sync-probe".to_string(),
        ..defaults
    }
}
