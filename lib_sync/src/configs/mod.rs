//! # Client Settings
//!
//! Every setting is optional so layers can be stacked: built-in defaults,
//! then a JSON file, then whatever the caller collected from the environment
//! and command line. A later layer wins wherever it has a value.
//!
//! File keys are camelCase:
//!
//! ```json
//! {
//!   "baseUrl": "https://gallery.example.com/",
//!   "authToken": "secret",
//!   "requestTimeoutMs": 30000,
//!   "maxRetries": 3,
//!   "baseDelayMs": 1000,
//!   "maxDelayMs": 10000,
//!   "backoffFactor": 2.0,
//!   "refreshDebounceMs": 500,
//!   "refreshMinIntervalMs": 2000,
//!   "logLevel": "info",
//!   "logDir": "logs"
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::refresh::RefreshOptions;
use crate::retrieve::{ApiClient, NetworkError, ResilientClient, RetryConfig, DEFAULT_ATTEMPT_TIMEOUT};

/// Default settings file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "sync_client.json";

/// Errors raised while loading or checking settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The settings file exists but could not be read.
    #[error("cannot read {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The settings file is not valid JSON for these settings.
    #[error("cannot parse {path}: {source}")]
    Parse {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
    /// No base URL in any layer.
    #[error("no base URL configured")]
    MissingBaseUrl,
    /// A value is out of range or malformed.
    #[error("invalid setting: {0}")]
    Invalid(String),
    /// The retry settings do not form a valid retry configuration.
    #[error("invalid retry settings: {0}")]
    Retry(#[from] NetworkError),
}

/// Layerable client settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSettings {
    /// Absolute base URL of the gallery API.
    pub base_url: Option<String>,
    /// Bearer token forwarded with every request.
    pub auth_token: Option<String>,
    /// Per-attempt timeout.
    pub request_timeout_ms: Option<u64>,
    /// Retries after the first attempt.
    pub max_retries: Option<u32>,
    /// Backoff delay before the first retry.
    pub base_delay_ms: Option<u64>,
    /// Cap on any single backoff delay.
    pub max_delay_ms: Option<u64>,
    /// Growth factor between consecutive delays.
    pub backoff_factor: Option<f64>,
    /// Auto-refresh quiet period.
    pub refresh_debounce_ms: Option<u64>,
    /// Auto-refresh minimum spacing.
    pub refresh_min_interval_ms: Option<u64>,
    /// Log filter directive (`info`, `lib_sync=debug`, ...).
    pub log_level: Option<String>,
    /// Directory for log files.
    pub log_dir: Option<PathBuf>,
}

impl ClientSettings {
    /// Built-in defaults: the bottom layer.
    pub fn defaults() -> Self {
        let retry = RetryConfig::default();
        let refresh = RefreshOptions::default();
        Self {
            base_url: Some("http://localhost:3000/".to_string()),
            auth_token: None,
            request_timeout_ms: Some(DEFAULT_ATTEMPT_TIMEOUT.as_millis() as u64),
            max_retries: Some(retry.max_retries),
            base_delay_ms: Some(retry.base_delay.as_millis() as u64),
            max_delay_ms: Some(retry.max_delay.as_millis() as u64),
            backoff_factor: Some(retry.backoff_factor),
            refresh_debounce_ms: Some(refresh.debounce.as_millis() as u64),
            refresh_min_interval_ms: Some(refresh.min_interval.as_millis() as u64),
            log_level: Some("info".to_string()),
            log_dir: Some(PathBuf::from("logs")),
        }
    }

    /// Stack `other` on top of `self`: its `Some` values win.
    pub fn merge(self, other: ClientSettings) -> ClientSettings {
        ClientSettings {
            base_url: other.base_url.or(self.base_url),
            auth_token: other.auth_token.or(self.auth_token),
            request_timeout_ms: other.request_timeout_ms.or(self.request_timeout_ms),
            max_retries: other.max_retries.or(self.max_retries),
            base_delay_ms: other.base_delay_ms.or(self.base_delay_ms),
            max_delay_ms: other.max_delay_ms.or(self.max_delay_ms),
            backoff_factor: other.backoff_factor.or(self.backoff_factor),
            refresh_debounce_ms: other.refresh_debounce_ms.or(self.refresh_debounce_ms),
            refresh_min_interval_ms: other.refresh_min_interval_ms.or(self.refresh_min_interval_ms),
            log_level: other.log_level.or(self.log_level),
            log_dir: other.log_dir.or(self.log_dir),
        }
    }

    /// Read one JSON settings file.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Defaults, then `file` if it exists, then `overrides`. The result is
    /// validated.
    pub fn resolve(file: &Path, overrides: ClientSettings) -> Result<Self, ConfigError> {
        let mut settings = Self::defaults();
        if file.exists() {
            settings = settings.merge(Self::load_file(file)?);
            info!(path = %file.display(), "loaded settings file");
        } else {
            info!(path = %file.display(), "settings file not found; using defaults and overrides");
        }
        let settings = settings.merge(overrides);
        settings.validate()?;
        Ok(settings)
    }

    /// Retry configuration; unset fields take the library defaults.
    pub fn retry_config(&self) -> RetryConfig {
        let mut retry = RetryConfig::default();
        if let Some(n) = self.max_retries {
            retry = retry.with_max_retries(n);
        }
        if let Some(ms) = self.base_delay_ms {
            retry = retry.with_base_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = self.max_delay_ms {
            retry = retry.with_max_delay(Duration::from_millis(ms));
        }
        if let Some(factor) = self.backoff_factor {
            retry = retry.with_backoff_factor(factor);
        }
        retry
    }

    /// Auto-refresh options; unset fields take the library defaults.
    pub fn refresh_options(&self) -> RefreshOptions {
        let mut options = RefreshOptions::default();
        if let Some(ms) = self.refresh_debounce_ms {
            options = options.with_debounce(Duration::from_millis(ms));
        }
        if let Some(ms) = self.refresh_min_interval_ms {
            options = options.with_min_interval(Duration::from_millis(ms));
        }
        options
    }

    /// Per-attempt request timeout.
    pub fn attempt_timeout(&self) -> Duration {
        self.request_timeout_ms
            .map_or(DEFAULT_ATTEMPT_TIMEOUT, Duration::from_millis)
    }

    /// Check the settings can drive a client.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let base_url = self.base_url.as_deref().ok_or(ConfigError::MissingBaseUrl)?;
        let parsed = url::Url::parse(base_url)
            .map_err(|e| ConfigError::Invalid(format!("baseUrl '{base_url}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "baseUrl '{base_url}' must use http or https"
            )));
        }
        if self.request_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid("requestTimeoutMs must be positive".into()));
        }
        self.retry_config().validate()?;
        Ok(())
    }

    /// An [`ApiClient`] configured from these settings.
    pub fn api_client(&self) -> Result<ApiClient, ConfigError> {
        self.validate()?;
        let base_url = self.base_url.as_deref().ok_or(ConfigError::MissingBaseUrl)?;
        let client = ApiClient::new(base_url, self.auth_token.clone())
            .map_err(|e| ConfigError::Invalid(e.message))?
            .with_client(ResilientClient::new().with_attempt_timeout(self.attempt_timeout()))
            .with_retry(self.retry_config());
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_settings(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(json.as_bytes()).expect("write settings");
        file
    }

    #[test]
    fn defaults_are_valid_and_match_library_defaults() {
        let settings = ClientSettings::defaults();
        settings.validate().expect("defaults validate");

        let retry = settings.retry_config();
        assert_eq!(retry.max_retries, 3);
        assert_eq!(retry.base_delay, Duration::from_secs(1));
        assert_eq!(retry.max_delay, Duration::from_secs(10));
        assert_eq!(settings.refresh_options(), RefreshOptions::default());
        assert_eq!(settings.attempt_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn merge_prefers_the_upper_layer() {
        let lower = ClientSettings {
            base_url: Some("http://lower/".into()),
            max_retries: Some(1),
            log_level: Some("warn".into()),
            ..Default::default()
        };
        let upper = ClientSettings {
            max_retries: Some(5),
            ..Default::default()
        };

        let merged = lower.merge(upper);
        assert_eq!(merged.base_url.as_deref(), Some("http://lower/"));
        assert_eq!(merged.max_retries, Some(5));
        assert_eq!(merged.log_level.as_deref(), Some("warn"));
    }

    #[test]
    fn file_layer_sits_between_defaults_and_overrides() {
        let file = write_settings(
            r#"{"baseUrl":"https://gallery.example.com/","maxRetries":6,"refreshDebounceMs":250}"#,
        );
        let overrides = ClientSettings {
            max_retries: Some(2),
            ..Default::default()
        };

        let settings = ClientSettings::resolve(file.path(), overrides).expect("resolves");

        assert_eq!(settings.base_url.as_deref(), Some("https://gallery.example.com/"));
        assert_eq!(settings.max_retries, Some(2));
        assert_eq!(settings.refresh_options().debounce, Duration::from_millis(250));
        assert_eq!(settings.backoff_factor, Some(2.0));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let settings =
            ClientSettings::resolve(&dir.path().join("absent.json"), ClientSettings::default())
                .expect("resolves");
        assert_eq!(settings, ClientSettings::defaults());
    }

    #[test]
    fn malformed_file_is_reported() {
        let file = write_settings("{ not json");
        let err = ClientSettings::resolve(file.path(), ClientSettings::default()).expect_err("parse error");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let relative = ClientSettings {
            base_url: Some("api/".into()),
            ..ClientSettings::defaults()
        };
        assert!(matches!(relative.validate(), Err(ConfigError::Invalid(_))));

        let shrinking = ClientSettings {
            backoff_factor: Some(0.5),
            ..ClientSettings::defaults()
        };
        assert!(matches!(shrinking.validate(), Err(ConfigError::Retry(_))));

        let inverted = ClientSettings {
            base_delay_ms: Some(20_000),
            ..ClientSettings::defaults()
        };
        assert!(matches!(inverted.validate(), Err(ConfigError::Retry(_))));

        let no_url = ClientSettings {
            base_url: None,
            ..ClientSettings::defaults()
        };
        assert!(matches!(no_url.validate(), Err(ConfigError::MissingBaseUrl)));
    }

    #[test]
    fn builds_a_client_from_settings() {
        let settings = ClientSettings {
            base_url: Some("https://gallery.example.com/".into()),
            max_retries: Some(1),
            ..ClientSettings::defaults()
        };
        let client = settings.api_client().expect("client builds");
        assert_eq!(client.base_url().as_str(), "https://gallery.example.com/");
        assert_eq!(client.retry().max_retries, 1);
    }
}
