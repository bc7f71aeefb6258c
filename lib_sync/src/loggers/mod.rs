//! # Logging Setup
//!
//! One call for binaries: a `tracing` registry with an `EnvFilter`, an ANSI
//! console layer and a JSON file layer written through a daily rolling,
//! non-blocking appender.
//!
//! `RUST_LOG` wins over the configured level when it is set. Keep the returned
//! [`WorkerGuard`] alive until exit or buffered lines are lost.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use thiserror::Error;
use tracing::debug;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Where and how much to log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Directory holding the rolling files.
    pub dir: PathBuf,
    /// File name prefix; the appender adds the date.
    pub file_prefix: String,
    /// Older files beyond this many are deleted at startup.
    pub keep_files: usize,
    /// Also log to stdout.
    pub console: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: PathBuf::from("logs"),
            file_prefix: "lib_sync".to_string(),
            keep_files: 7,
            console: true,
        }
    }
}

/// Logging could not be set up.
#[derive(Debug, Error)]
pub enum LogError {
    /// Creating or cleaning the log directory failed.
    #[error("log directory {path}: {source}")]
    Io {
        /// Directory involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The level is not a valid filter directive.
    #[error("invalid log filter '{directive}': {reason}")]
    Filter {
        /// Directive as given.
        directive: String,
        /// Parser message.
        reason: String,
    },
    /// A global subscriber is already installed.
    #[error("cannot install subscriber: {0}")]
    Init(String),
}

/// Install the global subscriber.
pub fn setup_logging(settings: &LogSettings) -> Result<WorkerGuard, LogError> {
    fs::create_dir_all(&settings.dir).map_err(|source| LogError::Io {
        path: settings.dir.clone(),
        source,
    })?;
    let removed = cleanup_old_logs(&settings.dir, &settings.file_prefix, settings.keep_files)?;

    let file_appender = rolling::daily(&settings.dir, &settings.file_prefix);
    let (writer, guard) = non_blocking(file_appender);

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => level_filter(&settings.level)?,
    };
    let console_layer = settings
        .console
        .then(|| fmt::layer().with_target(true).with_ansi(true));
    let file_layer = fmt::layer().with_ansi(false).with_writer(writer).json();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LogError::Init(e.to_string()))?;

    debug!(dir = %settings.dir.display(), removed, "logging initialised");
    Ok(guard)
}

/// Parse a filter directive such as `info` or `lib_sync=debug,warn`.
pub fn level_filter(directive: &str) -> Result<EnvFilter, LogError> {
    EnvFilter::try_new(directive).map_err(|e| LogError::Filter {
        directive: directive.to_string(),
        reason: e.to_string(),
    })
}

/// Delete files in `dir` starting with `prefix`, keeping the `keep` most
/// recently modified. Returns how many were deleted.
pub fn cleanup_old_logs(dir: &Path, prefix: &str, keep: usize) -> Result<usize, LogError> {
    let entries = fs::read_dir(dir).map_err(|source| LogError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut logs: Vec<(SystemTime, PathBuf)> = entries
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with(prefix))
        .filter_map(|e| {
            let meta = e.metadata().ok()?;
            meta.is_file().then_some(())?;
            Some((meta.modified().ok()?, e.path()))
        })
        .collect();

    // Newest first.
    logs.sort_by(|a, b| b.0.cmp(&a.0));

    let mut removed = 0;
    for (_, path) in logs.iter().skip(keep) {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => eprintln!("Failed to delete old log file {}: {e}", path.display()),
        }
    }
    Ok(removed)
}
