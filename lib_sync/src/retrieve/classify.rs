//! # Error Classifier
//!
//! Maps raw failures onto a closed taxonomy and a short, non-technical
//! sentence the UI can show as-is.
//!
//! The mapping is total and deterministic. For a raw `(message, status)` pair
//! the categories are tried in priority order:
//!
//! 1. transport / connection failure in the message
//! 2. timeout or abort in the message
//! 3. status >= 500
//! 4. a specific 4xx code (400, 401, 403, 404, 408, 409, 413, 415, 422, 429)
//! 5. any other 4xx
//! 6. a short, non-technical message, passed through unchanged
//! 7. the generic fallback
//!
//! Typed errors skip the substring probing where the kind already says what
//! happened; see [`NetworkError::new`].

use std::fmt;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use thiserror::Error;

/// Shown for DNS, connection refused/reset and other transport failures.
pub const MSG_NETWORK: &str =
    "Network connection failed. Please check your internet connection and try again.";
/// Shown for per-attempt timeouts, aborts and HTTP 408.
pub const MSG_TIMEOUT: &str = "Request timed out. Please try again.";
/// Shown for any 5xx status.
pub const MSG_SERVER: &str = "Server error. Please try again later.";
/// Shown for 4xx codes without a dedicated sentence.
pub const MSG_REQUEST_FAILED: &str = "Request failed. Please try again.";
/// Ultimate fallback.
pub const MSG_UNEXPECTED: &str = "An unexpected error occurred. Please try again.";

/// Messages at or above this length are never passed through.
const PASSTHROUGH_MAX_LEN: usize = 100;

const TRANSPORT_MARKERS: &[&str] = &[
    "network",
    "failed to fetch",
    "connection",
    "dns",
    "refused",
    "unreachable",
    "reset by peer",
];

const TIMEOUT_MARKERS: &[&str] = &["timeout", "timed out", "abort"];

const TECHNICAL_MARKERS: &[&str] = &[
    "error:",
    "exception",
    "stack",
    "undefined",
    "null",
    "panicked",
    "reqwest",
    "hyper",
    "{",
];

/// Closed classification of every failure this layer can surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkErrorKind {
    /// DNS failure, refused or reset connection, or any other transport error.
    TransportFailure,
    /// An attempt exceeded its timeout and was aborted.
    Timeout,
    /// The server answered with a 5xx status (or a non-4xx failure status).
    ServerError {
        /// HTTP status code.
        status: u16,
    },
    /// The server answered with a 4xx status.
    ClientError {
        /// HTTP status code.
        status: u16,
    },
    /// The server answered 2xx with `success: false`.
    ApplicationError {
        /// Server-supplied error text.
        message: String,
    },
    /// Rejected on the caller side before any network call.
    ValidationError {
        /// What was wrong with the input.
        message: String,
    },
}

impl fmt::Display for NetworkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransportFailure => write!(f, "transport failure"),
            Self::Timeout => write!(f, "timeout"),
            Self::ServerError { status } => write!(f, "server error ({status})"),
            Self::ClientError { status } => write!(f, "client error ({status})"),
            Self::ApplicationError { .. } => write!(f, "application error"),
            Self::ValidationError { .. } => write!(f, "validation error"),
        }
    }
}

/// A classified failure carrying both a machine-usable status and a
/// human-presentable message.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {message}")]
pub struct NetworkError {
    /// Classification.
    pub kind: NetworkErrorKind,
    /// Technical message, suitable for logs.
    pub message: String,
    /// HTTP status, or 0 when no response was received.
    pub status: u16,
    /// Number of attempts made before giving up (0 for validation errors).
    pub attempts: u32,
    /// When the error was constructed.
    pub timestamp: DateTime<Utc>,
    /// Short sentence for the UI.
    pub user_friendly_message: String,
}

impl NetworkError {
    /// Build an error from its parts; the user-facing sentence is derived here
    /// and nowhere else.
    pub fn new(kind: NetworkErrorKind, message: impl Into<String>, status: u16, attempts: u32) -> Self {
        let message = message.into();
        let user_friendly_message = match &kind {
            NetworkErrorKind::TransportFailure => MSG_NETWORK.to_string(),
            NetworkErrorKind::Timeout => MSG_TIMEOUT.to_string(),
            NetworkErrorKind::ServerError { .. }
            | NetworkErrorKind::ClientError { .. }
            | NetworkErrorKind::ApplicationError { .. }
            | NetworkErrorKind::ValidationError { .. } => user_friendly_message(&message, status),
        };
        Self {
            kind,
            message,
            status,
            attempts,
            timestamp: Utc::now(),
            user_friendly_message,
        }
    }

    /// A transport-level failure reported by the HTTP stack.
    pub fn transport(err: &dyn fmt::Display, attempts: u32) -> Self {
        Self::new(
            NetworkErrorKind::TransportFailure,
            format!("Network request failed: {err}"),
            0,
            attempts,
        )
    }

    /// An attempt that was aborted by its timeout.
    pub fn timeout(attempts: u32) -> Self {
        Self::new(NetworkErrorKind::Timeout, "Request timed out", 0, attempts)
    }

    /// A non-2xx response. `body` is the raw response text, if any; a JSON
    /// `error` or `message` field in it becomes the technical message.
    pub fn from_status(status: u16, body: Option<&str>, attempts: u32) -> Self {
        let message = body
            .and_then(message_from_body)
            .unwrap_or_else(|| status_line(status));
        let kind = if (400..500).contains(&status) {
            NetworkErrorKind::ClientError { status }
        } else {
            NetworkErrorKind::ServerError { status }
        };
        Self::new(kind, message, status, attempts)
    }

    /// A `success: false` envelope on an HTTP-success status.
    pub fn application(message: impl Into<String>, status: u16, attempts: u32) -> Self {
        let message = message.into();
        Self::new(
            NetworkErrorKind::ApplicationError {
                message: message.clone(),
            },
            message,
            status,
            attempts,
        )
    }

    /// Caller-side rejection before any network call.
    pub fn validation(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(
            NetworkErrorKind::ValidationError {
                message: message.clone(),
            },
            message,
            0,
            0,
        )
    }

    /// Whether the default retry policy treats this failure as transient:
    /// transport failures, timeouts, 5xx, 408 and 429.
    pub fn is_retryable(&self) -> bool {
        match self.kind {
            NetworkErrorKind::TransportFailure | NetworkErrorKind::Timeout => true,
            NetworkErrorKind::ServerError { .. } => true,
            NetworkErrorKind::ClientError { status } => status == 408 || status == 429,
            NetworkErrorKind::ApplicationError { .. } | NetworkErrorKind::ValidationError { .. } => false,
        }
    }
}

/// Map a raw failure message and status (0 for pure transport failures) to a
/// short, non-technical sentence. Never panics.
pub fn user_friendly_message(message: &str, status: u16) -> String {
    let lowered = message.to_lowercase();

    if TRANSPORT_MARKERS.iter().any(|m| lowered.contains(m)) {
        return MSG_NETWORK.to_string();
    }
    if TIMEOUT_MARKERS.iter().any(|m| lowered.contains(m)) {
        return MSG_TIMEOUT.to_string();
    }
    if status >= 500 {
        return MSG_SERVER.to_string();
    }
    if let Some(specific) = client_error_message(status) {
        return specific.to_string();
    }
    if (400..500).contains(&status) {
        return MSG_REQUEST_FAILED.to_string();
    }

    let trimmed = message.trim();
    if !trimmed.is_empty()
        && trimmed.chars().count() < PASSTHROUGH_MAX_LEN
        && !TECHNICAL_MARKERS.iter().any(|m| lowered.contains(m))
    {
        return trimmed.to_string();
    }

    MSG_UNEXPECTED.to_string()
}

fn client_error_message(status: u16) -> Option<&'static str> {
    let msg = match status {
        400 => "Invalid request. Please check your input and try again.",
        401 => "Authentication required. Please log in and try again.",
        403 => "You don't have permission to perform this action.",
        404 => "The requested resource was not found.",
        408 => MSG_TIMEOUT,
        409 => "This action conflicts with existing data. Please refresh and try again.",
        413 => "The file is too large. Please choose a smaller file.",
        415 => "This file type is not supported.",
        422 => "The submitted data is invalid. Please check your input.",
        429 => "Too many requests. Please wait a moment and try again.",
        _ => return None,
    };
    Some(msg)
}

fn message_from_body(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["error", "message"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .map(str::to_string)
}

fn status_line(status: u16) -> String {
    let reason = StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown Status");
    format!("HTTP {status}: {reason}")
}
