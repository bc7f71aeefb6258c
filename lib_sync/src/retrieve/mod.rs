//! # HTTP Retrieval Module
//!
//! Everything between a caller and the remote gallery API lives here.
//!
//! ## Contained Modules:
//!
//! - **`classify`**: the closed error taxonomy (`NetworkErrorKind`) and the
//!   total mapping from a raw failure to a short, user-presentable sentence.
//! - **`retry`**: immutable per-call retry configuration with deterministic,
//!   capped exponential backoff and the default retry predicate.
//! - **`resilient`**: `ResilientClient`, which issues one logical HTTP call as
//!   up to `max_retries + 1` attempts, each under its own timeout.
//! - **`api_client`**: `ApiClient`, which joins paths onto a base URL, injects
//!   the bearer token, and unwraps the `{success, data, error}` envelope.
//!
//! Callers never see a bare transport error: every failure leaving this module
//! is a `NetworkError`.

/// Error taxonomy and user-facing message classification.
pub mod classify;
/// Retry configuration and backoff math.
pub mod retry;
/// Retrying request client with per-attempt timeouts.
pub mod resilient;
/// Envelope-aware API client built on the resilient client.
pub mod api_client;

#[cfg(test)]
pub(crate) mod test_server;

pub use api_client::{ApiClient, ApiResponse, Pagination};
pub use classify::{user_friendly_message, NetworkError, NetworkErrorKind};
pub use resilient::{FetchedResponse, FormPart, RequestBody, ResilientClient, DEFAULT_ATTEMPT_TIMEOUT};
pub use retry::{default_retry_condition, AttemptFailure, RetryCondition, RetryConfig};
