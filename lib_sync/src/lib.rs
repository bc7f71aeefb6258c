//! # lib_sync
//!
//! Client-side resilience and consistency layer sitting between UI-triggered
//! actions and the gallery HTTP API.
//!
//! Each folder-module is gated behind a cargo feature of the same name, and
//! `full` (the default) enables all of them:
//!
//! - **`retrieve`**: error classifier, retry configuration, the resilient
//!   request client and the envelope-aware `ApiClient`.
//! - **`events`**: the process-wide event bus and its closed vocabulary.
//! - **`optimistic`**: optimistic update coordinator with exactly-once rollback.
//! - **`refresh`**: debounced, rate-limited auto-refresh driven by bus events.
//! - **`ops`**: the gallery operations facade tying the pieces together.
//! - **`configs`** / **`loggers`**: ambient settings and logging setup.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Client settings with defaults, JSON file loading and layered overrides.
#[cfg(feature = "configs")]
pub mod configs;
/// Process-wide publish/subscribe bus.
#[cfg(feature = "events")]
pub mod events;
/// Logging setup for binaries using this library.
#[cfg(feature = "loggers")]
pub mod loggers;
/// Gallery operations facade.
#[cfg(feature = "ops")]
pub mod ops;
/// Optimistic update coordinator.
#[cfg(feature = "optimistic")]
pub mod optimistic;
/// Debounced auto-refresh scheduler.
#[cfg(feature = "refresh")]
pub mod refresh;
/// Resilient HTTP retrieval.
#[cfg(feature = "retrieve")]
pub mod retrieve;

#[cfg(feature = "configs")]
pub use configs::{ClientSettings, ConfigError};
#[cfg(feature = "events")]
pub use events::{BusEvent, EventBus, EventName, Subscription};
#[cfg(feature = "ops")]
pub use ops::GalleryOps;
#[cfg(feature = "optimistic")]
pub use optimistic::{ApplyError, OptimisticCoordinator, UpdateRecord};
#[cfg(feature = "refresh")]
pub use refresh::{AutoRefresh, RefreshHandle, RefreshOptions};
#[cfg(feature = "retrieve")]
pub use retrieve::{
    ApiClient, ApiResponse, NetworkError, NetworkErrorKind, RequestBody, ResilientClient,
    RetryConfig,
};
