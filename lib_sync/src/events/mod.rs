//! # Events
//!
//! A small synchronous event bus. Components publish semantic events
//! (`image:added`, `labels:refreshed`, ...) and others react without knowing
//! who produced them.
//!
//! Construct an [`EventBus`] and pass clones around, or use [`global()`] for
//! the lazily created process-wide instance.

mod bus;
mod names;

use static_init::dynamic;

pub use bus::{EventBus, Subscription};
pub use names::{BusEvent, EventName, UnknownEventName, UploadStatus};

#[dynamic]
static GLOBAL_BUS: EventBus = EventBus::new();

/// Handle to the process-wide bus. Every call returns a clone sharing the
/// same registry.
pub fn global() -> EventBus {
    EventBus::clone(&GLOBAL_BUS)
}
