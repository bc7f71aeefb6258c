//! # Optimistic Updates
//!
//! [`OptimisticCoordinator`] owns one slice of visible state. A mutation is
//! shown immediately, the backing operation runs, and the slice either adopts
//! the operation's result or returns to what it was before the mutation.
//!
//! ## Guarantees:
//!
//! - Every in-flight mutation has exactly one [`UpdateRecord`], keyed by a
//!   caller-chosen id. A second `apply` with an id that is still in flight is
//!   refused with [`ApplyError::DuplicateId`] before anything changes.
//! - Each record is rolled back at most once. Whichever comes first (the
//!   operation failing, [`rollback`](OptimisticCoordinator::rollback),
//!   [`clear_all`](OptimisticCoordinator::clear_all), or the `apply` future
//!   being dropped) consumes the record; later settlements leave the slice
//!   alone.
//! - On failure the original data is visible again before the error is
//!   returned.
//!
//! Watchers follow the slice through a `tokio::sync::watch` receiver.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Bookkeeping for one in-flight optimistic mutation.
#[derive(Debug, Clone)]
pub struct UpdateRecord<T> {
    /// Caller-chosen id, unique among in-flight mutations of this slice.
    pub id: String,
    /// Visible state right before the mutation was shown.
    pub original_data: T,
    /// State shown while the operation runs.
    pub optimistic_data: T,
    /// When the mutation was applied.
    pub timestamp: Instant,
    /// Tie-breaker for records sharing a timestamp.
    pub seq: u64,
}

/// Why an optimistic `apply` did not succeed.
#[derive(Debug, Error)]
pub enum ApplyError<E> {
    /// Another mutation with this id is still in flight.
    #[error("optimistic update '{0}' is already in flight")]
    DuplicateId(String),
    /// The backing operation failed; the slice has been restored.
    #[error("{0}")]
    Operation(E),
}

impl<E> ApplyError<E> {
    /// The operation's error, if that is what failed.
    pub fn into_operation(self) -> Option<E> {
        match self {
            ApplyError::Operation(e) => Some(e),
            ApplyError::DuplicateId(_) => None,
        }
    }
}

struct Ledger<T> {
    next_seq: u64,
    records: HashMap<String, UpdateRecord<T>>,
}

struct Inner<T> {
    state: watch::Sender<T>,
    ledger: Mutex<Ledger<T>>,
}

/// Optimistic state holder for one slice. Clones share the slice.
pub struct OptimisticCoordinator<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for OptimisticCoordinator<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for OptimisticCoordinator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimisticCoordinator")
            .field("pending", &self.ledger().records.len())
            .finish()
    }
}

impl<T> OptimisticCoordinator<T> {
    fn ledger(&self) -> MutexGuard<'_, Ledger<T>> {
        self.inner.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> OptimisticCoordinator<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// A slice starting at `initial`, with nothing pending.
    pub fn new(initial: T) -> Self {
        let (state, _) = watch::channel(initial);
        Self {
            inner: Arc::new(Inner {
                state,
                ledger: Mutex::new(Ledger {
                    next_seq: 0,
                    records: HashMap::new(),
                }),
            }),
        }
    }

    /// Show `update_fn(current)` now, then run `operation`.
    ///
    /// On success the operation's result becomes the visible state and is
    /// returned. On failure the state from before this call is restored and
    /// the error is returned. If the record was already rolled back by the
    /// time the operation settles, the visible state is left as it is.
    ///
    /// `update_fn` runs while the slice's record lock is held and must not
    /// call back into this coordinator.
    pub async fn apply<F, Op, Fut, E>(
        &self,
        id: impl Into<String>,
        update_fn: F,
        operation: Op,
    ) -> Result<T, ApplyError<E>>
    where
        F: FnOnce(&T) -> T,
        Op: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let id = id.into();
        {
            let mut ledger = self.ledger();
            if ledger.records.contains_key(&id) {
                warn!(id = %id, "optimistic update already in flight");
                return Err(ApplyError::DuplicateId(id));
            }
            let original_data = self.inner.state.borrow().clone();
            let optimistic_data = update_fn(&original_data);
            ledger.next_seq += 1;
            let seq = ledger.next_seq;
            ledger.records.insert(
                id.clone(),
                UpdateRecord {
                    id: id.clone(),
                    original_data,
                    optimistic_data: optimistic_data.clone(),
                    timestamp: Instant::now(),
                    seq,
                },
            );
            self.inner.state.send_replace(optimistic_data);
        }
        debug!(id = %id, "optimistic update applied");

        let mut guard = SettleGuard {
            coordinator: self,
            id: &id,
            armed: true,
        };
        let outcome = operation().await;
        guard.armed = false;

        let record = self.ledger().records.remove(&id);
        match outcome {
            Ok(value) => {
                if record.is_some() {
                    self.inner.state.send_replace(value.clone());
                    debug!(id = %id, "optimistic update confirmed");
                } else {
                    debug!(id = %id, "operation succeeded after rollback; state left as is");
                }
                Ok(value)
            }
            Err(e) => {
                if let Some(record) = record {
                    self.inner.state.send_replace(record.original_data);
                    debug!(id = %id, "optimistic update rolled back after failure");
                }
                Err(ApplyError::Operation(e))
            }
        }
    }

    /// Undo one in-flight mutation now. Returns `false` if `id` is not pending.
    pub fn rollback(&self, id: &str) -> bool {
        let record = self.ledger().records.remove(id);
        match record {
            Some(record) => {
                self.inner.state.send_replace(record.original_data);
                debug!(id = %id, "optimistic update rolled back");
                true
            }
            None => false,
        }
    }

    /// Abandon every pending mutation, restoring the original data of the
    /// oldest one. Returns how many records were discarded.
    pub fn clear_all(&self) -> usize {
        let records: Vec<UpdateRecord<T>> = {
            let mut ledger = self.ledger();
            ledger.records.drain().map(|(_, r)| r).collect()
        };
        let count = records.len();
        if let Some(oldest) = records.into_iter().min_by_key(|r| (r.timestamp, r.seq)) {
            self.inner.state.send_replace(oldest.original_data);
        }
        if count > 0 {
            debug!(count, "cleared pending optimistic updates");
        }
        count
    }

    /// Snapshot of pending records, oldest first.
    pub fn pending(&self) -> Vec<UpdateRecord<T>> {
        let mut records: Vec<UpdateRecord<T>> = self.ledger().records.values().cloned().collect();
        records.sort_by_key(|r| (r.timestamp, r.seq));
        records
    }

    /// Ids of pending records, oldest first.
    pub fn pending_ids(&self) -> Vec<String> {
        self.pending().into_iter().map(|r| r.id).collect()
    }

    /// Whether `id` is in flight.
    pub fn is_pending(&self, id: &str) -> bool {
        self.ledger().records.contains_key(id)
    }

    /// The visible state.
    pub fn current(&self) -> T {
        self.inner.state.borrow().clone()
    }

    /// Receiver notified on every visible-state change.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.inner.state.subscribe()
    }

    /// Replace the visible state with confirmed server data. Pending records
    /// keep their own snapshots.
    pub fn set(&self, value: T) {
        self.inner.state.send_replace(value);
    }
}

/// Rolls the record back if the `apply` future is dropped mid-operation.
struct SettleGuard<'a, T>
where
    T: Clone + Send + Sync + 'static,
{
    coordinator: &'a OptimisticCoordinator<T>,
    id: &'a str,
    armed: bool,
}

impl<T> Drop for SettleGuard<'_, T>
where
    T: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if self.armed && self.coordinator.rollback(self.id) {
            debug!(id = %self.id, "optimistic update abandoned");
        }
    }
}
