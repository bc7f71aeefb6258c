//! # Auto-Refresh
//!
//! Runs a caller-supplied refresh whenever any of a set of bus events fire,
//! debounced and rate-limited.
//!
//! ## Timing rules:
//!
//! 1.  Every notification (re)arms a debounce deadline `debounce` from now, so
//!     a burst collapses into one refresh after the burst goes quiet.
//! 2.  When the deadline elapses but less than `min_interval` has passed since
//!     the previous refresh started, the deadline moves to
//!     `previous + min_interval` instead of firing early.
//! 3.  Refreshes are awaited in the scheduler task, so they never overlap.
//!     Notifications arriving meanwhile arm the next round.
//!
//! Each registration owns one tokio task. Dropping or stopping the
//! [`RefreshHandle`] cancels the task and releases its bus subscriptions.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::events::{EventBus, EventName, Subscription};

/// Debounce and rate-limit settings for one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshOptions {
    /// Quiet period required after the last notification.
    pub debounce: Duration,
    /// Minimum spacing between two refreshes.
    pub min_interval: Duration,
    /// When false, `register` returns an inert handle.
    pub enabled: bool,
}

impl Default for RefreshOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            min_interval: Duration::from_secs(2),
            enabled: true,
        }
    }
}

impl RefreshOptions {
    /// Set the debounce window.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Set the minimum spacing between refreshes.
    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    /// Enable or disable the registration.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Entry point for registering refresh callbacks.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoRefresh;

impl AutoRefresh {
    /// Subscribe to `events` on `bus` and call `refresh_fn` according to
    /// `options`.
    ///
    /// Must be called from within a tokio runtime; outside one the handle is
    /// inert and an error is logged.
    pub fn register<F, Fut>(
        bus: &EventBus,
        events: &[EventName],
        options: RefreshOptions,
        refresh_fn: F,
    ) -> RefreshHandle
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if !options.enabled {
            debug!("auto-refresh disabled; nothing registered");
            return RefreshHandle::inert();
        }
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!("auto-refresh needs a tokio runtime: {e}");
                return RefreshHandle::inert();
            }
        };

        let (notify, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let count = Arc::new(AtomicU64::new(0));

        let subscriptions = events
            .iter()
            .map(|&name| {
                let notify = notify.clone();
                bus.subscribe(name, move |_| {
                    let _ = notify.send(());
                })
            })
            .collect();

        runtime.spawn(run_scheduler(
            rx,
            options,
            refresh_fn,
            cancel.clone(),
            Arc::clone(&count),
        ));
        debug!(events = ?events, ?options, "auto-refresh registered");

        RefreshHandle {
            notify: Some(notify),
            subscriptions,
            cancel,
            count,
        }
    }
}

async fn run_scheduler<F, Fut>(
    mut rx: mpsc::UnboundedReceiver<()>,
    options: RefreshOptions,
    refresh_fn: F,
    cancel: CancellationToken,
    count: Arc<AtomicU64>,
) where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut deadline: Option<Instant> = None;
    let mut last_fired: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = rx.recv() => match msg {
                Some(()) => {
                    deadline = Some(Instant::now() + options.debounce);
                    trace!("refresh debounce re-armed");
                }
                None => break,
            },
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                let now = Instant::now();
                if let Some(last) = last_fired {
                    let earliest = last + options.min_interval;
                    if now < earliest {
                        trace!(wait_ms = (earliest - now).as_millis() as u64, "refresh rate-limited");
                        deadline = Some(earliest);
                        continue;
                    }
                }
                deadline = None;
                last_fired = Some(now);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = refresh_fn() => {}
                }
                let total = count.fetch_add(1, Ordering::SeqCst) + 1;
                debug!(total, "auto-refresh fired");
            }
        }
    }
    debug!("auto-refresh stopped");
}

/// Owns one registration. Dropping it tears the registration down.
#[derive(Debug)]
pub struct RefreshHandle {
    notify: Option<mpsc::UnboundedSender<()>>,
    subscriptions: Vec<Subscription>,
    cancel: CancellationToken,
    count: Arc<AtomicU64>,
}

impl RefreshHandle {
    fn inert() -> Self {
        let cancel = CancellationToken::new();
        cancel.cancel();
        Self {
            notify: None,
            subscriptions: Vec::new(),
            cancel,
            count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Request a refresh through the same debounce as bus events.
    pub fn trigger(&self) {
        if let Some(notify) = &self.notify {
            let _ = notify.send(());
        }
    }

    /// Refreshes completed so far.
    pub fn refresh_count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }

    /// Whether the scheduler is still running.
    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Cancel the scheduler and release all subscriptions. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
        for subscription in &self.subscriptions {
            subscription.unsubscribe();
        }
    }
}

impl Drop for RefreshHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tokio::time::sleep;

    use super::*;
    use crate::events::BusEvent;

    fn added() -> BusEvent {
        BusEvent::ImageAdded {
            image: serde_json::json!({"id": 1}),
        }
    }

    /// Refresh callback that records the instant of every call.
    fn recorder() -> (
        Arc<Mutex<Vec<Instant>>>,
        impl Fn() -> std::future::Ready<()> + Send + 'static,
    ) {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&fired);
        let refresh = move || {
            sink.lock().unwrap().push(Instant::now());
            std::future::ready(())
        };
        (fired, refresh)
    }

    #[tokio::test(start_paused = true)]
    async fn burst_collapses_into_one_refresh_after_debounce() {
        let bus = EventBus::new();
        let (fired, refresh) = recorder();
        let handle = AutoRefresh::register(&bus, &[EventName::ImageAdded], RefreshOptions::default(), refresh);

        let start = Instant::now();
        bus.publish(added());
        sleep(Duration::from_millis(100)).await;
        bus.publish(added());
        sleep(Duration::from_millis(100)).await;
        bus.publish(added());

        sleep(Duration::from_secs(5)).await;
        let fired = fired.lock().unwrap().clone();
        assert_eq!(fired.len(), 1);
        assert!(fired[0] >= start + Duration::from_millis(700));
        assert_eq!(handle.refresh_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refreshes_are_spaced_by_min_interval() {
        let bus = EventBus::new();
        let (fired, refresh) = recorder();
        let _handle = AutoRefresh::register(&bus, &[EventName::ImageAdded], RefreshOptions::default(), refresh);

        bus.publish(added());
        sleep(Duration::from_millis(600)).await;
        assert_eq!(fired.lock().unwrap().len(), 1);

        bus.publish(added());
        sleep(Duration::from_secs(5)).await;

        let fired = fired.lock().unwrap().clone();
        assert_eq!(fired.len(), 2);
        assert!(fired[1] >= fired[0] + Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn steady_stream_is_rate_limited() {
        let bus = EventBus::new();
        let (fired, refresh) = recorder();
        let options = RefreshOptions::default().with_debounce(Duration::from_millis(100));
        let _handle = AutoRefresh::register(&bus, &[EventName::ImageUpdated], options, refresh);

        for _ in 0..20 {
            bus.publish(BusEvent::ImageUpdated {
                image: serde_json::json!({}),
            });
            sleep(Duration::from_millis(300)).await;
        }
        sleep(Duration::from_secs(3)).await;

        let fired = fired.lock().unwrap().clone();
        assert!(fired.len() >= 2);
        for pair in fired.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(2));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn manual_trigger_goes_through_debounce() {
        let bus = EventBus::new();
        let (fired, refresh) = recorder();
        let handle = AutoRefresh::register(&bus, &[], RefreshOptions::default(), refresh);

        handle.trigger();
        handle.trigger();
        sleep(Duration::from_millis(400)).await;
        assert!(fired.lock().unwrap().is_empty());

        sleep(Duration::from_millis(200)).await;
        assert_eq!(handle.refresh_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_registration_is_inert() {
        let bus = EventBus::new();
        let (fired, refresh) = recorder();
        let handle = AutoRefresh::register(
            &bus,
            &[EventName::ImageAdded],
            RefreshOptions::default().with_enabled(false),
            refresh,
        );

        assert_eq!(bus.subscriber_count(EventName::ImageAdded), 0);
        assert!(!handle.is_active());
        handle.trigger();
        bus.publish(added());
        sleep(Duration::from_secs(5)).await;
        assert!(fired.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_releases_subscriptions_and_timers() {
        let bus = EventBus::new();
        let (fired, refresh) = recorder();
        let handle = AutoRefresh::register(
            &bus,
            &[EventName::ImageAdded, EventName::ImageDeleted],
            RefreshOptions::default(),
            refresh,
        );
        assert_eq!(bus.subscriber_count(EventName::ImageAdded), 1);
        assert_eq!(bus.subscriber_count(EventName::ImageDeleted), 1);

        bus.publish(added());
        sleep(Duration::from_millis(100)).await;
        drop(handle);

        assert_eq!(bus.subscriber_count(EventName::ImageAdded), 0);
        assert_eq!(bus.subscriber_count(EventName::ImageDeleted), 0);
        sleep(Duration::from_secs(5)).await;
        assert!(fired.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_refreshes_never_overlap() {
        let bus = EventBus::new();
        let running = Arc::new(AtomicU64::new(0));
        let overlapped = Arc::new(AtomicU64::new(0));
        let refresh = {
            let running = Arc::clone(&running);
            let overlapped = Arc::clone(&overlapped);
            move || {
                let running = Arc::clone(&running);
                let overlapped = Arc::clone(&overlapped);
                async move {
                    if running.fetch_add(1, Ordering::SeqCst) > 0 {
                        overlapped.fetch_add(1, Ordering::SeqCst);
                    }
                    sleep(Duration::from_secs(3)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                }
            }
        };
        let handle = AutoRefresh::register(&bus, &[EventName::ImageAdded], RefreshOptions::default(), refresh);

        for _ in 0..6 {
            bus.publish(added());
            sleep(Duration::from_secs(1)).await;
        }
        sleep(Duration::from_secs(10)).await;

        assert_eq!(overlapped.load(Ordering::SeqCst), 0);
        assert!(handle.refresh_count() >= 2);
    }
}
