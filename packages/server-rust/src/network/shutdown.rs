//! Lifecycle state shared between a serve loop and whoever stops it, plus a
//! counter of requests still being handled.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::watch;

/// Lifecycle state of a supervised component.
///
/// State machine: Idle -> Starting -> Running -> {ShuttingDown -> Stopped | Failed}
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Constructed, not yet started.
    Idle,
    /// Launching background units.
    Starting,
    /// Fully operational and accepting requests.
    Running,
    /// Draining in-flight requests; no new requests accepted.
    ShuttingDown,
    /// Every unit completed.
    Stopped,
    /// A unit reported a fatal error or shutdown missed its deadline.
    Failed,
}

impl LifecycleState {
    /// Lowercase name used in logs and health reports.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::ShuttingDown => "shutting_down",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }

    /// Returns `true` for `Stopped` and `Failed`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }
}

/// Controls graceful shutdown with state management and in-flight tracking.
///
/// 1. Units check `state()` or `is_shutting_down()`, or select on `stopped()`
/// 2. Request handlers hold an `in_flight_guard()` while working
/// 3. `trigger_shutdown()` moves to `ShuttingDown` and signals all listeners
///
/// The shutdown flag is sticky: a trigger that lands before anyone listens is
/// still seen by `is_shutting_down()` and by every later `stopped()`.
#[derive(Debug)]
pub struct ShutdownController {
    shutdown_signal: watch::Sender<bool>,
    in_flight: Arc<AtomicU64>,
    state: Arc<ArcSwap<LifecycleState>>,
}

impl ShutdownController {
    /// Creates a new shutdown controller in the `Idle` state.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            shutdown_signal: tx,
            in_flight: Arc::new(AtomicU64::new(0)),
            state: Arc::new(ArcSwap::from_pointee(LifecycleState::Idle)),
        }
    }

    /// Moves `Idle` to `Starting`. Returns `false`, changing nothing, from
    /// any other state.
    #[must_use]
    pub fn try_start(&self) -> bool {
        let previous = self.state.rcu(|current| {
            if **current == LifecycleState::Idle {
                Arc::new(LifecycleState::Starting)
            } else {
                Arc::clone(current)
            }
        });
        *previous == LifecycleState::Idle
    }

    /// Moves `Starting` to `Running`. Any other state, in particular a
    /// shutdown that raced with startup, is left alone.
    pub fn set_running(&self) {
        self.state.rcu(|current| {
            if **current == LifecycleState::Starting {
                Arc::new(LifecycleState::Running)
            } else {
                Arc::clone(current)
            }
        });
    }

    pub fn set_stopped(&self) {
        self.state.store(Arc::new(LifecycleState::Stopped));
    }

    pub fn set_failed(&self) {
        self.state.store(Arc::new(LifecycleState::Failed));
    }

    /// Resolves once shutdown has been triggered, immediately if it already was.
    ///
    /// The future owns its receiver and holds no borrow of the flag, so it can
    /// sit in a `select!` of a spawned task.
    pub fn stopped(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.shutdown_signal.subscribe();
        async move {
            let _ = rx.wait_for(|stop| *stop).await;
        }
    }

    /// Initiates graceful shutdown.
    ///
    /// Transitions to `ShuttingDown` and signals all shutdown receivers.
    /// Calling it again, or after a terminal state, only re-signals.
    pub fn trigger_shutdown(&self) {
        self.state.rcu(|current| {
            if current.is_terminal() {
                Arc::clone(current)
            } else {
                Arc::new(LifecycleState::ShuttingDown)
            }
        });
        // Stored even when nobody is subscribed yet.
        self.shutdown_signal.send_replace(true);
    }

    /// Returns `true` once shutdown has been triggered.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_signal.borrow()
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        **self.state.load()
    }

    /// Returns a shared handle to the state for use by other components.
    #[must_use]
    pub fn state_handle(&self) -> Arc<ArcSwap<LifecycleState>> {
        Arc::clone(&self.state)
    }

    /// Creates an RAII guard that tracks an in-flight request.
    ///
    /// The counter is incremented on creation and decremented when the guard
    /// is dropped, even if the handler panics.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard that decrements the in-flight counter when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_is_idle() {
        let controller = ShutdownController::new();
        assert_eq!(controller.state(), LifecycleState::Idle);
        assert_eq!(controller.in_flight_count(), 0);
        assert!(!controller.is_shutting_down());
    }

    #[test]
    fn transitions_through_running_to_shutting_down() {
        let controller = ShutdownController::new();
        assert!(controller.try_start());
        assert_eq!(controller.state(), LifecycleState::Starting);

        controller.set_running();
        assert_eq!(controller.state(), LifecycleState::Running);

        controller.trigger_shutdown();
        assert_eq!(controller.state(), LifecycleState::ShuttingDown);
        assert!(controller.is_shutting_down());

        controller.set_stopped();
        assert!(controller.state().is_terminal());
    }

    #[test]
    fn try_start_only_leaves_idle_once() {
        let controller = ShutdownController::new();
        assert!(controller.try_start());
        assert_eq!(controller.state(), LifecycleState::Starting);
        assert!(!controller.try_start());
    }

    #[test]
    fn trigger_after_failure_keeps_failed() {
        let controller = ShutdownController::new();
        controller.set_failed();
        controller.trigger_shutdown();
        assert_eq!(controller.state(), LifecycleState::Failed);
        assert!(controller.is_shutting_down());
    }

    #[test]
    fn in_flight_guard_increments_and_decrements() {
        let controller = ShutdownController::new();

        let guard1 = controller.in_flight_guard();
        let guard2 = controller.in_flight_guard();
        assert_eq!(controller.in_flight_count(), 2);

        drop(guard1);
        assert_eq!(controller.in_flight_count(), 1);

        drop(guard2);
        assert_eq!(controller.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn stopped_resolves_on_trigger() {
        let controller = ShutdownController::new();
        let stopped = tokio::spawn(controller.stopped());
        tokio::task::yield_now().await;
        assert!(!stopped.is_finished());

        controller.trigger_shutdown();
        stopped.await.unwrap();
    }

    #[tokio::test]
    async fn trigger_without_listeners_is_not_lost() {
        let controller = ShutdownController::new();
        assert!(controller.try_start());
        controller.trigger_shutdown();
        assert!(controller.is_shutting_down());

        // A late listener still sees it, and startup cannot overwrite it.
        controller.stopped().await;
        controller.set_running();
        assert_eq!(controller.state(), LifecycleState::ShuttingDown);
    }

    #[test]
    fn state_handle_shares_state() {
        let controller = ShutdownController::new();
        let handle = controller.state_handle();
        assert!(controller.try_start());
        controller.set_running();
        assert_eq!(**handle.load(), LifecycleState::Running);
    }
}
