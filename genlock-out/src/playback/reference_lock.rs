//! Reference lock gate between Starting and Prerolling
//!
//! The device reports lock changes asynchronously. Waiters test the current
//! state under the coordinator mutex before every block, so a notification
//! that lands between the check and the wait is never lost.

use genlock_common::events::ReferenceLockState;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

/// Outcome of [`ReferenceLockCoordinator::wait_for_lock`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockWait {
    Locked,
    Cancelled,
    TimedOut,
}

#[derive(Debug, Default)]
struct LockInner {
    state: ReferenceLockState,
    cancelled: bool,
    notified_since_reset: bool,
}

#[derive(Debug, Default)]
pub struct ReferenceLockCoordinator {
    inner: Mutex<LockInner>,
    changed: Condvar,
}

impl ReferenceLockCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until locked, cancelled, or `timeout` elapses
    pub fn wait_for_lock(&self, timeout: Duration) -> LockWait {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.cancelled {
                return LockWait::Cancelled;
            }
            if inner.state.is_locked() {
                return LockWait::Locked;
            }
            let now = Instant::now();
            if now >= deadline {
                return LockWait::TimedOut;
            }
            inner = self.changed.wait_timeout(inner, deadline - now).unwrap().0;
        }
    }

    /// Record a device notification; returns true if the state changed
    pub fn notify(&self, state: ReferenceLockState) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner.notified_since_reset = true;
        let changed = inner.state != state;
        inner.state = state;
        self.changed.notify_all();
        changed
    }

    /// Seed the state from a query made after callbacks were registered
    ///
    /// Ignored if a notification arrived since the last `reset`, since that
    /// notification is newer than the query.
    pub fn observe_initial(&self, state: ReferenceLockState) {
        let mut inner = self.inner.lock().unwrap();
        if inner.notified_since_reset {
            debug!("Ignoring initial reference query, notification already received");
            return;
        }
        inner.state = state;
        self.changed.notify_all();
    }

    /// Wake every waiter with `Cancelled` until the next `reset`
    pub fn cancel_waiters(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.cancelled = true;
        self.changed.notify_all();
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.cancelled = false;
        inner.notified_since_reset = false;
    }

    pub fn state(&self) -> ReferenceLockState {
        self.inner.lock().unwrap().state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_already_locked_returns_immediately() {
        let coordinator = ReferenceLockCoordinator::new();
        coordinator.observe_initial(ReferenceLockState::Locked);
        assert_eq!(coordinator.wait_for_lock(Duration::from_secs(5)), LockWait::Locked);
    }

    #[test]
    fn test_times_out_when_never_locked() {
        let coordinator = ReferenceLockCoordinator::new();
        let started = Instant::now();
        assert_eq!(coordinator.wait_for_lock(Duration::from_millis(30)), LockWait::TimedOut);
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_notification_wakes_waiter() {
        let coordinator = Arc::new(ReferenceLockCoordinator::new());
        let waiter = {
            let c = coordinator.clone();
            thread::spawn(move || c.wait_for_lock(Duration::from_secs(5)))
        };

        thread::sleep(Duration::from_millis(20));
        assert!(coordinator.notify(ReferenceLockState::Locked));
        assert_eq!(waiter.join().unwrap(), LockWait::Locked);
    }

    #[test]
    fn test_cancel_wakes_waiter() {
        let coordinator = Arc::new(ReferenceLockCoordinator::new());
        let waiter = {
            let c = coordinator.clone();
            thread::spawn(move || c.wait_for_lock(Duration::from_secs(5)))
        };

        thread::sleep(Duration::from_millis(20));
        coordinator.cancel_waiters();
        assert_eq!(waiter.join().unwrap(), LockWait::Cancelled);

        coordinator.reset();
        coordinator.notify(ReferenceLockState::Locked);
        assert_eq!(coordinator.wait_for_lock(Duration::from_millis(1)), LockWait::Locked);
    }

    #[test]
    fn test_stale_initial_query_does_not_overwrite_notification() {
        let coordinator = ReferenceLockCoordinator::new();
        coordinator.reset();

        // Lock arrives between callback registration and the initial query
        coordinator.notify(ReferenceLockState::Locked);
        coordinator.observe_initial(ReferenceLockState::Unlocked);

        assert_eq!(coordinator.state(), ReferenceLockState::Locked);
    }

    #[test]
    fn test_notify_reports_changes_only() {
        let coordinator = ReferenceLockCoordinator::new();
        assert!(coordinator.notify(ReferenceLockState::Locked));
        assert!(!coordinator.notify(ReferenceLockState::Locked));
        assert!(coordinator.notify(ReferenceLockState::Unlocked));
    }
}
