//! Bounded hand-off queue between a producer and a scheduling thread
//!
//! One queue per stream per device. The producer pushes, the scheduling thread
//! blocks in [`FrameQueue::wait_for_sample`]. Stop teardown calls
//! [`FrameQueue::cancel_waiters`] so every blocked party wakes promptly; the
//! queue stays cancelled until [`FrameQueue::reset`].

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::trace;

/// Overflow behaviour when a push finds the queue full
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum QueueFullPolicy {
    /// Evict the oldest queued unit; push never blocks
    #[default]
    DropOldest,
    /// Block the producer until space frees or waiters are cancelled
    Block,
}

/// Outcome of [`FrameQueue::push`]
#[derive(Debug)]
pub enum PushResult<T> {
    Queued,
    /// Queue was full; the evicted oldest unit is returned
    Displaced(T),
    /// Queue is cancelled; the unit is handed back
    Cancelled(T),
}

/// Returned by waits on a cancelled queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl std::fmt::Display for Cancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "queue wait cancelled")
    }
}

struct QueueState<T> {
    units: VecDeque<T>,
    cancelled: bool,
    displaced: u64,
}

/// Bounded FIFO with cancellable blocking waits
pub struct FrameQueue<T> {
    name: String,
    capacity: usize,
    policy: QueueFullPolicy,
    state: Mutex<QueueState<T>>,
    sample_available: Condvar,
    space_available: Condvar,
}

impl<T> FrameQueue<T> {
    pub fn new(name: impl Into<String>, capacity: usize, policy: QueueFullPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            name: name.into(),
            capacity,
            policy,
            state: Mutex::new(QueueState {
                units: VecDeque::with_capacity(capacity),
                cancelled: false,
                displaced: 0,
            }),
            sample_available: Condvar::new(),
            space_available: Condvar::new(),
        }
    }

    /// Queue a unit according to the overflow policy
    pub fn push(&self, unit: T) -> PushResult<T> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.cancelled {
                return PushResult::Cancelled(unit);
            }
            if state.units.len() < self.capacity {
                state.units.push_back(unit);
                self.sample_available.notify_one();
                return PushResult::Queued;
            }
            match self.policy {
                QueueFullPolicy::DropOldest => {
                    let oldest = state.units.pop_front();
                    state.units.push_back(unit);
                    state.displaced += 1;
                    self.sample_available.notify_one();
                    trace!("{}: full, displaced oldest unit", self.name);
                    return match oldest {
                        Some(old) => PushResult::Displaced(old),
                        None => PushResult::Queued,
                    };
                }
                QueueFullPolicy::Block => {
                    state = self.space_available.wait(state).unwrap();
                }
            }
        }
    }

    /// Block until a unit is available or the queue is cancelled
    pub fn wait_for_sample(&self) -> Result<T, Cancelled> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.cancelled {
                return Err(Cancelled);
            }
            if let Some(unit) = state.units.pop_front() {
                self.space_available.notify_one();
                return Ok(unit);
            }
            state = self.sample_available.wait(state).unwrap();
        }
    }

    /// Like `wait_for_sample`, but gives up after `timeout` with `Ok(None)`
    pub fn wait_for_sample_timeout(&self, timeout: Duration) -> Result<Option<T>, Cancelled> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap();
        loop {
            if state.cancelled {
                return Err(Cancelled);
            }
            if let Some(unit) = state.units.pop_front() {
                self.space_available.notify_one();
                return Ok(Some(unit));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            state = self.sample_available.wait_timeout(state, deadline - now).unwrap().0;
        }
    }

    /// Take the oldest unit without blocking
    pub fn try_pop(&self) -> Option<T> {
        let mut state = self.state.lock().unwrap();
        let unit = state.units.pop_front();
        if unit.is_some() {
            self.space_available.notify_one();
        }
        unit
    }

    /// Wait up to `timeout` for room to push
    ///
    /// Returns false on timeout or while the queue is cancelled. Producers use
    /// this to pace themselves under the `DropOldest` policy.
    pub fn wait_for_space(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap();
        loop {
            if state.cancelled {
                return false;
            }
            if state.units.len() < self.capacity {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self.space_available.wait_timeout(state, deadline - now).unwrap().0;
        }
    }

    /// Wake every blocked producer and consumer; waits fail until `reset`
    pub fn cancel_waiters(&self) {
        let mut state = self.state.lock().unwrap();
        state.cancelled = true;
        self.sample_available.notify_all();
        self.space_available.notify_all();
    }

    /// Clear the cancellation flag; queued units are kept
    pub fn reset(&self) {
        self.state.lock().unwrap().cancelled = false;
    }

    /// Drop every queued unit; returns how many were dropped
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock().unwrap();
        let dropped = state.units.len();
        state.units.clear();
        self.space_available.notify_all();
        dropped
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.lock().unwrap().cancelled
    }

    /// Units evicted by `DropOldest` since creation
    pub fn displaced_count(&self) -> u64 {
        self.state.lock().unwrap().displaced
    }
}

impl<T> std::fmt::Debug for FrameQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameQueue")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("policy", &self.policy)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let q = FrameQueue::new("video", 4, QueueFullPolicy::DropOldest);
        for i in 0..3 {
            assert!(matches!(q.push(i), PushResult::Queued));
        }
        assert_eq!(q.wait_for_sample(), Ok(0));
        assert_eq!(q.try_pop(), Some(1));
        assert_eq!(q.wait_for_sample(), Ok(2));
        assert_eq!(q.try_pop(), None);
    }

    #[test]
    fn test_drop_oldest_returns_displaced_unit() {
        let q = FrameQueue::new("video", 2, QueueFullPolicy::DropOldest);
        q.push(1);
        q.push(2);

        match q.push(3) {
            PushResult::Displaced(old) => assert_eq!(old, 1),
            other => panic!("expected Displaced, got {:?}", other),
        }
        assert_eq!(q.len(), 2);
        assert_eq!(q.displaced_count(), 1);
        assert_eq!(q.try_pop(), Some(2));
    }

    #[test]
    fn test_block_policy_waits_for_space() {
        let q = Arc::new(FrameQueue::new("audio", 1, QueueFullPolicy::Block));
        q.push(1);

        let producer = {
            let q = q.clone();
            thread::spawn(move || matches!(q.push(2), PushResult::Queued))
        };

        thread::sleep(Duration::from_millis(50));
        assert_eq!(q.len(), 1, "producer must block while full");

        assert_eq!(q.wait_for_sample(), Ok(1));
        assert!(producer.join().unwrap());
        assert_eq!(q.try_pop(), Some(2));
    }

    #[test]
    fn test_cancel_wakes_blocked_consumer() {
        let q: Arc<FrameQueue<u32>> = Arc::new(FrameQueue::new("video", 2, QueueFullPolicy::DropOldest));

        let consumer = {
            let q = q.clone();
            thread::spawn(move || q.wait_for_sample())
        };

        thread::sleep(Duration::from_millis(20));
        q.cancel_waiters();
        assert_eq!(consumer.join().unwrap(), Err(Cancelled));
    }

    #[test]
    fn test_cancel_wakes_blocked_producer() {
        let q = Arc::new(FrameQueue::new("audio", 1, QueueFullPolicy::Block));
        q.push(7);

        let producer = {
            let q = q.clone();
            thread::spawn(move || q.push(8))
        };

        thread::sleep(Duration::from_millis(20));
        q.cancel_waiters();
        assert!(matches!(producer.join().unwrap(), PushResult::Cancelled(8)));
    }

    #[test]
    fn test_reset_keeps_queued_units() {
        let q = FrameQueue::new("video", 4, QueueFullPolicy::DropOldest);
        q.push(1);
        q.cancel_waiters();

        assert_eq!(q.wait_for_sample(), Err(Cancelled));
        assert!(matches!(q.push(2), PushResult::Cancelled(2)));

        q.reset();
        assert!(!q.is_cancelled());
        assert_eq!(q.wait_for_sample(), Ok(1));
    }

    #[test]
    fn test_clear_drops_units() {
        let q = FrameQueue::new("video", 4, QueueFullPolicy::DropOldest);
        q.push(1);
        q.push(2);
        assert_eq!(q.clear(), 2);
        assert!(q.is_empty());
    }

    #[test]
    fn test_wait_for_sample_timeout() {
        let q = FrameQueue::new("video", 2, QueueFullPolicy::DropOldest);
        assert_eq!(q.wait_for_sample_timeout(Duration::from_millis(5)), Ok(None));
        q.push(3);
        assert_eq!(q.wait_for_sample_timeout(Duration::from_millis(5)), Ok(Some(3)));
        q.cancel_waiters();
        assert_eq!(q.wait_for_sample_timeout(Duration::from_millis(5)), Err(Cancelled));
    }

    #[test]
    fn test_wait_for_space() {
        let q = FrameQueue::new("video", 1, QueueFullPolicy::DropOldest);
        assert!(q.wait_for_space(Duration::from_millis(1)));
        q.push(1);
        assert!(!q.wait_for_space(Duration::from_millis(10)));
        q.cancel_waiters();
        q.try_pop();
        assert!(!q.wait_for_space(Duration::from_millis(1)));
    }
}
