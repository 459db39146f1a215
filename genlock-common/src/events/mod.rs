//! Event types for the genlock event system
//!
//! Schedulers publish state transitions, stream-time progress and device
//! errors on a shared [`EventBus`]. Emission never blocks a scheduling
//! thread or a driver callback: the bus is a `tokio::sync::broadcast`
//! channel, and slow subscribers lose the oldest events instead of applying
//! back-pressure.

mod playback_types;

pub use playback_types::{DeviceErrorKind, PlaybackState, ReferenceLockState};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events published by schedulers and device groups
///
/// `device` is the label the scheduler was created with (the device display
/// name for hardware, `sim-0`, `sim-1`, ... for simulated devices).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GenlockEvent {
    /// Scheduler state transition
    StateChanged {
        device: String,
        old_state: PlaybackState,
        new_state: PlaybackState,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Stream time advanced by a completion callback
    ///
    /// `stream_time` is the hardware-reported scheduled stream time plus the
    /// request's stream time offset.
    StreamTimeUpdated {
        device: String,
        stream_time: i64,
        time_scale: i64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Discrete device error
    DeviceError {
        device: String,
        kind: DeviceErrorKind,
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// House reference lock acquired or lost
    ReferenceLockChanged {
        device: String,
        state: ReferenceLockState,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Preroll watermarks met
    ///
    /// `start_time` is the display time hardware playback starts (or, for a
    /// group member, would start) at.
    PrerollComplete {
        device: String,
        start_time: i64,
        time_scale: i64,
        reference_locked: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Video producer reported end of stream
    EndOfStream {
        device: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Synchronized group playback started on the master
    GroupStarted {
        playback_group_id: u32,
        members: usize,
        start_time: i64,
        time_scale: i64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Synchronized group playback stopped
    GroupStopped {
        playback_group_id: u32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl GenlockEvent {
    /// Get event type as string for filtering
    pub fn event_type(&self) -> &str {
        match self {
            GenlockEvent::StateChanged { .. } => "StateChanged",
            GenlockEvent::StreamTimeUpdated { .. } => "StreamTimeUpdated",
            GenlockEvent::DeviceError { .. } => "DeviceError",
            GenlockEvent::ReferenceLockChanged { .. } => "ReferenceLockChanged",
            GenlockEvent::PrerollComplete { .. } => "PrerollComplete",
            GenlockEvent::EndOfStream { .. } => "EndOfStream",
            GenlockEvent::GroupStarted { .. } => "GroupStarted",
            GenlockEvent::GroupStopped { .. } => "GroupStopped",
        }
    }

    /// Device label, for per-device events
    pub fn device(&self) -> Option<&str> {
        match self {
            GenlockEvent::StateChanged { device, .. }
            | GenlockEvent::StreamTimeUpdated { device, .. }
            | GenlockEvent::DeviceError { device, .. }
            | GenlockEvent::ReferenceLockChanged { device, .. }
            | GenlockEvent::PrerollComplete { device, .. }
            | GenlockEvent::EndOfStream { device, .. } => Some(device),
            GenlockEvent::GroupStarted { .. } | GenlockEvent::GroupStopped { .. } => None,
        }
    }
}

/// Central event distribution bus
///
/// Thin wrapper over a broadcast channel. Cloning the bus shares the channel.
///
/// # Examples
///
/// ```
/// use genlock_common::events::{EventBus, GenlockEvent, PlaybackState};
///
/// let bus = EventBus::new(100);
/// let mut rx = bus.subscribe();
///
/// bus.emit_lossy(GenlockEvent::StateChanged {
///     device: "sim-0".to_string(),
///     old_state: PlaybackState::Idle,
///     new_state: PlaybackState::Starting,
///     timestamp: chrono::Utc::now(),
/// });
///
/// let event = rx.try_recv().unwrap();
/// assert_eq!(event.event_type(), "StateChanged");
/// ```
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<GenlockEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// `capacity` is the number of events buffered per subscriber before the
    /// oldest are dropped.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<GenlockEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: GenlockEvent,
    ) -> Result<usize, broadcast::error::SendError<GenlockEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: GenlockEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_event(old: PlaybackState, new: PlaybackState) -> GenlockEvent {
        GenlockEvent::StateChanged {
            device: "sim-0".to_string(),
            old_state: old,
            new_state: new,
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_emit_without_subscribers_is_err() {
        let bus = EventBus::new(10);
        assert_eq!(bus.subscriber_count(), 0);
        assert!(bus.emit(state_event(PlaybackState::Idle, PlaybackState::Starting)).is_err());

        // Lossy emit never fails
        bus.emit_lossy(state_event(PlaybackState::Idle, PlaybackState::Starting));
    }

    #[test]
    fn test_emit_reaches_every_subscriber() {
        let bus = EventBus::new(10);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        let count = bus
            .emit(state_event(PlaybackState::Prerolling, PlaybackState::Running))
            .unwrap();
        assert_eq!(count, 2);

        for rx in [&mut rx1, &mut rx2] {
            match rx.try_recv().unwrap() {
                GenlockEvent::StateChanged { new_state, .. } => {
                    assert_eq!(new_state, PlaybackState::Running)
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    #[test]
    fn test_lagging_subscriber_loses_oldest() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();

        for _ in 0..5 {
            bus.emit_lossy(state_event(PlaybackState::Idle, PlaybackState::Starting));
        }

        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Lagged(3))
        ));
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = GenlockEvent::DeviceError {
            device: "sim-1".to_string(),
            kind: DeviceErrorKind::FrameDisplayedLate,
            message: "frame late".to_string(),
            timestamp: chrono::Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "DeviceError");
        assert_eq!(json["kind"], "FrameDisplayedLate");
        assert_eq!(json["device"], "sim-1");
        assert_eq!(event.device(), Some("sim-1"));
    }

    #[tokio::test]
    async fn test_async_subscriber_receives_in_order() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();

        let producer = {
            let bus = bus.clone();
            tokio::task::spawn_blocking(move || {
                bus.emit_lossy(state_event(PlaybackState::Idle, PlaybackState::Starting));
                bus.emit_lossy(state_event(PlaybackState::Starting, PlaybackState::Prerolling));
            })
        };
        producer.await.unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(matches!(first, GenlockEvent::StateChanged { new_state: PlaybackState::Starting, .. }));
        assert!(matches!(second, GenlockEvent::StateChanged { new_state: PlaybackState::Prerolling, .. }));
    }

    #[test]
    fn test_playback_state_display_and_activity() {
        assert_eq!(PlaybackState::Prerolling.to_string(), "prerolling");
        assert!(PlaybackState::Running.is_active());
        assert!(!PlaybackState::Stopping.is_active());
        assert!(!PlaybackState::Error.is_active());
    }
}
