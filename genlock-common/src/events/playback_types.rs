//! Playback-related type definitions
//!
//! Supporting types for scheduler state, device errors and reference lock.

use serde::{Deserialize, Serialize};

/// Scheduler playback state
///
/// Exactly one state per device scheduler; every transition is published as
/// a `StateChanged` event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    /// Output disabled, nothing scheduled
    Idle,
    /// Output enabled, waiting for reference lock
    Starting,
    /// Scheduling ahead until the preroll watermarks are met
    Prerolling,
    /// Hardware playback running
    Running,
    /// Teardown in progress
    Stopping,
    /// Hardware confirmed the stop; output not yet disabled
    Stopped,
    /// Hardware clock unavailable; requires `disable()`
    Error,
}

impl PlaybackState {
    /// True while scheduling threads may be alive
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            PlaybackState::Starting | PlaybackState::Prerolling | PlaybackState::Running
        )
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Idle => write!(f, "idle"),
            PlaybackState::Starting => write!(f, "starting"),
            PlaybackState::Prerolling => write!(f, "prerolling"),
            PlaybackState::Running => write!(f, "running"),
            PlaybackState::Stopping => write!(f, "stopping"),
            PlaybackState::Stopped => write!(f, "stopped"),
            PlaybackState::Error => write!(f, "error"),
        }
    }
}

/// Device error categories reported to observers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum DeviceErrorKind {
    /// A frame completed after its display deadline
    FrameDisplayedLate,
    /// Display mode or pixel format not supported by the device
    UnsupportedMode,
    /// Hardware reference clock query failed
    ClockUnavailable,
    /// Enabling video or audio output failed
    EnableOutputFailed,
    /// Reference lock not acquired in time
    ReferenceLockTimeout,
    /// Scheduling a frame or audio block failed
    ScheduleFailed,
    /// Starting hardware playback failed
    StartPlaybackFailed,
}

impl std::fmt::Display for DeviceErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceErrorKind::FrameDisplayedLate => write!(f, "FrameDisplayedLate"),
            DeviceErrorKind::UnsupportedMode => write!(f, "UnsupportedMode"),
            DeviceErrorKind::ClockUnavailable => write!(f, "ClockUnavailable"),
            DeviceErrorKind::EnableOutputFailed => write!(f, "EnableOutputFailed"),
            DeviceErrorKind::ReferenceLockTimeout => write!(f, "ReferenceLockTimeout"),
            DeviceErrorKind::ScheduleFailed => write!(f, "ScheduleFailed"),
            DeviceErrorKind::StartPlaybackFailed => write!(f, "StartPlaybackFailed"),
        }
    }
}

/// House reference lock status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceLockState {
    #[default]
    Unlocked,
    Locked,
}

impl ReferenceLockState {
    pub fn from_locked(locked: bool) -> Self {
        if locked {
            ReferenceLockState::Locked
        } else {
            ReferenceLockState::Unlocked
        }
    }

    pub fn is_locked(&self) -> bool {
        matches!(self, ReferenceLockState::Locked)
    }
}

impl std::fmt::Display for ReferenceLockState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReferenceLockState::Unlocked => write!(f, "unlocked"),
            ReferenceLockState::Locked => write!(f, "locked"),
        }
    }
}
