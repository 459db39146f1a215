//! Output hardware abstraction
//!
//! [`OutputDevice`] models a scheduled-playback video output card: frames and
//! audio are queued against the device's own timeline and played out by the
//! card's free-running clock. The driver reports progress through the
//! [`OutputCallback`] capability set, always from its own thread.
//!
//! Implementations must never invoke callbacks synchronously from inside an
//! `OutputDevice` method; the scheduler calls into the device while holding
//! its per-device lock.

pub mod clock;
pub mod mode;
pub mod simulated;

use crate::media::{AudioPacket, VideoFrame};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

pub use clock::{ClockReading, HardwareClock};
pub use genlock_common::time::{TimeScale, TimeValue};
pub use mode::{DisplayMode, DisplayModeId, PixelFormat};

/// Failures reported by a device
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HardwareError {
    #[error("operation not supported: {0}")]
    Unsupported(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("output not enabled")]
    NotEnabled,

    #[error("reference clock unavailable: {0}")]
    ClockUnavailable(String),

    #[error("device failure: {0}")]
    Failed(String),
}

pub type HwResult<T> = std::result::Result<T, HardwareError>;

/// How a scheduled frame left the device
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FrameCompletionResult {
    /// Displayed on time
    Completed,
    /// Displayed after its deadline
    DisplayedLate,
    /// Never displayed (device skipped it)
    Dropped,
    /// Discarded by a stop or flush
    Flushed,
}

/// Flags passed to `enable_video_output`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VideoOutputFlags {
    /// Start and stop together with the other devices of the playback group
    pub synchronize_to_playback_group: bool,
}

/// Audio output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u32,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: genlock_common::time::AUDIO_SAMPLE_RATE,
            channels: 2,
        }
    }
}

/// Raw hardware clock reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardwareTime {
    pub time: TimeValue,
    pub time_in_frame: TimeValue,
    pub ticks_per_frame: TimeValue,
}

/// Scheduled stream time with the current playback speed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamTime {
    pub time: TimeValue,
    pub playback_speed: f64,
}

/// Callbacks delivered by the driver thread
pub trait OutputCallback: Send + Sync {
    /// A scheduled frame finished (displayed, late, dropped or flushed)
    fn scheduled_frame_completed(&self, frame: Arc<VideoFrame>, result: FrameCompletionResult);

    /// Scheduled playback has stopped
    fn scheduled_playback_stopped(&self);

    /// Device has room for more audio (`preroll` is true before playback starts)
    fn render_audio_samples(&self, _preroll: bool) {}

    /// House reference lock acquired or lost
    fn reference_status_changed(&self, _locked: bool) {}
}

/// Scheduled-playback output device
pub trait OutputDevice: Send + Sync {
    /// Human readable device name
    fn display_name(&self) -> String;

    fn supports_video_mode(&self, mode: DisplayModeId, pixel_format: PixelFormat) -> HwResult<bool>;

    fn enable_video_output(&self, mode: DisplayModeId, flags: VideoOutputFlags) -> HwResult<()>;

    fn disable_video_output(&self) -> HwResult<()>;

    fn enable_audio_output(&self, format: AudioFormat) -> HwResult<()>;

    fn disable_audio_output(&self) -> HwResult<()>;

    /// Register (`Some`) or deregister (`None`) the callback capability set
    fn set_output_callback(&self, callback: Option<Arc<dyn OutputCallback>>) -> HwResult<()>;

    /// Queue a frame for display at `display_time`
    ///
    /// The device holds the `Arc` until the frame's completion callback.
    fn schedule_video_frame(
        &self,
        frame: Arc<VideoFrame>,
        display_time: TimeValue,
        duration: TimeValue,
        scale: TimeScale,
    ) -> HwResult<()>;

    /// Queue audio at `stream_time`; returns the number of sample frames accepted
    fn schedule_audio_samples(
        &self,
        packet: &AudioPacket,
        stream_time: TimeValue,
        scale: TimeScale,
    ) -> HwResult<u32>;

    fn begin_audio_preroll(&self) -> HwResult<()>;

    fn end_audio_preroll(&self) -> HwResult<()>;

    fn buffered_audio_sample_frame_count(&self) -> HwResult<u32>;

    fn flush_buffered_audio_samples(&self) -> HwResult<()>;

    fn start_scheduled_playback(
        &self,
        start_time: TimeValue,
        scale: TimeScale,
        speed: f64,
    ) -> HwResult<()>;

    /// Stop playback at `stop_time` (0 = immediately); returns the actual stop time
    fn stop_scheduled_playback(&self, stop_time: TimeValue, scale: TimeScale) -> HwResult<TimeValue>;

    fn is_scheduled_playback_running(&self) -> HwResult<bool>;

    fn scheduled_stream_time(&self, scale: TimeScale) -> HwResult<StreamTime>;

    fn hardware_reference_clock(&self, scale: TimeScale) -> HwResult<HardwareTime>;

    /// Hardware time at which `frame` finished displaying
    fn frame_completion_reference_timestamp(
        &self,
        frame: &VideoFrame,
        scale: TimeScale,
    ) -> HwResult<TimeValue>;

    fn reference_signal_locked(&self) -> HwResult<bool>;

    fn supports_synchronized_playback(&self) -> bool {
        false
    }

    fn set_playback_group(&self, _group_id: u32) -> HwResult<()> {
        Err(HardwareError::Unsupported("playback groups".to_string()))
    }
}
