//! Device timeline for one playback run

use crate::hardware::{TimeScale, TimeValue};
use tracing::warn;

/// Frame timing plus the stream time reported by the hardware
///
/// `current_stream_time` only moves from completion callbacks and the final
/// stop time, and never moves backwards within a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTimeline {
    pub frame_duration: TimeValue,
    pub time_scale: TimeScale,
    /// Position of display time 0 within the media stream
    pub stream_time_offset: TimeValue,
    pub current_stream_time: TimeValue,
    regressions: u64,
}

impl DeviceTimeline {
    pub fn new(frame_duration: TimeValue, time_scale: TimeScale, stream_time_offset: TimeValue) -> Self {
        Self {
            frame_duration,
            time_scale,
            stream_time_offset,
            current_stream_time: stream_time_offset,
            regressions: 0,
        }
    }

    /// Device display time for a media stream time
    pub fn display_time(&self, stream_time: TimeValue) -> TimeValue {
        stream_time - self.stream_time_offset
    }

    /// Advance from a hardware-reported scheduled stream time
    ///
    /// Returns true if the stream time moved. A regression is logged, counted
    /// and ignored.
    pub fn advance(&mut self, hardware_stream_time: TimeValue) -> bool {
        let stream_time = hardware_stream_time + self.stream_time_offset;
        if stream_time < self.current_stream_time {
            self.regressions += 1;
            warn!(
                "Ignoring stream time regression: {} < {} (scale {})",
                stream_time, self.current_stream_time, self.time_scale
            );
            return false;
        }
        let moved = stream_time != self.current_stream_time;
        self.current_stream_time = stream_time;
        moved
    }

    pub fn regressions(&self) -> u64 {
        self.regressions
    }
}
