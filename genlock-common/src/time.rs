//! Device timeline arithmetic
//!
//! Output hardware counts time in integer units of a *time scale*: a frame of
//! 1080p25 lasts `1000` units at a scale of `25000` units per second, while
//! 1080p29.97 lasts `1001` units at `30000`. Every value exchanged with a
//! device is a `(value, scale)` pair, so conversions between scales, host
//! durations and audio sample counts live here.
//!
//! # Precision
//!
//! Intermediate products use `i128`, so `value * scale` never overflows for
//! any `i64` value and realistic scales. Results truncate toward zero.
//!
//! # Examples
//!
//! ```rust
//! use genlock_common::time::*;
//!
//! // Three frames of 1080p25 expressed in audio samples
//! assert_eq!(samples_for_duration(3000, 25000, AUDIO_SAMPLE_RATE), 5760);
//!
//! // 1080p25 frame duration at a millisecond scale
//! assert_eq!(rescale(1000, 25000, 1000), 40);
//! ```

use std::time::Duration;

/// Device time value (units of some [`TimeScale`])
pub type TimeValue = i64;

/// Units per second
pub type TimeScale = i64;

/// Audio sample rate used by every output device (48 kHz)
pub const AUDIO_SAMPLE_RATE: u32 = 48_000;

/// Convert a time value from one scale to another (truncating)
///
/// Returns 0 when `from_scale` is not positive.
pub fn rescale(value: TimeValue, from_scale: TimeScale, to_scale: TimeScale) -> TimeValue {
    if from_scale <= 0 {
        return 0;
    }
    ((value as i128 * to_scale as i128) / from_scale as i128) as TimeValue
}

/// Convert a host duration into device time units
pub fn duration_to_time(duration: Duration, scale: TimeScale) -> TimeValue {
    ((duration.as_nanos() as i128 * scale as i128) / 1_000_000_000i128) as TimeValue
}

/// Convert device time units into a host duration
///
/// Negative values clamp to zero.
pub fn time_to_duration(value: TimeValue, scale: TimeScale) -> Duration {
    if value <= 0 || scale <= 0 {
        return Duration::ZERO;
    }
    let nanos = (value as i128 * 1_000_000_000i128) / scale as i128;
    Duration::from_nanos(nanos as u64)
}

/// Number of audio sample frames covering `duration` device units
///
/// ```rust
/// use genlock_common::time::samples_for_duration;
///
/// // One 1080p29.97 frame at 48 kHz
/// assert_eq!(samples_for_duration(1001, 30000, 48000), 1601);
/// ```
pub fn samples_for_duration(duration: TimeValue, scale: TimeScale, sample_rate: u32) -> u64 {
    if duration <= 0 || scale <= 0 {
        return 0;
    }
    ((duration as i128 * sample_rate as i128) / scale as i128) as u64
}

/// Device time units covered by `samples` audio sample frames
pub fn duration_for_samples(samples: u64, scale: TimeScale, sample_rate: u32) -> TimeValue {
    if sample_rate == 0 {
        return 0;
    }
    ((samples as i128 * scale as i128) / sample_rate as i128) as TimeValue
}

/// Audio watermark derived from the video preroll depth
///
/// The amount of audio that covers `preroll_frames` frames of video:
/// `preroll_frames * frame_duration * 48000 / time_scale`.
///
/// ```rust
/// use genlock_common::time::derived_audio_watermark;
///
/// assert_eq!(derived_audio_watermark(3, 1000, 25000), 5760);
/// ```
pub fn derived_audio_watermark(
    preroll_frames: u32,
    frame_duration: TimeValue,
    time_scale: TimeScale,
) -> u64 {
    samples_for_duration(
        preroll_frames as TimeValue * frame_duration,
        time_scale,
        AUDIO_SAMPLE_RATE,
    )
}
