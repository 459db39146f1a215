//! Configuration for genlock-out
//!
//! Loaded from a TOML file resolved by `genlock_common::config`
//! (CLI → `GENLOCK_CONFIG` → platform config dir → built-in defaults).
//! Every field has a built-in default, so an empty file is a valid config.
//!
//! ```toml
//! [playback]
//! video_preroll_frames = 3
//! audio_watermark = "derived"      # or a sample count, e.g. 4800
//! queue_full_policy = "drop_oldest"
//!
//! [reference_lock]
//! required = true
//! timeout_ms = 5000
//! on_failure = "proceed_unlocked"
//!
//! [group]
//! playback_group_id = 2
//!
//! [logging]
//! level = "debug"
//! ```

use crate::error::{Error, Result};
use crate::playback::frame_queue::QueueFullPolicy;
use genlock_common::config::{load_or_default, CONFIG_ENV_VAR};
use genlock_common::time::{derived_audio_watermark, TimeScale, TimeValue};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct GenlockConfig {
    #[serde(default)]
    pub playback: PlaybackConfig,

    #[serde(default)]
    pub reference_lock: ReferenceLockConfig,

    #[serde(default)]
    pub group: GroupConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Scheduling depths, queue sizing and stop behaviour
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PlaybackConfig {
    /// Video frames scheduled before hardware playback starts
    #[serde(default = "default_video_preroll_frames")]
    pub video_preroll_frames: u32,

    /// Buffered audio (sample frames) required before playback starts
    #[serde(default)]
    pub audio_watermark: AudioWatermark,

    /// Upper bound on video frames scheduled but not yet completed
    ///
    /// Defaults to `video_preroll_frames`.
    #[serde(default)]
    pub max_video_in_flight: Option<u32>,

    /// Audio scheduling pauses while the device buffers at least this many sample frames
    #[serde(default = "default_audio_high_water_samples")]
    pub audio_high_water_samples: u64,

    #[serde(default = "default_queue_capacity")]
    pub video_queue_capacity: usize,

    #[serde(default = "default_queue_capacity")]
    pub audio_queue_capacity: usize,

    #[serde(default)]
    pub queue_full_policy: QueueFullPolicy,

    #[serde(default = "default_audio_channels")]
    pub audio_channels: u32,

    /// Bound on the wait for the hardware stop confirmation
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    /// Event bus capacity per subscriber
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

/// Audio preroll watermark
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum AudioWatermark {
    /// Fixed number of sample frames
    Samples(u64),
    /// Audio covering the video preroll depth
    Derived(DerivedWatermark),
}

/// Marker for `audio_watermark = "derived"`
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub enum DerivedWatermark {
    #[serde(rename = "derived")]
    Derived,
}

impl Default for AudioWatermark {
    fn default() -> Self {
        AudioWatermark::Samples(4800)
    }
}

impl AudioWatermark {
    pub fn derived() -> Self {
        AudioWatermark::Derived(DerivedWatermark::Derived)
    }

    /// Watermark in sample frames for a display mode
    pub fn samples(&self, preroll_frames: u32, frame_duration: TimeValue, time_scale: TimeScale) -> u64 {
        match self {
            AudioWatermark::Samples(n) => *n,
            AudioWatermark::Derived(_) => {
                derived_audio_watermark(preroll_frames, frame_duration, time_scale)
            }
        }
    }
}

/// What a scheduler does when reference lock is not acquired
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LockFailurePolicy {
    /// Roll back to Idle with `ReferenceLockTimeout`
    #[default]
    Fail,
    /// Continue to Prerolling without lock
    ProceedUnlocked,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ReferenceLockConfig {
    /// Wait for house reference lock before prerolling
    #[serde(default)]
    pub required: bool,

    #[serde(default = "default_lock_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub on_failure: LockFailurePolicy,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct GroupConfig {
    /// Playback group id assigned to every member device
    #[serde(default = "default_playback_group_id")]
    pub playback_group_id: u32,

    /// Bound on the wait for every member to finish preroll
    #[serde(default = "default_preroll_timeout_ms")]
    pub preroll_timeout_ms: u64,

    /// Bound on each member's wait to reach Idle during group stop
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` overrides
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_video_preroll_frames() -> u32 {
    3
}

fn default_audio_high_water_samples() -> u64 {
    // 0.5 seconds at 48kHz
    24_000
}

fn default_queue_capacity() -> usize {
    8
}

fn default_audio_channels() -> u32 {
    2
}

fn default_stop_timeout_ms() -> u64 {
    2000
}

fn default_event_capacity() -> usize {
    1000
}

fn default_lock_timeout_ms() -> u64 {
    5000
}

fn default_playback_group_id() -> u32 {
    2
}

fn default_preroll_timeout_ms() -> u64 {
    10_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            video_preroll_frames: default_video_preroll_frames(),
            audio_watermark: AudioWatermark::default(),
            max_video_in_flight: None,
            audio_high_water_samples: default_audio_high_water_samples(),
            video_queue_capacity: default_queue_capacity(),
            audio_queue_capacity: default_queue_capacity(),
            queue_full_policy: QueueFullPolicy::default(),
            audio_channels: default_audio_channels(),
            stop_timeout_ms: default_stop_timeout_ms(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl Default for ReferenceLockConfig {
    fn default() -> Self {
        Self {
            required: false,
            timeout_ms: default_lock_timeout_ms(),
            on_failure: LockFailurePolicy::default(),
        }
    }
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            playback_group_id: default_playback_group_id(),
            preroll_timeout_ms: default_preroll_timeout_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl PlaybackConfig {
    pub fn effective_max_in_flight(&self) -> u32 {
        self.max_video_in_flight.unwrap_or(self.video_preroll_frames)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

impl ReferenceLockConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl GroupConfig {
    pub fn preroll_timeout(&self) -> Duration {
        Duration::from_millis(self.preroll_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

impl GenlockConfig {
    /// Resolve, parse and validate the config file
    ///
    /// Returns the config and the file it came from (`None` = built-in defaults).
    pub fn load(cli_path: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        let (config, path): (GenlockConfig, _) = load_or_default(cli_path, CONFIG_ENV_VAR)?;
        config.validate()?;
        Ok((config, path))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: GenlockConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let p = &self.playback;
        if p.video_preroll_frames == 0 {
            return Err(Error::Config("video_preroll_frames must be at least 1".to_string()));
        }
        if p.effective_max_in_flight() < p.video_preroll_frames {
            return Err(Error::Config(format!(
                "max_video_in_flight ({}) must not be smaller than video_preroll_frames ({})",
                p.effective_max_in_flight(),
                p.video_preroll_frames
            )));
        }
        if p.video_queue_capacity == 0 || p.audio_queue_capacity == 0 {
            return Err(Error::Config("queue capacities must be at least 1".to_string()));
        }
        if p.audio_channels == 0 {
            return Err(Error::Config("audio_channels must be at least 1".to_string()));
        }
        if p.event_capacity == 0 {
            return Err(Error::Config("event_capacity must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = GenlockConfig::from_toml_str("").unwrap();
        assert_eq!(config, GenlockConfig::default());
        assert_eq!(config.playback.video_preroll_frames, 3);
        assert_eq!(config.playback.effective_max_in_flight(), 3);
        assert_eq!(config.playback.audio_watermark, AudioWatermark::Samples(4800));
        assert_eq!(config.reference_lock.on_failure, LockFailurePolicy::Fail);
        assert_eq!(config.group.playback_group_id, 2);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_full_file() {
        let config = GenlockConfig::from_toml_str(
            r#"
            [playback]
            video_preroll_frames = 4
            audio_watermark = "derived"
            max_video_in_flight = 6
            queue_full_policy = "block"

            [reference_lock]
            required = true
            timeout_ms = 250
            on_failure = "proceed_unlocked"

            [group]
            playback_group_id = 7
            "#,
        )
        .unwrap();

        assert_eq!(config.playback.video_preroll_frames, 4);
        assert_eq!(config.playback.audio_watermark, AudioWatermark::derived());
        assert_eq!(config.playback.effective_max_in_flight(), 6);
        assert_eq!(config.playback.queue_full_policy, QueueFullPolicy::Block);
        assert!(config.reference_lock.required);
        assert_eq!(config.reference_lock.timeout(), Duration::from_millis(250));
        assert_eq!(config.reference_lock.on_failure, LockFailurePolicy::ProceedUnlocked);
        assert_eq!(config.group.playback_group_id, 7);
    }

    #[test]
    fn test_numeric_watermark() {
        let config = GenlockConfig::from_toml_str("[playback]\naudio_watermark = 9600\n").unwrap();
        assert_eq!(config.playback.audio_watermark, AudioWatermark::Samples(9600));
    }

    #[test]
    fn test_derived_watermark_follows_mode() {
        let derived = AudioWatermark::derived();
        assert_eq!(derived.samples(3, 1000, 25000), 5760);
        assert_eq!(AudioWatermark::Samples(100).samples(3, 1000, 25000), 100);
    }

    #[test]
    fn test_validate_rejects_small_window() {
        let err = GenlockConfig::from_toml_str(
            "[playback]\nvideo_preroll_frames = 4\nmax_video_in_flight = 2\n",
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_validate_rejects_zero_preroll() {
        assert!(GenlockConfig::from_toml_str("[playback]\nvideo_preroll_frames = 0\n").is_err());
        assert!(GenlockConfig::from_toml_str("[playback]\nvideo_queue_capacity = 0\n").is_err());
    }

    #[test]
    fn test_load_explicit_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[reference_lock]\nrequired = true\n").unwrap();

        let (config, path) = GenlockConfig::load(Some(file.path())).unwrap();
        assert!(config.reference_lock.required);
        assert_eq!(path.as_deref(), Some(file.path()));
    }

    #[test]
    fn test_load_invalid_file_fails_validation() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[playback]\naudio_channels = 0\n").unwrap();

        assert!(matches!(
            GenlockConfig::load(Some(file.path())),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_unknown_policy_is_error() {
        assert!(GenlockConfig::from_toml_str("[reference_lock]\non_failure = \"retry\"\n").is_err());
    }
}
