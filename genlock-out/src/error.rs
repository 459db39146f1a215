//! Error types for genlock-out
//!
//! Hardware failures surface as [`HardwareError`] inside the hardware layer and
//! are translated into the variants below at the scheduler boundary. Callers
//! never see raw device codes.

use crate::hardware::HardwareError;
use genlock_common::events::DeviceErrorKind;
use thiserror::Error;

/// Main error type for genlock-out
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors from the shared library (config file resolution, parsing)
    #[error(transparent)]
    Common(#[from] genlock_common::Error),

    /// Display mode or pixel format not supported by the device
    #[error("Unsupported mode: {0}")]
    UnsupportedMode(String),

    /// Enabling video or audio output failed
    #[error("Enable output failed: {0}")]
    EnableOutputFailed(String),

    /// Hardware reference clock could not be read
    #[error("Hardware clock unavailable: {0}")]
    ClockUnavailable(String),

    /// Reference lock not acquired (timeout or abandoned wait)
    #[error("Reference lock timeout: {0}")]
    ReferenceLockTimeout(String),

    /// Hardware refused to start scheduled playback
    #[error("Start playback failed: {0}")]
    StartPlaybackFailed(String),

    /// Device cannot take part in a playback group
    #[error("Synchronized playback unsupported: {0}")]
    SynchronizedPlaybackUnsupported(String),

    /// A group member failed to start; every member was rolled back
    #[error("Group start failed: {0}")]
    GroupStartFailed(String),

    /// Operation not valid in the current playback state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Other hardware failures
    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Device error category published to observers, if any
    pub fn device_error_kind(&self) -> Option<DeviceErrorKind> {
        match self {
            Error::UnsupportedMode(_) => Some(DeviceErrorKind::UnsupportedMode),
            Error::EnableOutputFailed(_) => Some(DeviceErrorKind::EnableOutputFailed),
            Error::ClockUnavailable(_) => Some(DeviceErrorKind::ClockUnavailable),
            Error::ReferenceLockTimeout(_) => Some(DeviceErrorKind::ReferenceLockTimeout),
            Error::StartPlaybackFailed(_) => Some(DeviceErrorKind::StartPlaybackFailed),
            _ => None,
        }
    }
}

/// Convenience Result type using genlock-out Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_category() {
        let err = Error::UnsupportedMode("1080p25 / v210".to_string());
        assert_eq!(err.to_string(), "Unsupported mode: 1080p25 / v210");

        let err = Error::from(HardwareError::Failed("bus reset".to_string()));
        assert!(err.to_string().starts_with("Hardware error:"));
    }

    #[test]
    fn test_device_error_kind_mapping() {
        assert_eq!(
            Error::ReferenceLockTimeout("5000ms".into()).device_error_kind(),
            Some(DeviceErrorKind::ReferenceLockTimeout)
        );
        assert_eq!(
            Error::EnableOutputFailed("busy".into()).device_error_kind(),
            Some(DeviceErrorKind::EnableOutputFailed)
        );
        assert_eq!(Error::InvalidState("running".into()).device_error_kind(), None);
    }
}
