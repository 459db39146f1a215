//! Hardware clock access
//!
//! Every scheduling decision reads the device clock afresh. Readings are never
//! cached: the card's clock free-runs independently of the host scheduler.

use super::{HardwareError, OutputDevice, TimeScale, TimeValue};
use crate::error::{Error, Result};
use std::sync::Arc;

/// One reading of the device's free-running clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockReading {
    pub timestamp: TimeValue,
    pub time_in_frame: TimeValue,
    pub frame_duration: TimeValue,
}

/// Clock of one output device at a fixed time scale
#[derive(Clone)]
pub struct HardwareClock {
    device: Arc<dyn OutputDevice>,
    scale: TimeScale,
}

impl HardwareClock {
    pub fn new(device: Arc<dyn OutputDevice>, scale: TimeScale) -> Self {
        Self { device, scale }
    }

    pub fn scale(&self) -> TimeScale {
        self.scale
    }

    /// Current hardware time
    ///
    /// Any device failure is reported as [`Error::ClockUnavailable`].
    pub fn now(&self) -> Result<ClockReading> {
        match self.device.hardware_reference_clock(self.scale) {
            Ok(t) => Ok(ClockReading {
                timestamp: t.time,
                time_in_frame: t.time_in_frame,
                frame_duration: t.ticks_per_frame,
            }),
            Err(HardwareError::ClockUnavailable(msg)) => Err(Error::ClockUnavailable(msg)),
            Err(e) => Err(Error::ClockUnavailable(e.to_string())),
        }
    }
}

impl std::fmt::Debug for HardwareClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardwareClock")
            .field("device", &self.device.display_name())
            .field("scale", &self.scale)
            .finish()
    }
}
