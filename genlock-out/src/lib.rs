//! # Genlock Output Library (genlock-out)
//!
//! Frame-accurate scheduled playback of video and audio to output devices
//! locked to a house reference.
//!
//! **Architecture:** producers push media into bounded queues; one scheduler
//! per device pulls from them on dedicated threads and schedules each unit
//! ahead of the device's free-running clock. Driver callbacks retire frames
//! and advance the device timeline. A [`playback::MultiDeviceGroup`] starts
//! and stops several devices together.

pub mod config;
pub mod error;
pub mod hardware;
pub mod media;
pub mod playback;

pub use error::{Error, Result};
