//! # genlock Common Library
//!
//! Shared code for the genlock playback workspace:
//! - Playback state enumeration shared by every scheduler
//! - Event types (`GenlockEvent`) and the broadcast `EventBus`
//! - Configuration file resolution
//! - Device-timeline arithmetic (time values, time scales, sample counts)

pub mod config;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
pub use events::{EventBus, GenlockEvent, PlaybackState};
