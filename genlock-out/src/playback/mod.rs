//! Scheduled playback
//!
//! - `frame_queue`: bounded producer/scheduler hand-off
//! - `records`: frames scheduled but not yet completed
//! - `timeline`: media stream time to device display time mapping
//! - `reference_lock`: waiting on the house reference
//! - `scheduler`: per-device state machine and scheduling threads
//! - `group`: synchronized start and stop across devices
//! - `producer`: media sources and the pumps that feed the queues

pub mod frame_queue;
pub mod group;
pub mod producer;
pub mod records;
pub mod reference_lock;
pub mod scheduler;
pub mod timeline;

pub use frame_queue::{FrameQueue, PushResult, QueueFullPolicy};
pub use group::MultiDeviceGroup;
pub use producer::{MediaProducer, ProducerPump, ReadOutcome, TestPatternProducer};
pub use records::{ScheduledFrameRecord, ScheduledFrames};
pub use reference_lock::{LockWait, ReferenceLockCoordinator};
pub use scheduler::{
    FrameCompletedListener, FrameCounters, GroupRole, PlaybackRequest, PrerollWait, Scheduler,
    SchedulerOptions, SchedulerSnapshot, StartOutcome,
};
pub use timeline::DeviceTimeline;
