//! Test helper modules for genlock-out integration tests
//!
//! - MockDevice: scriptable output device that records every call
//! - Scheduler construction with short timeouts
//! - Event collection and polling helpers

#![allow(dead_code)]

pub mod mock_device;

pub use mock_device::{HwCall, MockDevice};

use genlock_common::events::{EventBus, GenlockEvent};
use genlock_out::config::AudioWatermark;
use genlock_out::hardware::DisplayModeId;
use genlock_out::media::{AudioPacket, VideoFrame};
use genlock_out::playback::{PlaybackRequest, Scheduler, SchedulerOptions};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

pub const WAIT: Duration = Duration::from_secs(2);

/// 1080p25: frame duration 1000 at scale 25000
pub const MODE: DisplayModeId = DisplayModeId::Hd1080p25;
pub const FRAME: i64 = 1000;

/// Options with a 3 frame preroll and short timeouts
pub fn test_options() -> SchedulerOptions {
    SchedulerOptions {
        video_preroll_frames: 3,
        audio_watermark: AudioWatermark::Samples(4800),
        max_video_in_flight: 3,
        stop_timeout: Duration::from_millis(500),
        reference_lock_timeout: Duration::from_millis(300),
        ..SchedulerOptions::default()
    }
}

pub fn video_only() -> PlaybackRequest {
    PlaybackRequest::new(MODE).with_audio(false)
}

pub fn with_audio() -> PlaybackRequest {
    PlaybackRequest::new(MODE)
}

/// Scheduler over `device` with its own event bus and a subscriber
pub fn scheduler_for(
    device: &Arc<MockDevice>,
    options: SchedulerOptions,
) -> (Scheduler, broadcast::Receiver<GenlockEvent>) {
    let events = EventBus::new(1000);
    let rx = events.subscribe();
    (Scheduler::new(device.as_output(), options, events), rx)
}

/// Queue `count` contiguous frames starting at frame index `first`
pub fn push_frames(scheduler: &Scheduler, first: i64, count: i64) -> Vec<Arc<VideoFrame>> {
    let queue = scheduler.video_queue();
    (first..first + count)
        .map(|i| {
            let frame = Arc::new(VideoFrame::blank(i * FRAME, FRAME));
            queue.push(frame.clone());
            frame
        })
        .collect()
}

/// Queue one stereo audio packet
pub fn push_audio(scheduler: &Scheduler, frames: u32, stream_time: i64) {
    scheduler
        .audio_queue()
        .push(AudioPacket::silence(2, frames, stream_time));
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Every event received so far
pub fn drain_events(rx: &mut broadcast::Receiver<GenlockEvent>) -> Vec<GenlockEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
