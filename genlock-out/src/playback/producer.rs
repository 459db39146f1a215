//! Media producers and the pump threads that feed scheduler queues
//!
//! A [`MediaProducer`] yields video frames and audio packets in stream-time
//! order. A [`ProducerPump`] pulls from it on two threads and pushes into the
//! scheduler's queues, pacing itself on queue space so a `Block` queue never
//! parks a pump forever once playback stops.

use crate::hardware::{DisplayMode, PixelFormat, TimeValue};
use crate::media::{AudioPacket, VideoFrame};
use crate::playback::frame_queue::PushResult;
use crate::playback::scheduler::Scheduler;
use genlock_common::time::{samples_for_duration, AUDIO_SAMPLE_RATE};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// How long a pump waits for queue space before re-checking for shutdown
const SPACE_WAIT: Duration = Duration::from_millis(50);

/// Next unit from a producer
#[derive(Debug)]
pub enum ReadOutcome<T> {
    Unit(T),
    EndOfStream,
}

/// Source of media in stream-time order
pub trait MediaProducer: Send {
    fn read_video(&mut self) -> ReadOutcome<Arc<VideoFrame>>;

    fn read_audio(&mut self) -> ReadOutcome<AudioPacket>;
}

/// Threads moving units from one producer into one scheduler
pub struct ProducerPump {
    running: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl ProducerPump {
    /// Start pumping; audio is pumped only when `with_audio` is set
    pub fn start<P>(producer: P, scheduler: &Scheduler, with_audio: bool) -> Self
    where
        P: MediaProducer + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let producer = Arc::new(Mutex::new(producer));
        let mut threads = Vec::new();

        {
            let running = running.clone();
            let producer = producer.clone();
            let scheduler = scheduler.clone();
            match thread::Builder::new()
                .name(format!("pump-video-{}", scheduler.label()))
                .spawn(move || pump_video(producer, scheduler, running))
            {
                Ok(handle) => threads.push(handle),
                Err(e) => warn!("failed to spawn video pump: {}", e),
            }
        }

        if with_audio {
            let running = running.clone();
            let scheduler = scheduler.clone();
            match thread::Builder::new()
                .name(format!("pump-audio-{}", scheduler.label()))
                .spawn(move || pump_audio(producer, scheduler, running))
            {
                Ok(handle) => threads.push(handle),
                Err(e) => warn!("failed to spawn audio pump: {}", e),
            }
        }

        Self { running, threads }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop both threads and wait for them
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                warn!("producer pump thread panicked");
            }
        }
    }
}

impl Drop for ProducerPump {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn pump_video<P: MediaProducer>(
    producer: Arc<Mutex<P>>,
    scheduler: Scheduler,
    running: Arc<AtomicBool>,
) {
    let queue = scheduler.video_queue();
    debug!("{}: video pump started", scheduler.label());

    while running.load(Ordering::SeqCst) {
        if !queue.wait_for_space(SPACE_WAIT) {
            if queue.is_cancelled() {
                thread::sleep(SPACE_WAIT);
            }
            continue;
        }
        let outcome = producer.lock().unwrap().read_video();
        match outcome {
            ReadOutcome::Unit(frame) => match queue.push(frame) {
                PushResult::Queued => {}
                PushResult::Displaced(old) => {
                    trace!("{}: displaced frame {}", scheduler.label(), old.stream_time)
                }
                PushResult::Cancelled(_) => thread::sleep(SPACE_WAIT),
            },
            ReadOutcome::EndOfStream => {
                info!("{}: producer reached end of video", scheduler.label());
                scheduler.mark_end_of_stream();
                break;
            }
        }
    }

    debug!("{}: video pump exiting", scheduler.label());
}

fn pump_audio<P: MediaProducer>(
    producer: Arc<Mutex<P>>,
    scheduler: Scheduler,
    running: Arc<AtomicBool>,
) {
    let queue = scheduler.audio_queue();
    debug!("{}: audio pump started", scheduler.label());

    while running.load(Ordering::SeqCst) {
        if !queue.wait_for_space(SPACE_WAIT) {
            if queue.is_cancelled() {
                thread::sleep(SPACE_WAIT);
            }
            continue;
        }
        let outcome = producer.lock().unwrap().read_audio();
        match outcome {
            ReadOutcome::Unit(packet) => {
                if let PushResult::Cancelled(_) = queue.push(packet) {
                    thread::sleep(SPACE_WAIT);
                }
            }
            ReadOutcome::EndOfStream => break,
        }
    }

    debug!("{}: audio pump exiting", scheduler.label());
}

// ============================================================================
// Test pattern
// ============================================================================

/// One v210 block (6 pixels in 16 bytes) per colour
const BLACK: [u32; 4] = [0x2001_0200, 0x0408_0040, 0x2001_0200, 0x0408_0040];
const BLUE: [u32; 4] = [0x1d71_ffc0, 0x07ff_007f, 0x3c01_fdd7, 0x07f7_5c7f];
const RED: [u32; 4] = [0x3c03_e999, 0x0fa6_64fa, 0x1993_ebc0, 0x0faf_00fa];
const GREEN: [u32; 4] = [0x069a_cca7, 0x2b32_9eb3, 0x0a7a_cc69, 0x2b31_a6b3];

const TONE_HZ: f64 = 1000.0;
const TONE_AMPLITUDE: f64 = 0.25;

/// Colour bars with a 1 kHz tone
///
/// Frames alternate between a four-bar pattern and black once a second so a
/// viewer can see the output advancing.
pub struct TestPatternProducer {
    mode: DisplayMode,
    channels: u32,
    bars: Arc<Vec<u8>>,
    black: Arc<Vec<u8>>,
    frame_limit: Option<u64>,
    next_video: u64,
    next_audio: u64,
    tone_phase: f64,
}

impl TestPatternProducer {
    pub fn new(mode: DisplayMode, channels: u32) -> Self {
        let row_bytes = PixelFormat::Yuv10Bit.row_bytes(mode.width) as usize;
        Self {
            mode,
            channels: channels.max(1),
            bars: Arc::new(fill_v210(row_bytes, mode.height as usize, &[BLUE, RED, GREEN, BLACK])),
            black: Arc::new(fill_v210(row_bytes, mode.height as usize, &[BLACK])),
            frame_limit: None,
            next_video: 0,
            next_audio: 0,
            tone_phase: 0.0,
        }
    }

    /// End the stream after `frames` video frames
    pub fn with_frame_limit(mut self, frames: u64) -> Self {
        self.frame_limit = Some(frames);
        self
    }

    fn frames_per_second(&self) -> u64 {
        self.mode.frame_rate().round().max(1.0) as u64
    }

    fn stream_time(&self, frame: u64) -> TimeValue {
        frame as TimeValue * self.mode.frame_duration
    }

    fn limit_reached(&self, frame: u64) -> bool {
        self.frame_limit.map(|limit| frame >= limit).unwrap_or(false)
    }
}

impl MediaProducer for TestPatternProducer {
    fn read_video(&mut self) -> ReadOutcome<Arc<VideoFrame>> {
        if self.limit_reached(self.next_video) {
            return ReadOutcome::EndOfStream;
        }
        let index = self.next_video;
        self.next_video += 1;

        let second = index / self.frames_per_second();
        let data = if second % 2 == 0 { &self.bars } else { &self.black };
        ReadOutcome::Unit(Arc::new(VideoFrame::new(
            self.mode.width,
            self.mode.height,
            PixelFormat::Yuv10Bit,
            data.as_ref().clone(),
            self.stream_time(index),
            self.mode.frame_duration,
        )))
    }

    fn read_audio(&mut self) -> ReadOutcome<AudioPacket> {
        if self.limit_reached(self.next_audio) {
            return ReadOutcome::EndOfStream;
        }
        let index = self.next_audio;
        self.next_audio += 1;

        // Per-frame counts from cumulative totals so 29.97 cadences never drift
        let start = samples_for_duration(self.stream_time(index), self.mode.time_scale, AUDIO_SAMPLE_RATE);
        let end = samples_for_duration(self.stream_time(index + 1), self.mode.time_scale, AUDIO_SAMPLE_RATE);
        let frames = (end - start) as usize;

        let step = std::f64::consts::TAU * TONE_HZ / AUDIO_SAMPLE_RATE as f64;
        let mut samples = Vec::with_capacity(frames * self.channels as usize);
        for _ in 0..frames {
            let value = (self.tone_phase.sin() * TONE_AMPLITUDE * i16::MAX as f64) as i16;
            samples.extend(std::iter::repeat(value).take(self.channels as usize));
            self.tone_phase = (self.tone_phase + step) % std::f64::consts::TAU;
        }

        ReadOutcome::Unit(AudioPacket::new(self.channels, samples, self.stream_time(index)))
    }
}

/// Fill a v210 frame with equal-width vertical bars
fn fill_v210(row_bytes: usize, height: usize, colours: &[[u32; 4]]) -> Vec<u8> {
    let mut row = Vec::with_capacity(row_bytes);
    let groups = row_bytes / 16;
    for group in 0..groups {
        let colour = &colours[(group * colours.len() / groups.max(1)).min(colours.len() - 1)];
        for word in colour {
            row.extend_from_slice(&word.to_le_bytes());
        }
    }
    row.resize(row_bytes, 0);

    let mut frame = Vec::with_capacity(row_bytes * height);
    for _ in 0..height {
        frame.extend_from_slice(&row);
    }
    frame
}
