//! Software output device
//!
//! [`SimulatedDevice`] behaves like a scheduled-playback card driven by the
//! host's monotonic clock. A driver thread per device retires frames whose
//! display interval has passed, drains the audio buffer at 48 kHz, and
//! delivers every callback from outside the device lock.
//!
//! Devices registered with the same [`HouseReference`] share a reference
//! signal. Devices enabled with `synchronize_to_playback_group` in the same
//! playback group start and stop together when any one of them is started or
//! stopped.

use super::{
    AudioFormat, DisplayMode, DisplayModeId, FrameCompletionResult, HardwareError, HardwareTime,
    HwResult, OutputCallback, OutputDevice, PixelFormat, StreamTime, TimeScale, TimeValue,
    VideoOutputFlags,
};
use crate::media::{AudioPacket, VideoFrame};
use genlock_common::time::{duration_to_time, rescale, samples_for_duration, AUDIO_SAMPLE_RATE};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Driver tick
const TICK: Duration = Duration::from_millis(2);

/// One second of audio at 48 kHz
pub const DEFAULT_AUDIO_CAPACITY: u32 = AUDIO_SAMPLE_RATE;

/// Shared house reference signal and playback group wiring
pub struct HouseReference {
    locked: AtomicBool,
    devices: Mutex<Vec<Weak<SimulatedDevice>>>,
}

impl HouseReference {
    pub fn new(locked: bool) -> Arc<Self> {
        Arc::new(Self {
            locked: AtomicBool::new(locked),
            devices: Mutex::new(Vec::new()),
        })
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    /// Change the reference signal; every registered device reports the change
    pub fn set_locked(&self, locked: bool) {
        if self.locked.swap(locked, Ordering::SeqCst) == locked {
            return;
        }
        debug!("House reference {}", if locked { "locked" } else { "unlocked" });
        for device in self.live_devices() {
            device.queue_reference_change(locked);
        }
    }

    fn register(&self, device: &Arc<SimulatedDevice>) {
        let mut devices = self.devices.lock().unwrap();
        devices.retain(|d| d.strong_count() > 0);
        devices.push(Arc::downgrade(device));
    }

    fn live_devices(&self) -> Vec<Arc<SimulatedDevice>> {
        self.devices
            .lock()
            .unwrap()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Devices that follow a group start or stop issued on `origin`
    fn group_peers(&self, origin: &SimulatedDevice) -> Vec<Arc<SimulatedDevice>> {
        let Some(group) = origin.synchronized_group() else {
            return Vec::new();
        };
        self.live_devices()
            .into_iter()
            .filter(|d| !std::ptr::eq(d.as_ref(), origin))
            .filter(|d| d.synchronized_group() == Some(group))
            .collect()
    }
}

struct PendingFrame {
    frame: Arc<VideoFrame>,
    display_time: TimeValue,
    duration: TimeValue,
    late: bool,
}

/// Callback work collected under the lock, delivered after it is released
enum Delivery {
    Frame(Arc<VideoFrame>, FrameCompletionResult),
    Stopped,
    RenderAudio(bool),
    Reference(bool),
}

struct SimState {
    mode: Option<DisplayMode>,
    sync_to_group: bool,
    playback_group: Option<u32>,
    audio: Option<AudioFormat>,
    audio_prerolling: bool,
    audio_buffered: u64,
    audio_drained_until: TimeValue,
    callback: Option<Arc<dyn OutputCallback>>,
    frames: Vec<PendingFrame>,
    completion_times: HashMap<Uuid, TimeValue>,
    running: bool,
    speed: f64,
    start_time: TimeValue,
    started_at: Instant,
    stopped_at: TimeValue,
    stop_at: Option<TimeValue>,
    flush_pending: bool,
    reference_changes: Vec<bool>,
}

impl SimState {
    fn new() -> Self {
        Self {
            mode: None,
            sync_to_group: false,
            playback_group: None,
            audio: None,
            audio_prerolling: false,
            audio_buffered: 0,
            audio_drained_until: 0,
            callback: None,
            frames: Vec::new(),
            completion_times: HashMap::new(),
            running: false,
            speed: 1.0,
            start_time: 0,
            started_at: Instant::now(),
            stopped_at: 0,
            stop_at: None,
            flush_pending: false,
            reference_changes: Vec::new(),
        }
    }

    fn scale(&self) -> HwResult<TimeScale> {
        self.mode
            .map(|m| m.time_scale)
            .ok_or(HardwareError::NotEnabled)
    }

    /// Current scheduled stream time in the mode's scale
    fn stream_time(&self, now: Instant) -> TimeValue {
        let Some(mode) = self.mode else {
            return self.stopped_at;
        };
        if !self.running {
            return self.stopped_at;
        }
        let elapsed = duration_to_time(now.duration_since(self.started_at), mode.time_scale);
        self.start_time + (elapsed as f64 * self.speed) as TimeValue
    }
}

/// Simulated scheduled-playback output card
pub struct SimulatedDevice {
    name: String,
    house: Option<Arc<HouseReference>>,
    epoch: Instant,
    audio_capacity: u32,
    state: Mutex<SimState>,
    wake: Condvar,
    shutdown: AtomicBool,
}

impl SimulatedDevice {
    /// Create a device and start its driver thread
    pub fn new(name: impl Into<String>, house: Option<Arc<HouseReference>>) -> Arc<Self> {
        Self::with_audio_capacity(name, house, DEFAULT_AUDIO_CAPACITY)
    }

    /// Create a device whose audio buffer holds `audio_capacity` sample frames
    pub fn with_audio_capacity(
        name: impl Into<String>,
        house: Option<Arc<HouseReference>>,
        audio_capacity: u32,
    ) -> Arc<Self> {
        let device = Arc::new(Self {
            name: name.into(),
            house,
            epoch: Instant::now(),
            audio_capacity: audio_capacity.max(1),
            state: Mutex::new(SimState::new()),
            wake: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });

        if let Some(house) = &device.house {
            house.register(&device);
        }

        let weak = Arc::downgrade(&device);
        let spawned = thread::Builder::new()
            .name(format!("sim-driver-{}", device.name))
            .spawn(move || driver_loop(weak));
        if let Err(e) = spawned {
            warn!("{}: failed to spawn driver thread: {}", device.name, e);
        }

        debug!("{}: simulated device created", device.name);
        device
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap()
    }

    fn synchronized_group(&self) -> Option<u32> {
        let state = self.lock();
        match (state.sync_to_group, state.playback_group, state.mode) {
            (true, Some(group), Some(_)) => Some(group),
            _ => None,
        }
    }

    fn queue_reference_change(&self, locked: bool) {
        self.lock().reference_changes.push(locked);
        self.wake.notify_all();
    }

    fn hardware_now(&self, scale: TimeScale) -> TimeValue {
        duration_to_time(self.epoch.elapsed(), scale)
    }

    fn start_local(&self, start_time: TimeValue, scale: TimeScale, speed: f64) -> HwResult<()> {
        let mut state = self.lock();
        let mode_scale = state.scale()?;
        if state.running {
            return Err(HardwareError::Failed("playback already running".to_string()));
        }
        state.start_time = rescale(start_time, scale, mode_scale);
        state.audio_drained_until = state.start_time;
        state.started_at = Instant::now();
        state.speed = speed;
        state.running = true;
        state.stop_at = None;
        debug!("{}: playback started at {}", self.name, state.start_time);
        self.wake.notify_all();
        Ok(())
    }

    fn stop_local(&self, stop_time: TimeValue, scale: TimeScale) -> HwResult<TimeValue> {
        let mut state = self.lock();
        let mode_scale = state.scale()?;
        if !state.running {
            return Ok(rescale(state.stopped_at, mode_scale, scale));
        }
        let now = state.stream_time(Instant::now());
        let requested = rescale(stop_time, scale, mode_scale);
        let actual = if stop_time == 0 || requested <= now {
            halt(&mut state, now);
            now
        } else {
            state.stop_at = Some(requested);
            requested
        };
        debug!("{}: playback stopping at {}", self.name, actual);
        self.wake.notify_all();
        Ok(rescale(actual, mode_scale, scale))
    }

    /// One driver pass: advance playback and collect the callbacks to deliver
    fn tick(&self) -> (Option<Arc<dyn OutputCallback>>, Vec<Delivery>) {
        let mut state = self.lock();
        let mut deliveries = Vec::new();

        for locked in state.reference_changes.drain(..) {
            deliveries.push(Delivery::Reference(locked));
        }

        let now = Instant::now();
        if state.running {
            let stream_time = state.stream_time(now);

            if let Some(stop_at) = state.stop_at {
                if stream_time >= stop_at {
                    halt(&mut state, stop_at);
                }
            }
        }

        if state.running {
            let stream_time = state.stream_time(now);
            let scale = state.mode.map(|m| m.time_scale).unwrap_or(1);
            let completed_at = self.hardware_now(scale);

            state.frames.sort_by_key(|f| f.display_time);
            let due = state
                .frames
                .iter()
                .take_while(|f| f.display_time + f.duration <= stream_time)
                .count();
            let retired: Vec<PendingFrame> = state.frames.drain(..due).collect();
            for pending in retired {
                let result = if pending.late {
                    FrameCompletionResult::DisplayedLate
                } else {
                    FrameCompletionResult::Completed
                };
                trace!("{}: frame at {} {:?}", self.name, pending.display_time, result);
                state.completion_times.insert(pending.frame.id(), completed_at);
                deliveries.push(Delivery::Frame(pending.frame, result));
            }

            if state.audio.is_some() {
                let drained = samples_for_duration(
                    stream_time - state.audio_drained_until,
                    scale,
                    AUDIO_SAMPLE_RATE,
                );
                if drained > 0 {
                    state.audio_buffered = state.audio_buffered.saturating_sub(drained);
                    state.audio_drained_until = stream_time;
                }
                if state.audio_buffered < self.audio_capacity as u64 / 2 {
                    deliveries.push(Delivery::RenderAudio(false));
                }
            }
        } else if state.audio.is_some()
            && state.audio_prerolling
            && state.audio_buffered < self.audio_capacity as u64
        {
            deliveries.push(Delivery::RenderAudio(true));
        }

        if state.flush_pending {
            state.flush_pending = false;
            for pending in state.frames.drain(..) {
                deliveries.push(Delivery::Frame(pending.frame, FrameCompletionResult::Flushed));
            }
            deliveries.push(Delivery::Stopped);
        }

        let callback = state.callback.clone();
        (callback, deliveries)
    }
}

/// Stop playback at `at`; frames still queued are flushed by the driver
fn halt(state: &mut SimState, at: TimeValue) {
    state.running = false;
    state.stopped_at = at;
    state.stop_at = None;
    state.flush_pending = true;
}

fn driver_loop(weak: Weak<SimulatedDevice>) {
    loop {
        let Some(device) = weak.upgrade() else {
            break;
        };
        if device.shutdown.load(Ordering::SeqCst) {
            break;
        }

        let (callback, deliveries) = device.tick();
        if let Some(callback) = callback {
            for delivery in deliveries {
                match delivery {
                    Delivery::Frame(frame, result) => callback.scheduled_frame_completed(frame, result),
                    Delivery::Stopped => callback.scheduled_playback_stopped(),
                    Delivery::RenderAudio(preroll) => callback.render_audio_samples(preroll),
                    Delivery::Reference(locked) => callback.reference_status_changed(locked),
                }
            }
        }

        let state = device.lock();
        let _ = device.wake.wait_timeout(state, TICK).unwrap();
    }
}

impl Drop for SimulatedDevice {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.wake.notify_all();
    }
}

impl OutputDevice for SimulatedDevice {
    fn display_name(&self) -> String {
        self.name.clone()
    }

    fn supports_video_mode(&self, _mode: DisplayModeId, _pixel_format: PixelFormat) -> HwResult<bool> {
        Ok(true)
    }

    fn enable_video_output(&self, mode: DisplayModeId, flags: VideoOutputFlags) -> HwResult<()> {
        let mut state = self.lock();
        if state.mode.is_some() {
            return Err(HardwareError::Failed("video output already enabled".to_string()));
        }
        if flags.synchronize_to_playback_group && state.playback_group.is_none() {
            return Err(HardwareError::InvalidArgument(
                "group synchronization without a playback group".to_string(),
            ));
        }
        state.mode = Some(mode.mode());
        state.sync_to_group = flags.synchronize_to_playback_group;
        state.stopped_at = 0;
        Ok(())
    }

    fn disable_video_output(&self) -> HwResult<()> {
        let mut state = self.lock();
        state.mode = None;
        state.sync_to_group = false;
        state.running = false;
        state.frames.clear();
        state.completion_times.clear();
        Ok(())
    }

    fn enable_audio_output(&self, format: AudioFormat) -> HwResult<()> {
        if format.sample_rate != AUDIO_SAMPLE_RATE {
            return Err(HardwareError::InvalidArgument(format!(
                "sample rate {}",
                format.sample_rate
            )));
        }
        let mut state = self.lock();
        state.audio = Some(format);
        state.audio_buffered = 0;
        Ok(())
    }

    fn disable_audio_output(&self) -> HwResult<()> {
        let mut state = self.lock();
        state.audio = None;
        state.audio_buffered = 0;
        state.audio_prerolling = false;
        Ok(())
    }

    fn set_output_callback(&self, callback: Option<Arc<dyn OutputCallback>>) -> HwResult<()> {
        self.lock().callback = callback;
        Ok(())
    }

    fn schedule_video_frame(
        &self,
        frame: Arc<VideoFrame>,
        display_time: TimeValue,
        duration: TimeValue,
        scale: TimeScale,
    ) -> HwResult<()> {
        let mut state = self.lock();
        let mode_scale = state.scale()?;
        let display_time = rescale(display_time, scale, mode_scale);
        let duration = rescale(duration, scale, mode_scale);
        if duration <= 0 {
            return Err(HardwareError::InvalidArgument("zero frame duration".to_string()));
        }
        let late = state.running && state.stream_time(Instant::now()) > display_time;
        state.frames.push(PendingFrame {
            frame,
            display_time,
            duration,
            late,
        });
        Ok(())
    }

    fn schedule_audio_samples(
        &self,
        packet: &AudioPacket,
        _stream_time: TimeValue,
        _scale: TimeScale,
    ) -> HwResult<u32> {
        let mut state = self.lock();
        let Some(format) = state.audio else {
            return Err(HardwareError::NotEnabled);
        };
        if packet.channels != format.channels {
            return Err(HardwareError::InvalidArgument(format!(
                "{} channel packet on {} channel output",
                packet.channels, format.channels
            )));
        }
        let room = (self.audio_capacity as u64).saturating_sub(state.audio_buffered);
        let accepted = (packet.sample_frames() as u64).min(room);
        state.audio_buffered += accepted;
        Ok(accepted as u32)
    }

    fn begin_audio_preroll(&self) -> HwResult<()> {
        let mut state = self.lock();
        if state.audio.is_none() {
            return Err(HardwareError::NotEnabled);
        }
        state.audio_prerolling = true;
        self.wake.notify_all();
        Ok(())
    }

    fn end_audio_preroll(&self) -> HwResult<()> {
        self.lock().audio_prerolling = false;
        Ok(())
    }

    fn buffered_audio_sample_frame_count(&self) -> HwResult<u32> {
        let state = self.lock();
        if state.audio.is_none() {
            return Err(HardwareError::NotEnabled);
        }
        Ok(state.audio_buffered as u32)
    }

    fn flush_buffered_audio_samples(&self) -> HwResult<()> {
        self.lock().audio_buffered = 0;
        Ok(())
    }

    fn start_scheduled_playback(
        &self,
        start_time: TimeValue,
        scale: TimeScale,
        speed: f64,
    ) -> HwResult<()> {
        self.start_local(start_time, scale, speed)?;
        if let Some(house) = &self.house {
            for peer in house.group_peers(self) {
                if let Err(e) = peer.start_local(start_time, scale, speed) {
                    warn!("{}: group start on {} failed: {}", self.name, peer.name, e);
                }
            }
        }
        Ok(())
    }

    fn stop_scheduled_playback(&self, stop_time: TimeValue, scale: TimeScale) -> HwResult<TimeValue> {
        let actual = self.stop_local(stop_time, scale)?;
        if let Some(house) = &self.house {
            for peer in house.group_peers(self) {
                if let Err(e) = peer.stop_local(stop_time, scale) {
                    warn!("{}: group stop on {} failed: {}", self.name, peer.name, e);
                }
            }
        }
        Ok(actual)
    }

    fn is_scheduled_playback_running(&self) -> HwResult<bool> {
        Ok(self.lock().running)
    }

    fn scheduled_stream_time(&self, scale: TimeScale) -> HwResult<StreamTime> {
        let state = self.lock();
        let mode_scale = state.scale()?;
        Ok(StreamTime {
            time: rescale(state.stream_time(Instant::now()), mode_scale, scale),
            playback_speed: if state.running { state.speed } else { 0.0 },
        })
    }

    fn hardware_reference_clock(&self, scale: TimeScale) -> HwResult<HardwareTime> {
        if scale <= 0 {
            return Err(HardwareError::InvalidArgument(format!("time scale {}", scale)));
        }
        let state = self.lock();
        let ticks_per_frame = state
            .mode
            .map(|m| rescale(m.frame_duration, m.time_scale, scale))
            .unwrap_or(0);
        let time = self.hardware_now(scale);
        Ok(HardwareTime {
            time,
            time_in_frame: if ticks_per_frame > 0 { time % ticks_per_frame } else { 0 },
            ticks_per_frame,
        })
    }

    fn frame_completion_reference_timestamp(
        &self,
        frame: &VideoFrame,
        scale: TimeScale,
    ) -> HwResult<TimeValue> {
        let state = self.lock();
        let mode_scale = state.scale()?;
        state
            .completion_times
            .get(&frame.id())
            .map(|t| rescale(*t, mode_scale, scale))
            .ok_or_else(|| HardwareError::InvalidArgument(format!("frame {} not completed", frame.id())))
    }

    fn reference_signal_locked(&self) -> HwResult<bool> {
        Ok(self.house.as_ref().map(|h| h.is_locked()).unwrap_or(false))
    }

    fn supports_synchronized_playback(&self) -> bool {
        self.house.is_some()
    }

    fn set_playback_group(&self, group_id: u32) -> HwResult<()> {
        if self.house.is_none() {
            return Err(HardwareError::Unsupported(
                "playback groups need a house reference".to_string(),
            ));
        }
        self.lock().playback_group = Some(group_id);
        Ok(())
    }
}
