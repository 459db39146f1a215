//! Per-device playback scheduler
//!
//! One [`Scheduler`] owns the output of one device. It pulls units from its
//! two [`FrameQueue`]s on dedicated scheduling threads, schedules them ahead of
//! the device's free-running clock, tracks every in-flight frame until the
//! driver's completion callback returns it, and runs the playback state
//! machine:
//!
//! ```text
//! Idle ─start─▶ Starting ─lock─▶ Prerolling ─watermarks─▶ Running
//!   ▲              │                 │                       │
//!   │              └──── stop ───────┴──────────▶ Stopping ◀─┘
//!   │                                               │
//!   └──────────────── Stopped ◀─────────────────────┘
//!
//! any scheduling path ─ClockUnavailable─▶ Error ─disable()─▶ Idle
//! ```
//!
//! All state (playback state, records, timeline, counters) lives behind one
//! mutex with one condition variable. Driver callbacks only update that state
//! and notify; they never block on the scheduling threads.
//!
//! # Module Organization
//!
//! - `workers`: video and audio scheduling threads, end-of-preroll check
//! - `callbacks`: driver callback adapter and completion handling
//! - `stop`: stop / disable teardown and automatic stops

mod callbacks;
mod stop;
mod workers;

use crate::config::{AudioWatermark, GenlockConfig, LockFailurePolicy};
use crate::error::{Error, Result};
use crate::hardware::{
    AudioFormat, DisplayMode, DisplayModeId, HardwareClock, OutputDevice, PixelFormat,
    TimeScale, TimeValue, VideoOutputFlags,
};
use crate::media::{AudioPacket, VideoFrame};
use crate::playback::frame_queue::{FrameQueue, QueueFullPolicy};
use crate::playback::records::{ScheduledFrameRecord, ScheduledFrames};
use crate::playback::reference_lock::{LockWait, ReferenceLockCoordinator};
use crate::playback::timeline::DeviceTimeline;
use callbacks::CallbackAdapter;
use genlock_common::events::{
    DeviceErrorKind, EventBus, GenlockEvent, PlaybackState, ReferenceLockState,
};
use genlock_common::time::AUDIO_SAMPLE_RATE;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// What to play
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackRequest {
    pub mode: DisplayModeId,
    pub pixel_format: PixelFormat,
    pub enable_audio: bool,
    pub audio_channels: u32,
    /// Media stream time shown at display time 0
    pub stream_time_offset: TimeValue,
}

impl PlaybackRequest {
    pub fn new(mode: DisplayModeId) -> Self {
        Self {
            mode,
            pixel_format: PixelFormat::Yuv10Bit,
            enable_audio: true,
            audio_channels: 2,
            stream_time_offset: 0,
        }
    }

    pub fn with_audio(mut self, enable_audio: bool) -> Self {
        self.enable_audio = enable_audio;
        self
    }

    pub fn with_pixel_format(mut self, pixel_format: PixelFormat) -> Self {
        self.pixel_format = pixel_format;
        self
    }

    pub fn with_stream_time_offset(mut self, offset: TimeValue) -> Self {
        self.stream_time_offset = offset;
        self
    }
}

/// Position of a scheduler within a playback group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupRole {
    /// Starts and stops its own hardware playback
    Standalone,
    /// Prerolls only; the group starts it, and its stop stops the whole group
    Master,
    /// Prerolls only; follows the master's start and stop
    Member,
}

impl GroupRole {
    pub fn is_grouped(&self) -> bool {
        !matches!(self, GroupRole::Standalone)
    }
}

/// Tunables for one scheduler
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub video_preroll_frames: u32,
    pub audio_watermark: AudioWatermark,
    pub max_video_in_flight: u32,
    pub audio_high_water_samples: u64,
    pub video_queue_capacity: usize,
    pub audio_queue_capacity: usize,
    pub queue_full_policy: QueueFullPolicy,
    pub stop_timeout: Duration,
    pub require_reference_lock: bool,
    pub reference_lock_timeout: Duration,
    pub lock_failure_policy: LockFailurePolicy,
    pub role: GroupRole,
}

impl SchedulerOptions {
    pub fn from_config(config: &GenlockConfig) -> Self {
        let p = &config.playback;
        let r = &config.reference_lock;
        Self {
            video_preroll_frames: p.video_preroll_frames.max(1),
            audio_watermark: p.audio_watermark,
            max_video_in_flight: p.effective_max_in_flight().max(p.video_preroll_frames).max(1),
            audio_high_water_samples: p.audio_high_water_samples,
            video_queue_capacity: p.video_queue_capacity,
            audio_queue_capacity: p.audio_queue_capacity,
            queue_full_policy: p.queue_full_policy,
            stop_timeout: p.stop_timeout(),
            require_reference_lock: r.required,
            reference_lock_timeout: r.timeout(),
            lock_failure_policy: r.on_failure,
            role: GroupRole::Standalone,
        }
    }

    pub fn with_role(mut self, role: GroupRole) -> Self {
        self.role = role;
        self
    }
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self::from_config(&GenlockConfig::default())
    }
}

/// Result of a successful `start_playback`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Scheduling threads running
    Prerolling { reference_locked: bool },
    /// `stop_playback` interrupted the reference wait; scheduler is Idle
    Cancelled,
}

/// Result of [`Scheduler::wait_for_preroll`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrerollWait {
    Complete {
        start_time: TimeValue,
        reference_locked: bool,
    },
    /// Scheduler left Starting/Prerolling without completing preroll
    NotPrerolling(PlaybackState),
    TimedOut,
}

/// Per-run frame and sample counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameCounters {
    pub frames_scheduled: u64,
    pub frames_completed: u64,
    pub frames_late: u64,
    pub frames_dropped: u64,
    pub frames_flushed: u64,
    pub audio_samples_scheduled: u64,
}

/// Point-in-time view of a scheduler
#[derive(Debug, Clone)]
pub struct SchedulerSnapshot {
    pub device: String,
    pub state: PlaybackState,
    pub timeline: Option<DeviceTimeline>,
    pub frames_in_flight: usize,
    pub buffered_audio_samples: u64,
    pub reference_lock: ReferenceLockState,
    pub start_time: Option<TimeValue>,
    pub end_of_stream: bool,
    pub counters: FrameCounters,
}

/// Receives each completed frame record after the scheduler is done with it
pub type FrameCompletedListener = Arc<dyn Fn(&ScheduledFrameRecord) + Send + Sync>;

/// Parameters fixed for one playback run
struct Session {
    mode: DisplayMode,
    request: PlaybackRequest,
    clock: HardwareClock,
    timeline: DeviceTimeline,
    audio_watermark: u64,
}

struct Inner {
    state: PlaybackState,
    session: Option<Session>,
    records: ScheduledFrames,
    threads: Vec<JoinHandle<()>>,
    /// No further units may be scheduled in this run
    halted: bool,
    late_reported: bool,
    hardware_started: bool,
    hardware_stopped: bool,
    preroll_complete: bool,
    reference_locked: bool,
    end_of_stream: bool,
    video_drained: bool,
    first_video_time: Option<TimeValue>,
    first_audio_time: Option<TimeValue>,
    start_time: Option<TimeValue>,
    buffered_audio: u64,
    counters: FrameCounters,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: PlaybackState::Idle,
            session: None,
            records: ScheduledFrames::new(),
            threads: Vec::new(),
            halted: false,
            late_reported: false,
            hardware_started: false,
            hardware_stopped: false,
            preroll_complete: false,
            reference_locked: false,
            end_of_stream: false,
            video_drained: false,
            first_video_time: None,
            first_audio_time: None,
            start_time: None,
            buffered_audio: 0,
            counters: FrameCounters::default(),
        }
    }

    fn reset_run(&mut self) {
        let state = self.state;
        *self = Inner::new();
        self.state = state;
    }

    /// Units may be handed to the device
    fn may_schedule(&self) -> bool {
        !self.halted
            && matches!(self.state, PlaybackState::Prerolling | PlaybackState::Running)
    }
}

pub(crate) struct SchedulerShared {
    label: String,
    device: Arc<dyn OutputDevice>,
    options: SchedulerOptions,
    inner: Mutex<Inner>,
    cond: Condvar,
    video_queue: Arc<FrameQueue<Arc<VideoFrame>>>,
    audio_queue: Arc<FrameQueue<AudioPacket>>,
    reference: ReferenceLockCoordinator,
    events: EventBus,
    frame_listener: Mutex<Option<FrameCompletedListener>>,
}

/// Cheaply cloneable handle to one device's scheduler
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<SchedulerShared>,
}

impl Scheduler {
    pub fn new(device: Arc<dyn OutputDevice>, options: SchedulerOptions, events: EventBus) -> Self {
        let label = device.display_name();
        let video_queue = Arc::new(FrameQueue::new(
            format!("{}/video", label),
            options.video_queue_capacity,
            options.queue_full_policy,
        ));
        let audio_queue = Arc::new(FrameQueue::new(
            format!("{}/audio", label),
            options.audio_queue_capacity,
            options.queue_full_policy,
        ));

        Self {
            shared: Arc::new(SchedulerShared {
                label,
                device,
                options,
                inner: Mutex::new(Inner::new()),
                cond: Condvar::new(),
                video_queue,
                audio_queue,
                reference: ReferenceLockCoordinator::new(),
                events,
                frame_listener: Mutex::new(None),
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }

    pub fn options(&self) -> &SchedulerOptions {
        &self.shared.options
    }

    pub fn device(&self) -> &Arc<dyn OutputDevice> {
        &self.shared.device
    }

    /// Queue producers push video frames into
    pub fn video_queue(&self) -> Arc<FrameQueue<Arc<VideoFrame>>> {
        self.shared.video_queue.clone()
    }

    /// Queue producers push audio packets into
    pub fn audio_queue(&self) -> Arc<FrameQueue<AudioPacket>> {
        self.shared.audio_queue.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<GenlockEvent> {
        self.shared.events.subscribe()
    }

    pub fn set_frame_completed_listener(&self, listener: Option<FrameCompletedListener>) {
        *self.shared.frame_listener.lock().unwrap() = listener;
    }

    pub fn state(&self) -> PlaybackState {
        self.lock().state
    }

    /// Configure the device and begin prerolling
    ///
    /// Blocks in Starting while waiting for reference lock (if required).
    /// Configuration failures return the scheduler to Idle and are reported
    /// both here and as a `DeviceError` event.
    pub fn start_playback(&self, request: PlaybackRequest) -> Result<StartOutcome> {
        let mode = request.mode.mode();
        {
            let mut inner = self.lock();
            if inner.state != PlaybackState::Idle {
                return Err(Error::InvalidState(format!(
                    "{}: start_playback while {}",
                    self.shared.label, inner.state
                )));
            }

            self.shared.video_queue.reset();
            self.shared.audio_queue.reset();
            self.shared.reference.reset();
            inner.reset_run();
            self.transition(&mut inner, PlaybackState::Starting);

            if let Err(e) = self.configure_output(&mut inner, &request, mode) {
                warn!("{}: output configuration failed: {}", self.shared.label, e);
                self.release_output(&request);
                self.transition(&mut inner, PlaybackState::Idle);
                self.emit_device_error(&e);
                return Err(e);
            }

            // Query after the callback set is registered so no change is missed
            match self.shared.device.reference_signal_locked() {
                Ok(locked) => self
                    .shared
                    .reference
                    .observe_initial(ReferenceLockState::from_locked(locked)),
                Err(e) => debug!("{}: reference status query failed: {}", self.shared.label, e),
            }
        }

        info!(
            "{}: starting {} ({}, audio={}, offset={})",
            self.shared.label,
            mode.name,
            request.pixel_format,
            request.enable_audio,
            request.stream_time_offset
        );

        let mut reference_locked = self.shared.reference.state().is_locked();
        if self.shared.options.require_reference_lock {
            match self.shared.reference.wait_for_lock(self.shared.options.reference_lock_timeout) {
                LockWait::Locked => reference_locked = true,
                outcome => {
                    if self.state() != PlaybackState::Starting {
                        // stop_playback cancelled the wait and owns teardown
                        self.wait_for_state(PlaybackState::Idle, self.teardown_bound());
                        return Ok(StartOutcome::Cancelled);
                    }
                    match self.shared.options.lock_failure_policy {
                        LockFailurePolicy::ProceedUnlocked => {
                            warn!(
                                "{}: reference lock not acquired ({:?}), proceeding unlocked",
                                self.shared.label, outcome
                            );
                            reference_locked = false;
                        }
                        LockFailurePolicy::Fail => {
                            let err = Error::ReferenceLockTimeout(format!(
                                "{}: no reference lock ({:?}) within {:?}",
                                self.shared.label, outcome, self.shared.options.reference_lock_timeout
                            ));
                            warn!("{}", err);
                            self.emit_device_error(&err);
                            self.stop_inner(false)?;
                            return Err(err);
                        }
                    }
                }
            }
        }

        let mut inner = self.lock();
        if inner.state != PlaybackState::Starting {
            drop(inner);
            self.wait_for_state(PlaybackState::Idle, self.teardown_bound());
            return Ok(StartOutcome::Cancelled);
        }
        inner.reference_locked = reference_locked;

        if request.enable_audio {
            if let Err(e) = self.shared.device.begin_audio_preroll() {
                let err = Error::StartPlaybackFailed(format!("begin audio preroll: {}", e));
                drop(inner);
                self.emit_device_error(&err);
                self.stop_inner(false)?;
                return Err(err);
            }
        }

        self.transition(&mut inner, PlaybackState::Prerolling);

        if let Err(e) = self.spawn_workers(&mut inner, request.enable_audio) {
            inner.halted = true;
            drop(inner);
            self.stop_inner(false)?;
            return Err(e);
        }

        Ok(StartOutcome::Prerolling { reference_locked })
    }

    /// Abandon a pending reference-lock wait
    ///
    /// Applies the configured lock-failure policy as if the wait had timed out.
    pub fn cancel_reference_wait(&self) {
        let inner = self.lock();
        if inner.state == PlaybackState::Starting {
            debug!("{}: reference wait cancelled", self.shared.label);
            self.shared.reference.cancel_waiters();
        }
    }

    /// Producer has no more video; stop once every scheduled frame completes
    pub fn mark_end_of_stream(&self) {
        let mut inner = self.lock();
        if inner.end_of_stream {
            return;
        }
        inner.end_of_stream = true;
        info!("{}: end of stream", self.shared.label);
        self.shared.events.emit_lossy(GenlockEvent::EndOfStream {
            device: self.shared.label.clone(),
            timestamp: chrono::Utc::now(),
        });
        self.shared.cond.notify_all();
    }

    /// Start hardware playback of a prerolled group master
    pub fn start_group_playback(&self, start_time: TimeValue) -> Result<()> {
        let mut inner = self.lock();
        if inner.state != PlaybackState::Prerolling || !inner.preroll_complete {
            return Err(Error::InvalidState(format!(
                "{}: group start while {} (preroll complete: {})",
                self.shared.label, inner.state, inner.preroll_complete
            )));
        }
        let scale = self.session_scale(&inner);
        self.shared
            .device
            .start_scheduled_playback(start_time, scale, 1.0)
            .map_err(|e| Error::StartPlaybackFailed(format!("{}: {}", self.shared.label, e)))?;

        inner.hardware_started = true;
        inner.start_time = Some(start_time);
        self.transition(&mut inner, PlaybackState::Running);
        Ok(())
    }

    /// Mark a prerolled group member as running (the master started the group)
    pub fn mark_group_running(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.state != PlaybackState::Prerolling || !inner.preroll_complete {
            return Err(Error::InvalidState(format!(
                "{}: mark running while {}",
                self.shared.label, inner.state
            )));
        }
        inner.hardware_started = true;
        self.transition(&mut inner, PlaybackState::Running);
        Ok(())
    }

    /// Block until the scheduler reaches `target`; false on timeout
    pub fn wait_for_state(&self, target: PlaybackState, timeout: Duration) -> bool {
        let inner = self.lock();
        let (inner, _) = self
            .shared
            .cond
            .wait_timeout_while(inner, timeout, |i| i.state != target)
            .unwrap();
        inner.state == target
    }

    /// Block until preroll completes, the scheduler leaves Starting/Prerolling, or timeout
    pub fn wait_for_preroll(&self, timeout: Duration) -> PrerollWait {
        let inner = self.lock();
        let (inner, result) = self
            .shared
            .cond
            .wait_timeout_while(inner, timeout, |i| {
                !i.preroll_complete
                    && matches!(i.state, PlaybackState::Starting | PlaybackState::Prerolling)
            })
            .unwrap();

        if inner.preroll_complete
            && matches!(inner.state, PlaybackState::Prerolling | PlaybackState::Running)
        {
            PrerollWait::Complete {
                start_time: inner.start_time.unwrap_or(0),
                reference_locked: inner.reference_locked,
            }
        } else if result.timed_out()
            && matches!(inner.state, PlaybackState::Starting | PlaybackState::Prerolling)
        {
            PrerollWait::TimedOut
        } else {
            PrerollWait::NotPrerolling(inner.state)
        }
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        let inner = self.lock();
        SchedulerSnapshot {
            device: self.shared.label.clone(),
            state: inner.state,
            timeline: inner.session.as_ref().map(|s| s.timeline.clone()),
            frames_in_flight: inner.records.len(),
            buffered_audio_samples: inner.buffered_audio,
            reference_lock: self.shared.reference.state(),
            start_time: inner.start_time,
            end_of_stream: inner.end_of_stream,
            counters: inner.counters,
        }
    }

    // ------------------------------------------------------------------------
    // Internals shared by the submodules
    // ------------------------------------------------------------------------

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared.inner.lock().unwrap()
    }

    fn configure_output(
        &self,
        inner: &mut Inner,
        request: &PlaybackRequest,
        mode: DisplayMode,
    ) -> Result<()> {
        let device = &self.shared.device;
        let options = &self.shared.options;

        match device.supports_video_mode(request.mode, request.pixel_format) {
            Ok(true) => {}
            Ok(false) => {
                return Err(Error::UnsupportedMode(format!(
                    "{} does not support {} / {}",
                    self.shared.label, mode.name, request.pixel_format
                )))
            }
            Err(e) => return Err(Error::UnsupportedMode(e.to_string())),
        }

        let adapter = Arc::new(CallbackAdapter::new(Arc::downgrade(&self.shared)));
        device
            .set_output_callback(Some(adapter))
            .map_err(|e| Error::EnableOutputFailed(format!("register callbacks: {}", e)))?;

        let flags = VideoOutputFlags {
            synchronize_to_playback_group: options.role.is_grouped(),
        };
        device
            .enable_video_output(request.mode, flags)
            .map_err(|e| Error::EnableOutputFailed(format!("video: {}", e)))?;

        if request.enable_audio {
            let format = AudioFormat {
                sample_rate: AUDIO_SAMPLE_RATE,
                channels: request.audio_channels.max(1),
            };
            device
                .enable_audio_output(format)
                .map_err(|e| Error::EnableOutputFailed(format!("audio: {}", e)))?;
        }

        let audio_watermark =
            options
                .audio_watermark
                .samples(options.video_preroll_frames, mode.frame_duration, mode.time_scale);

        inner.session = Some(Session {
            mode,
            request: *request,
            clock: HardwareClock::new(device.clone(), mode.time_scale),
            timeline: DeviceTimeline::new(
                mode.frame_duration,
                mode.time_scale,
                request.stream_time_offset,
            ),
            audio_watermark,
        });
        debug!(
            "{}: frame duration {}/{}, audio watermark {} samples",
            self.shared.label, mode.frame_duration, mode.time_scale, audio_watermark
        );
        Ok(())
    }

    /// Undo a partial `configure_output`; errors are logged only
    fn release_output(&self, request: &PlaybackRequest) {
        let device = &self.shared.device;
        if let Err(e) = device.disable_video_output() {
            debug!("{}: disable video: {}", self.shared.label, e);
        }
        if request.enable_audio {
            if let Err(e) = device.disable_audio_output() {
                debug!("{}: disable audio: {}", self.shared.label, e);
            }
        }
        if let Err(e) = device.set_output_callback(None) {
            debug!("{}: deregister callbacks: {}", self.shared.label, e);
        }
    }

    /// Spawn the scheduling threads; handles land in `inner.threads` as they start
    fn spawn_workers(&self, inner: &mut Inner, enable_audio: bool) -> Result<()> {
        let scheduler = self.clone();
        let video = thread::Builder::new()
            .name(format!("genlock-video-{}", self.shared.label))
            .spawn(move || scheduler.video_loop())
            .map_err(|e| Error::Internal(format!("spawn video thread: {}", e)))?;
        inner.threads.push(video);

        if enable_audio {
            let scheduler = self.clone();
            let audio = thread::Builder::new()
                .name(format!("genlock-audio-{}", self.shared.label))
                .spawn(move || scheduler.audio_loop())
                .map_err(|e| Error::Internal(format!("spawn audio thread: {}", e)))?;
            inner.threads.push(audio);
        }

        Ok(())
    }

    fn transition(&self, inner: &mut Inner, new_state: PlaybackState) {
        let old_state = inner.state;
        if old_state == new_state {
            return;
        }
        inner.state = new_state;
        info!("{}: {} -> {}", self.shared.label, old_state, new_state);
        self.shared.events.emit_lossy(GenlockEvent::StateChanged {
            device: self.shared.label.clone(),
            old_state,
            new_state,
            timestamp: chrono::Utc::now(),
        });
        self.shared.cond.notify_all();
    }

    fn emit_error(&self, kind: DeviceErrorKind, message: String) {
        self.shared.events.emit_lossy(GenlockEvent::DeviceError {
            device: self.shared.label.clone(),
            kind,
            message,
            timestamp: chrono::Utc::now(),
        });
    }

    fn emit_device_error(&self, err: &Error) {
        if let Some(kind) = err.device_error_kind() {
            self.emit_error(kind, err.to_string());
        }
    }

    fn session_scale(&self, inner: &Inner) -> TimeScale {
        inner
            .session
            .as_ref()
            .map(|s| s.mode.time_scale)
            .unwrap_or(1)
    }

    /// Upper bound on a full teardown, used by callers waiting for Idle
    fn teardown_bound(&self) -> Duration {
        self.shared.options.stop_timeout * 2 + Duration::from_secs(1)
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("device", &self.shared.label)
            .field("state", &self.state())
            .finish()
    }
}
