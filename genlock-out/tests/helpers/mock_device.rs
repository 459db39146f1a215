//! Scriptable output device for scheduler tests
//!
//! Nothing happens on its own: the test decides when frames complete, what
//! stream time the device reports and whether the reference is locked. Every
//! call into the device is recorded for later assertions.

use genlock_out::hardware::{
    AudioFormat, DisplayModeId, FrameCompletionResult, HardwareError, HardwareTime, HwResult,
    OutputCallback, OutputDevice, PixelFormat, StreamTime, TimeScale, TimeValue,
    VideoOutputFlags,
};
use genlock_out::media::{AudioPacket, VideoFrame};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// One recorded call into the device
#[derive(Debug, Clone, PartialEq)]
pub enum HwCall {
    EnableVideo { mode: DisplayModeId, synchronized: bool },
    DisableVideo,
    EnableAudio { channels: u32 },
    DisableAudio,
    ScheduleVideo { display_time: TimeValue },
    ScheduleAudio { stream_time: TimeValue, accepted: u32 },
    BeginAudioPreroll,
    EndAudioPreroll,
    Start { start_time: TimeValue },
    Stop,
    FlushAudio,
    SetPlaybackGroup(u32),
}

struct MockState {
    calls: Vec<HwCall>,
    callback: Option<Arc<dyn OutputCallback>>,
    pending: VecDeque<Arc<VideoFrame>>,
    completion_times: HashMap<Uuid, TimeValue>,
    running: bool,
    stream_time: TimeValue,
    clock: TimeValue,
    buffered_audio: u32,
    audio_capacity: u32,
    reference_locked: bool,
    supports_mode: bool,
    supports_sync: bool,
    clock_fails: bool,
    schedule_fails: bool,
    start_fails: bool,
    confirm_stop: bool,
    schedule_threads: Vec<String>,
}

/// Output device driven entirely by the test
pub struct MockDevice {
    name: String,
    state: Mutex<MockState>,
    changed: Condvar,
}

impl MockDevice {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            state: Mutex::new(MockState {
                calls: Vec::new(),
                callback: None,
                pending: VecDeque::new(),
                completion_times: HashMap::new(),
                running: false,
                stream_time: 0,
                clock: 0,
                buffered_audio: 0,
                audio_capacity: u32::MAX,
                reference_locked: false,
                supports_mode: true,
                supports_sync: true,
                clock_fails: false,
                schedule_fails: false,
                start_fails: false,
                confirm_stop: true,
                schedule_threads: Vec::new(),
            }),
            changed: Condvar::new(),
        })
    }

    /// Device whose reference is locked from the start
    pub fn locked(name: &str) -> Arc<Self> {
        let device = Self::new(name);
        device.state.lock().unwrap().reference_locked = true;
        device
    }

    pub fn as_output(self: &Arc<Self>) -> Arc<dyn OutputDevice> {
        self.clone()
    }

    /// Names of the threads that scheduled each video frame
    pub fn schedule_thread_names(&self) -> Vec<String> {
        self.state.lock().unwrap().schedule_threads.clone()
    }

    fn record(&self, state: &mut MockState, call: HwCall) {
        state.calls.push(call);
        self.changed.notify_all();
    }

    pub fn calls(&self) -> Vec<HwCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count_calls(&self, matches: impl Fn(&HwCall) -> bool) -> usize {
        self.state.lock().unwrap().calls.iter().filter(|c| matches(c)).count()
    }

    /// Wait until at least `n` recorded calls satisfy `matches`
    pub fn wait_for_calls(
        &self,
        n: usize,
        timeout: Duration,
        matches: impl Fn(&HwCall) -> bool,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap();
        loop {
            if state.calls.iter().filter(|c| matches(c)).count() >= n {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self.changed.wait_timeout(state, deadline - now).unwrap().0;
        }
    }

    /// Frames scheduled and not yet completed
    pub fn pending_frames(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    /// Complete the oldest pending frame, delivering the callback on this thread
    pub fn complete_next(&self, result: FrameCompletionResult) -> Option<Arc<VideoFrame>> {
        let (frame, callback) = {
            let mut state = self.state.lock().unwrap();
            let frame = state.pending.pop_front()?;
            state.clock += 1000;
            let clock = state.clock;
            state.completion_times.insert(frame.id(), clock);
            (frame, state.callback.clone())
        };
        if let Some(callback) = callback {
            callback.scheduled_frame_completed(frame.clone(), result);
        }
        Some(frame)
    }

    /// Deliver a completion for an arbitrary frame (duplicates, unknown frames)
    pub fn complete_frame(&self, frame: Arc<VideoFrame>, result: FrameCompletionResult) {
        let callback = self.state.lock().unwrap().callback.clone();
        if let Some(callback) = callback {
            callback.scheduled_frame_completed(frame, result);
        }
    }

    pub fn set_stream_time(&self, time: TimeValue) {
        self.state.lock().unwrap().stream_time = time;
    }

    /// Change the reference and report it through the callback
    pub fn set_reference_locked(&self, locked: bool) {
        let callback = {
            let mut state = self.state.lock().unwrap();
            state.reference_locked = locked;
            state.callback.clone()
        };
        if let Some(callback) = callback {
            callback.reference_status_changed(locked);
        }
    }

    pub fn set_supports_mode(&self, supported: bool) {
        self.state.lock().unwrap().supports_mode = supported;
    }

    pub fn set_supports_sync(&self, supported: bool) {
        self.state.lock().unwrap().supports_sync = supported;
    }

    pub fn set_clock_fails(&self, fails: bool) {
        self.state.lock().unwrap().clock_fails = fails;
    }

    pub fn set_schedule_fails(&self, fails: bool) {
        self.state.lock().unwrap().schedule_fails = fails;
    }

    pub fn set_start_fails(&self, fails: bool) {
        self.state.lock().unwrap().start_fails = fails;
    }

    /// Whether `stop_scheduled_playback` is followed by a stop callback
    pub fn set_confirm_stop(&self, confirm: bool) {
        self.state.lock().unwrap().confirm_stop = confirm;
    }

    pub fn set_audio_capacity(&self, samples: u32) {
        self.state.lock().unwrap().audio_capacity = samples;
    }

    /// Play out `samples` buffered audio frames and ask for more
    pub fn drain_audio(&self, samples: u32) {
        let callback = {
            let mut state = self.state.lock().unwrap();
            state.buffered_audio = state.buffered_audio.saturating_sub(samples);
            state.callback.clone()
        };
        if let Some(callback) = callback {
            callback.render_audio_samples(false);
        }
    }

    pub fn has_callback(&self) -> bool {
        self.state.lock().unwrap().callback.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().unwrap().running
    }
}

impl OutputDevice for MockDevice {
    fn display_name(&self) -> String {
        self.name.clone()
    }

    fn supports_video_mode(&self, _mode: DisplayModeId, _pixel_format: PixelFormat) -> HwResult<bool> {
        Ok(self.state.lock().unwrap().supports_mode)
    }

    fn enable_video_output(&self, mode: DisplayModeId, flags: VideoOutputFlags) -> HwResult<()> {
        let mut state = self.state.lock().unwrap();
        self.record(
            &mut state,
            HwCall::EnableVideo {
                mode,
                synchronized: flags.synchronize_to_playback_group,
            },
        );
        Ok(())
    }

    fn disable_video_output(&self) -> HwResult<()> {
        let mut state = self.state.lock().unwrap();
        state.pending.clear();
        self.record(&mut state, HwCall::DisableVideo);
        Ok(())
    }

    fn enable_audio_output(&self, format: AudioFormat) -> HwResult<()> {
        let mut state = self.state.lock().unwrap();
        self.record(
            &mut state,
            HwCall::EnableAudio {
                channels: format.channels,
            },
        );
        Ok(())
    }

    fn disable_audio_output(&self) -> HwResult<()> {
        let mut state = self.state.lock().unwrap();
        self.record(&mut state, HwCall::DisableAudio);
        Ok(())
    }

    fn set_output_callback(&self, callback: Option<Arc<dyn OutputCallback>>) -> HwResult<()> {
        self.state.lock().unwrap().callback = callback;
        Ok(())
    }

    fn schedule_video_frame(
        &self,
        frame: Arc<VideoFrame>,
        display_time: TimeValue,
        _duration: TimeValue,
        _scale: TimeScale,
    ) -> HwResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.schedule_fails {
            return Err(HardwareError::Failed("schedule rejected".to_string()));
        }
        state.pending.push_back(frame);
        let thread = std::thread::current().name().unwrap_or_default().to_string();
        state.schedule_threads.push(thread);
        self.record(&mut state, HwCall::ScheduleVideo { display_time });
        Ok(())
    }

    fn schedule_audio_samples(
        &self,
        packet: &AudioPacket,
        stream_time: TimeValue,
        _scale: TimeScale,
    ) -> HwResult<u32> {
        let mut state = self.state.lock().unwrap();
        if state.schedule_fails {
            return Err(HardwareError::Failed("schedule rejected".to_string()));
        }
        let room = state.audio_capacity.saturating_sub(state.buffered_audio);
        let accepted = packet.sample_frames().min(room);
        state.buffered_audio += accepted;
        self.record(&mut state, HwCall::ScheduleAudio { stream_time, accepted });
        Ok(accepted)
    }

    fn begin_audio_preroll(&self) -> HwResult<()> {
        let mut state = self.state.lock().unwrap();
        self.record(&mut state, HwCall::BeginAudioPreroll);
        Ok(())
    }

    fn end_audio_preroll(&self) -> HwResult<()> {
        let mut state = self.state.lock().unwrap();
        self.record(&mut state, HwCall::EndAudioPreroll);
        Ok(())
    }

    fn buffered_audio_sample_frame_count(&self) -> HwResult<u32> {
        Ok(self.state.lock().unwrap().buffered_audio)
    }

    fn flush_buffered_audio_samples(&self) -> HwResult<()> {
        let mut state = self.state.lock().unwrap();
        state.buffered_audio = 0;
        self.record(&mut state, HwCall::FlushAudio);
        Ok(())
    }

    fn start_scheduled_playback(
        &self,
        start_time: TimeValue,
        _scale: TimeScale,
        _speed: f64,
    ) -> HwResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.start_fails {
            return Err(HardwareError::Failed("start rejected".to_string()));
        }
        state.running = true;
        self.record(&mut state, HwCall::Start { start_time });
        Ok(())
    }

    fn stop_scheduled_playback(&self, _stop_time: TimeValue, _scale: TimeScale) -> HwResult<TimeValue> {
        let mut state = self.state.lock().unwrap();
        state.running = false;
        self.record(&mut state, HwCall::Stop);

        if state.confirm_stop {
            // Confirm from a separate thread, as a driver would
            if let Some(callback) = state.callback.clone() {
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(5));
                    callback.scheduled_playback_stopped();
                });
            }
        }
        Ok(state.stream_time)
    }

    fn is_scheduled_playback_running(&self) -> HwResult<bool> {
        Ok(self.state.lock().unwrap().running)
    }

    fn scheduled_stream_time(&self, _scale: TimeScale) -> HwResult<StreamTime> {
        let state = self.state.lock().unwrap();
        Ok(StreamTime {
            time: state.stream_time,
            playback_speed: if state.running { 1.0 } else { 0.0 },
        })
    }

    fn hardware_reference_clock(&self, _scale: TimeScale) -> HwResult<HardwareTime> {
        let state = self.state.lock().unwrap();
        if state.clock_fails {
            return Err(HardwareError::ClockUnavailable("no reference clock".to_string()));
        }
        Ok(HardwareTime {
            time: state.clock,
            time_in_frame: 0,
            ticks_per_frame: 1000,
        })
    }

    fn frame_completion_reference_timestamp(
        &self,
        frame: &VideoFrame,
        _scale: TimeScale,
    ) -> HwResult<TimeValue> {
        self.state
            .lock()
            .unwrap()
            .completion_times
            .get(&frame.id())
            .copied()
            .ok_or_else(|| HardwareError::InvalidArgument("frame not completed".to_string()))
    }

    fn reference_signal_locked(&self) -> HwResult<bool> {
        Ok(self.state.lock().unwrap().reference_locked)
    }

    fn supports_synchronized_playback(&self) -> bool {
        self.state.lock().unwrap().supports_sync
    }

    fn set_playback_group(&self, group_id: u32) -> HwResult<()> {
        let mut state = self.state.lock().unwrap();
        self.record(&mut state, HwCall::SetPlaybackGroup(group_id));
        Ok(())
    }
}
