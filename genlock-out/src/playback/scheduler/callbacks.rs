//! Driver callbacks
//!
//! The device holds the adapter; the adapter holds only a `Weak` to the
//! scheduler so a registered callback never keeps a dropped scheduler alive.

use super::{Scheduler, SchedulerShared};
use crate::hardware::{FrameCompletionResult, OutputCallback};
use crate::media::VideoFrame;
use genlock_common::events::{DeviceErrorKind, GenlockEvent, ReferenceLockState};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

pub(super) struct CallbackAdapter {
    shared: Weak<SchedulerShared>,
}

impl CallbackAdapter {
    pub(super) fn new(shared: Weak<SchedulerShared>) -> Self {
        Self { shared }
    }

    fn scheduler(&self) -> Option<Scheduler> {
        self.shared.upgrade().map(|shared| Scheduler { shared })
    }
}

impl OutputCallback for CallbackAdapter {
    fn scheduled_frame_completed(&self, frame: Arc<VideoFrame>, result: FrameCompletionResult) {
        if let Some(scheduler) = self.scheduler() {
            scheduler.handle_frame_completed(frame, result);
        }
    }

    fn scheduled_playback_stopped(&self) {
        if let Some(scheduler) = self.scheduler() {
            scheduler.handle_playback_stopped();
        }
    }

    fn render_audio_samples(&self, _preroll: bool) {
        if let Some(scheduler) = self.scheduler() {
            scheduler.shared.cond.notify_all();
        }
    }

    fn reference_status_changed(&self, locked: bool) {
        if let Some(scheduler) = self.scheduler() {
            scheduler.handle_reference_status(locked);
        }
    }
}

impl Scheduler {
    fn handle_frame_completed(&self, frame: Arc<VideoFrame>, result: FrameCompletionResult) {
        let shared = &self.shared;
        let record = {
            let mut inner = self.lock();

            let Some(mut record) = inner.records.complete(frame.id()) else {
                debug!("{}: ignoring completion for unknown frame {}", shared.label, frame.id());
                return;
            };
            inner.counters.frames_completed += 1;

            if let Some(session) = inner.session.as_ref() {
                let scale = session.mode.time_scale;
                let frame_duration = session.mode.frame_duration;
                record.completed_hardware_time = shared
                    .device
                    .frame_completion_reference_timestamp(&frame, scale)
                    .ok()
                    .map(|t| t - frame_duration);
            }
            record.completion_result = Some(result);

            match result {
                FrameCompletionResult::DisplayedLate => {
                    inner.counters.frames_late += 1;
                    if !inner.late_reported && !inner.halted && inner.state.is_active() {
                        inner.late_reported = true;
                        inner.halted = true;
                        warn!(
                            "{}: frame at {} displayed late, stopping",
                            shared.label, record.display_time
                        );
                        self.emit_error(
                            DeviceErrorKind::FrameDisplayedLate,
                            format!("frame at {} displayed late", record.display_time),
                        );
                        self.spawn_auto_stop("frame displayed late");
                    }
                }
                FrameCompletionResult::Flushed => {
                    inner.counters.frames_flushed += 1;
                }
                FrameCompletionResult::Completed | FrameCompletionResult::Dropped => {
                    if result == FrameCompletionResult::Dropped {
                        inner.counters.frames_dropped += 1;
                    }
                    self.update_stream_time(&mut inner);
                }
            }

            self.check_drained(&mut inner);
            shared.cond.notify_all();
            record
        };

        let listener = shared.frame_listener.lock().unwrap().clone();
        if let Some(listener) = listener {
            listener(&record);
        }
    }

    fn update_stream_time(&self, inner: &mut super::Inner) {
        let label = &self.shared.label;
        let Some(session) = inner.session.as_mut() else {
            return;
        };
        let scale = session.mode.time_scale;
        match self.shared.device.scheduled_stream_time(scale) {
            Ok(stream_time) => {
                if session.timeline.advance(stream_time.time) {
                    self.shared.events.emit_lossy(GenlockEvent::StreamTimeUpdated {
                        device: label.clone(),
                        stream_time: session.timeline.current_stream_time,
                        time_scale: scale,
                        timestamp: chrono::Utc::now(),
                    });
                }
            }
            Err(e) => warn!("{}: scheduled stream time query failed: {}", label, e),
        }
    }

    fn handle_playback_stopped(&self) {
        let mut inner = self.lock();
        inner.hardware_stopped = true;
        debug!("{}: hardware playback stopped", self.shared.label);

        if inner.state.is_active() && !inner.halted {
            // Stopped by the driver or by a group master; tear down locally
            inner.halted = true;
            info!("{}: playback stopped by hardware", self.shared.label);
            self.spawn_auto_stop("hardware stopped");
        }
        self.shared.cond.notify_all();
    }

    fn handle_reference_status(&self, locked: bool) {
        let state = ReferenceLockState::from_locked(locked);
        if self.shared.reference.notify(state) {
            info!("{}: reference {}", self.shared.label, state);
            self.shared.events.emit_lossy(GenlockEvent::ReferenceLockChanged {
                device: self.shared.label.clone(),
                state,
                timestamp: chrono::Utc::now(),
            });
        }
    }
}
