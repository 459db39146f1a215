//! Video and audio scheduling threads

use super::{GroupRole, Inner, Scheduler};
use crate::error::Error;
use crate::media::{AudioPacket, VideoFrame};
use crate::playback::records::ScheduledFrameRecord;
use genlock_common::events::{DeviceErrorKind, GenlockEvent, PlaybackState};
use genlock_common::time::{time_to_duration, AUDIO_SAMPLE_RATE};
use std::sync::{Arc, MutexGuard};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Whether a scheduling thread keeps going after one unit
enum Step {
    Continue,
    Exit,
}

impl Scheduler {
    /// Interval for re-checking conditions nobody notifies about
    fn poll_interval(&self, inner: &Inner) -> Duration {
        inner
            .session
            .as_ref()
            .map(|s| time_to_duration(s.mode.frame_duration, s.mode.time_scale))
            .unwrap_or(MIN_POLL_INTERVAL)
            .max(MIN_POLL_INTERVAL)
    }

    pub(super) fn video_loop(self) {
        let shared = self.shared.clone();
        let poll = self.poll_interval(&self.lock());
        debug!("{}: video scheduling thread started", shared.label);

        loop {
            let frame = match shared.video_queue.wait_for_sample_timeout(poll * 2) {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    let mut inner = self.lock();
                    if !inner.may_schedule() {
                        break;
                    }
                    // Sole consumer holds the lock, so an empty queue means nothing is in transit
                    if inner.end_of_stream && shared.video_queue.is_empty() {
                        inner.video_drained = true;
                        debug!("{}: video stream drained", shared.label);
                        self.check_end_of_preroll(&mut inner);
                        self.check_drained(&mut inner);
                        break;
                    }
                    continue;
                }
                Err(_) => break,
            };

            let mut inner = self.lock();
            while inner.may_schedule()
                && inner.records.len() >= shared.options.max_video_in_flight as usize
            {
                inner = shared.cond.wait(inner).unwrap();
            }
            if !inner.may_schedule() {
                trace!("{}: discarding frame {}, scheduling stopped", shared.label, frame.id());
                break;
            }

            if let Step::Exit = self.schedule_video(&mut inner, frame) {
                break;
            }
        }

        debug!("{}: video scheduling thread exiting", shared.label);
    }

    fn schedule_video(&self, inner: &mut MutexGuard<'_, Inner>, frame: Arc<VideoFrame>) -> Step {
        let Some(session) = inner.session.as_ref() else {
            return Step::Exit;
        };
        let reading = match session.clock.now() {
            Ok(reading) => reading,
            Err(e) => {
                self.enter_error(inner, e);
                return Step::Exit;
            }
        };
        let scale = session.mode.time_scale;
        let display_time = session.timeline.display_time(frame.stream_time);
        let duration = if frame.duration > 0 {
            frame.duration
        } else {
            session.mode.frame_duration
        };

        if let Err(e) = self
            .shared
            .device
            .schedule_video_frame(frame.clone(), display_time, duration, scale)
        {
            error!(
                "{}: failed to schedule video frame at {}: {}",
                self.shared.label, display_time, e
            );
            self.schedule_failed(inner, format!("video frame at {}: {}", display_time, e));
            return Step::Exit;
        }

        trace!(
            "{}: scheduled frame {} at {} (hw {})",
            self.shared.label,
            frame.id(),
            display_time,
            reading.timestamp
        );
        inner.records.push(ScheduledFrameRecord {
            frame,
            display_time,
            scheduled_hardware_time: reading.timestamp,
            completed_hardware_time: None,
            completion_result: None,
        });
        inner.counters.frames_scheduled += 1;
        inner.first_video_time.get_or_insert(display_time);

        self.check_end_of_preroll(inner);
        Step::Continue
    }

    pub(super) fn audio_loop(self) {
        let shared = self.shared.clone();
        let poll = self.poll_interval(&self.lock());
        debug!("{}: audio scheduling thread started", shared.label);

        'packets: loop {
            let mut pending = match shared.audio_queue.wait_for_sample() {
                Ok(packet) => Some(packet),
                Err(_) => break,
            };

            while let Some(packet) = pending.take() {
                let mut inner = self.lock();

                // Pace against the device buffer; render_audio_samples wakes us early.
                // Nothing plays out before the start, so until preroll completes
                // only the device capacity (partial writes) bounds the buffer.
                loop {
                    if !inner.may_schedule() {
                        break 'packets;
                    }
                    match shared.device.buffered_audio_sample_frame_count() {
                        Ok(buffered) => {
                            inner.buffered_audio = buffered as u64;
                            let filling_preroll = inner.state == PlaybackState::Prerolling
                                && !inner.preroll_complete;
                            if filling_preroll
                                || (buffered as u64) < shared.options.audio_high_water_samples
                            {
                                break;
                            }
                        }
                        Err(e) => {
                            error!("{}: buffered audio query failed: {}", shared.label, e);
                            self.schedule_failed(&mut inner, format!("buffered audio query: {}", e));
                            break 'packets;
                        }
                    }
                    inner = shared.cond.wait_timeout(inner, poll).unwrap().0;
                }

                match self.schedule_audio(&mut inner, packet) {
                    Ok(None) => {}
                    Ok(Some(rest)) => {
                        // Partial write: retry the remainder after the device drains
                        inner = shared.cond.wait_timeout(inner, poll).unwrap().0;
                        drop(inner);
                        pending = Some(rest);
                    }
                    Err(()) => break 'packets,
                }
            }
        }

        debug!("{}: audio scheduling thread exiting", shared.label);
    }

    /// Schedule one audio packet; returns the unaccepted remainder, if any
    fn schedule_audio(
        &self,
        inner: &mut MutexGuard<'_, Inner>,
        packet: AudioPacket,
    ) -> std::result::Result<Option<AudioPacket>, ()> {
        let Some(session) = inner.session.as_ref() else {
            return Err(());
        };
        if let Err(e) = session.clock.now() {
            self.enter_error(inner, e);
            return Err(());
        }
        let scale = session.mode.time_scale;
        let stream_time = session.timeline.display_time(packet.stream_time);

        let written = match self
            .shared
            .device
            .schedule_audio_samples(&packet, stream_time, scale)
        {
            Ok(written) => written,
            Err(e) => {
                error!(
                    "{}: failed to schedule audio at {}: {}",
                    self.shared.label, stream_time, e
                );
                self.schedule_failed(inner, format!("audio at {}: {}", stream_time, e));
                return Err(());
            }
        };

        trace!(
            "{}: scheduled {} audio samples at {}",
            self.shared.label,
            written,
            stream_time
        );
        inner.counters.audio_samples_scheduled += written as u64;
        if written > 0 {
            inner.first_audio_time.get_or_insert(stream_time);
        }

        self.check_end_of_preroll(inner);
        Ok(packet.remainder(written, scale, AUDIO_SAMPLE_RATE))
    }

    /// Leave Prerolling once both watermarks are met
    ///
    /// Runs under the device lock after every schedule. A stream that ends
    /// before reaching either watermark starts with what it has.
    pub(super) fn check_end_of_preroll(&self, inner: &mut MutexGuard<'_, Inner>) {
        if inner.state != PlaybackState::Prerolling || inner.preroll_complete || inner.halted {
            return;
        }
        let drained = inner.video_drained;
        if !drained && inner.records.len() < self.shared.options.video_preroll_frames as usize {
            return;
        }
        let Some(session) = inner.session.as_ref() else {
            return;
        };
        let scale = session.mode.time_scale;
        let audio_enabled = session.request.enable_audio;
        let watermark = session.audio_watermark;

        if audio_enabled {
            let buffered = match self.shared.device.buffered_audio_sample_frame_count() {
                Ok(n) => n as u64,
                Err(e) => {
                    warn!("{}: buffered audio query failed: {}", self.shared.label, e);
                    return;
                }
            };
            inner.buffered_audio = buffered;
            if !drained && buffered < watermark {
                return;
            }
            if let Err(e) = self.shared.device.end_audio_preroll() {
                warn!("{}: end audio preroll failed: {}", self.shared.label, e);
            }
        }

        let first_video = inner.first_video_time.unwrap_or(0);
        let start_time = match (audio_enabled, inner.first_audio_time) {
            (true, Some(first_audio)) => first_video.max(first_audio),
            _ => first_video,
        };
        inner.preroll_complete = true;
        inner.start_time = Some(start_time);

        info!(
            "{}: preroll complete ({} frames, {} audio samples), start time {}",
            self.shared.label,
            inner.records.len(),
            inner.buffered_audio,
            start_time
        );
        self.shared.events.emit_lossy(GenlockEvent::PrerollComplete {
            device: self.shared.label.clone(),
            start_time,
            time_scale: scale,
            reference_locked: inner.reference_locked,
            timestamp: chrono::Utc::now(),
        });

        if self.shared.options.role != GroupRole::Standalone {
            debug!("{}: waiting for group start", self.shared.label);
            self.shared.cond.notify_all();
            return;
        }

        match self.shared.device.start_scheduled_playback(start_time, scale, 1.0) {
            Ok(()) => {
                inner.hardware_started = true;
                self.transition(inner, PlaybackState::Running);
            }
            Err(e) => {
                error!("{}: start scheduled playback failed: {}", self.shared.label, e);
                inner.halted = true;
                self.emit_error(
                    DeviceErrorKind::StartPlaybackFailed,
                    format!("{}: {}", self.shared.label, e),
                );
                self.spawn_auto_stop("start playback failure");
            }
        }
        self.shared.cond.notify_all();
    }

    /// Schedule call failed: halt, report, stop
    fn schedule_failed(&self, inner: &mut Inner, message: String) {
        if inner.halted {
            return;
        }
        inner.halted = true;
        self.emit_error(DeviceErrorKind::ScheduleFailed, message);
        self.shared.cond.notify_all();
        self.spawn_auto_stop("schedule failure");
    }

    /// Hardware clock lost: park in Error until `disable()`
    fn enter_error(&self, inner: &mut Inner, err: Error) {
        error!("{}: {}", self.shared.label, err);
        inner.halted = true;
        self.transition(inner, PlaybackState::Error);
        self.emit_error(DeviceErrorKind::ClockUnavailable, err.to_string());
        self.shared.cond.notify_all();
    }

    /// Stop once end of stream is reached and every frame has completed
    pub(super) fn check_drained(&self, inner: &mut Inner) {
        if inner.video_drained
            && inner.state == PlaybackState::Running
            && !inner.halted
            && inner.records.is_empty()
        {
            inner.halted = true;
            info!("{}: last frame completed, stopping", self.shared.label);
            self.spawn_auto_stop("end of stream");
        }
    }
}
