//! Stop, disable and automatic stops
//!
//! `stop_playback` is the single cancellation entry point. The first caller
//! claims the teardown by moving to Stopping; every later caller returns at
//! once. Automatic stops (late frame, schedule failure, end of stream,
//! unsolicited hardware stop) run the same path on a short-lived thread, so a
//! driver callback or scheduling thread never joins itself or waits on its own
//! stop confirmation.

use super::{GroupRole, Scheduler};
use crate::error::Result;
use genlock_common::events::PlaybackState;
use std::thread;
use tracing::{debug, error, info, trace, warn};

impl Scheduler {
    /// Stop playback and return to Idle
    ///
    /// Idempotent: a no-op in Idle, and a second caller while a stop is in
    /// flight returns immediately without a second hardware stop. In Error the
    /// call does nothing; use [`Scheduler::disable`].
    ///
    /// Must not be called from a driver callback: it waits for the driver's
    /// stop confirmation.
    pub fn stop_playback(&self) -> Result<()> {
        self.stop_inner(false)
    }

    /// Full teardown to Idle from any state, including Error
    pub fn disable(&self) -> Result<()> {
        self.stop_inner(true)
    }

    pub(super) fn stop_inner(&self, from_error: bool) -> Result<()> {
        let shared = &self.shared;
        {
            let mut inner = self.lock();
            match inner.state {
                PlaybackState::Idle | PlaybackState::Stopping | PlaybackState::Stopped => {
                    debug!("{}: stop ignored while {}", shared.label, inner.state);
                    return Ok(());
                }
                PlaybackState::Error if !from_error => {
                    debug!("{}: stop ignored in error state, disable() required", shared.label);
                    return Ok(());
                }
                _ => {}
            }
            inner.halted = true;
            self.transition(&mut inner, PlaybackState::Stopping);
        }

        shared.reference.cancel_waiters();
        shared.video_queue.cancel_waiters();
        shared.audio_queue.cancel_waiters();

        let threads = std::mem::take(&mut self.lock().threads);
        for handle in threads {
            let name = handle.thread().name().unwrap_or("scheduling").to_string();
            if handle.join().is_err() {
                error!("{}: {} thread panicked", shared.label, name);
            }
        }

        let running = shared.device.is_scheduled_playback_running().unwrap_or_else(|e| {
            warn!("{}: playback status query failed: {}", shared.label, e);
            false
        });

        let mut inner = self.lock();
        let scale = self.session_scale(&inner);

        if running && !inner.hardware_stopped {
            if shared.options.role != GroupRole::Member {
                match shared.device.stop_scheduled_playback(0, scale) {
                    Ok(actual_stop_time) => {
                        if let Some(session) = inner.session.as_mut() {
                            session.timeline.advance(actual_stop_time);
                        }
                        debug!("{}: hardware stopped at {}", shared.label, actual_stop_time);
                    }
                    Err(e) => error!("{}: stop scheduled playback failed: {}", shared.label, e),
                }
            }

            let (guard, wait) = shared
                .cond
                .wait_timeout_while(inner, shared.options.stop_timeout, |i| !i.hardware_stopped)
                .unwrap();
            inner = guard;
            if wait.timed_out() {
                warn!(
                    "{}: no stop confirmation within {:?}, continuing teardown",
                    shared.label, shared.options.stop_timeout
                );
            }
        }

        let audio_enabled = inner
            .session
            .as_ref()
            .map(|s| s.request.enable_audio)
            .unwrap_or(false);
        if audio_enabled {
            if let Err(e) = shared.device.flush_buffered_audio_samples() {
                warn!("{}: flush audio failed: {}", shared.label, e);
            }
        }

        self.transition(&mut inner, PlaybackState::Stopped);

        if let Err(e) = shared.device.disable_video_output() {
            warn!("{}: disable video output failed: {}", shared.label, e);
        }
        if audio_enabled {
            if let Err(e) = shared.device.disable_audio_output() {
                warn!("{}: disable audio output failed: {}", shared.label, e);
            }
        }
        if let Err(e) = shared.device.set_output_callback(None) {
            warn!("{}: deregister callbacks failed: {}", shared.label, e);
        }

        let abandoned = inner.records.len();
        inner.records.clear();
        let mut unplayed_frames = 0;
        while let Some(frame) = shared.video_queue.try_pop() {
            trace!("{}: discarding queued frame {}", shared.label, frame.id());
            unplayed_frames += 1;
        }
        let unplayed_audio = shared.audio_queue.clear();

        self.transition(&mut inner, PlaybackState::Idle);
        info!(
            "{}: playback stopped ({} frames scheduled, {} completed, {} abandoned)",
            shared.label, inner.counters.frames_scheduled, inner.counters.frames_completed, abandoned
        );
        debug!(
            "{}: discarded {} queued frames and {} audio packets; displaced on overflow: {} video, {} audio",
            shared.label,
            unplayed_frames,
            unplayed_audio,
            shared.video_queue.displaced_count(),
            shared.audio_queue.displaced_count()
        );
        Ok(())
    }

    /// Run `stop_playback` on a dedicated thread
    pub(super) fn spawn_auto_stop(&self, reason: &'static str) {
        let scheduler = self.clone();
        let spawned = thread::Builder::new()
            .name(format!("genlock-stop-{}", self.shared.label))
            .spawn(move || {
                info!("{}: automatic stop ({})", scheduler.shared.label, reason);
                if let Err(e) = scheduler.stop_playback() {
                    error!("{}: automatic stop failed: {}", scheduler.shared.label, e);
                }
            });
        if let Err(e) = spawned {
            error!("{}: failed to spawn stop thread: {}", self.shared.label, e);
        }
    }
}
