//! Synchronized playback across devices sharing a house reference
//!
//! Every member joins the same hardware playback group and prerolls on its
//! own. Only the master (member 0) issues the hardware start and stop; the
//! driver propagates both to the rest of the group. A group starts entirely or
//! not at all: if any member fails to lock or preroll, every member is rolled
//! back to Idle before the master is ever told to start.

use crate::config::{GenlockConfig, LockFailurePolicy};
use crate::error::{Error, Result};
use crate::hardware::{OutputDevice, TimeValue};
use crate::playback::scheduler::{
    GroupRole, PlaybackRequest, PrerollWait, Scheduler, SchedulerOptions, StartOutcome,
};
use genlock_common::events::{EventBus, GenlockEvent, PlaybackState};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Fixed, ordered set of schedulers started and stopped as one
pub struct MultiDeviceGroup {
    members: Vec<Scheduler>,
    request: PlaybackRequest,
    playback_group_id: u32,
    preroll_timeout: Duration,
    stop_timeout: Duration,
    events: EventBus,
}

impl MultiDeviceGroup {
    /// Assign every device to the playback group and build its scheduler
    ///
    /// Members always require reference lock and fail (rather than proceed)
    /// when it is not acquired.
    pub fn prepare(
        devices: Vec<Arc<dyn OutputDevice>>,
        request: PlaybackRequest,
        config: &GenlockConfig,
        events: EventBus,
    ) -> Result<Self> {
        if devices.is_empty() {
            return Err(Error::Config("a device group needs at least one device".to_string()));
        }

        let playback_group_id = config.group.playback_group_id;
        for device in &devices {
            if !device.supports_synchronized_playback() {
                return Err(Error::SynchronizedPlaybackUnsupported(device.display_name()));
            }
        }
        for device in &devices {
            device.set_playback_group(playback_group_id).map_err(|e| {
                Error::SynchronizedPlaybackUnsupported(format!("{}: {}", device.display_name(), e))
            })?;
        }

        let mut options = SchedulerOptions::from_config(config);
        options.require_reference_lock = true;
        options.lock_failure_policy = LockFailurePolicy::Fail;

        let members = devices
            .into_iter()
            .enumerate()
            .map(|(i, device)| {
                let role = if i == 0 { GroupRole::Master } else { GroupRole::Member };
                Scheduler::new(device, options.clone().with_role(role), events.clone())
            })
            .collect::<Vec<_>>();

        info!(
            "Prepared playback group {} with {} devices (master: {})",
            playback_group_id,
            members.len(),
            members[0].label()
        );

        Ok(Self {
            members,
            request,
            playback_group_id,
            preroll_timeout: config.group.preroll_timeout(),
            stop_timeout: config.group.stop_timeout(),
            events,
        })
    }

    pub fn members(&self) -> &[Scheduler] {
        &self.members
    }

    pub fn master(&self) -> &Scheduler {
        &self.members[0]
    }

    pub fn playback_group_id(&self) -> u32 {
        self.playback_group_id
    }

    pub fn states(&self) -> Vec<PlaybackState> {
        self.members.iter().map(|m| m.state()).collect()
    }

    /// Start every member and, once all have prerolled locked, the group
    ///
    /// Returns the group start time. On failure every member is back in
    /// Idle and no hardware start was issued.
    pub fn start_group(&self) -> Result<TimeValue> {
        if let Some(busy) = self.members.iter().find(|m| m.state() != PlaybackState::Idle) {
            return Err(Error::InvalidState(format!(
                "group start while {} is {}",
                busy.label(),
                busy.state()
            )));
        }

        info!("Starting playback group {}", self.playback_group_id);

        let request = self.request;
        let outcomes: Vec<Result<StartOutcome>> = thread::scope(|scope| {
            let handles: Vec<_> = self
                .members
                .iter()
                .map(|member| scope.spawn(move || member.start_playback(request)))
                .collect();
            handles
                .into_iter()
                .map(|h| {
                    h.join()
                        .unwrap_or_else(|_| Err(Error::Internal("member start panicked".to_string())))
                })
                .collect()
        });

        let mut failures = Vec::new();
        for (member, outcome) in self.members.iter().zip(outcomes) {
            match outcome {
                Ok(StartOutcome::Prerolling { reference_locked: true }) => {}
                Ok(StartOutcome::Prerolling { reference_locked: false }) => {
                    failures.push(format!("{}: started without reference lock", member.label()))
                }
                Ok(StartOutcome::Cancelled) => {
                    failures.push(format!("{}: start cancelled", member.label()))
                }
                Err(e) => failures.push(format!("{}: {}", member.label(), e)),
            }
        }

        let mut start_time: TimeValue = 0;
        if failures.is_empty() {
            let deadline = Instant::now() + self.preroll_timeout;
            for member in &self.members {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match member.wait_for_preroll(remaining) {
                    PrerollWait::Complete {
                        start_time: member_start,
                        reference_locked: true,
                    } => start_time = start_time.max(member_start),
                    PrerollWait::Complete {
                        reference_locked: false,
                        ..
                    } => failures.push(format!("{}: prerolled without lock", member.label())),
                    PrerollWait::NotPrerolling(state) => {
                        failures.push(format!("{}: preroll ended in {}", member.label(), state))
                    }
                    PrerollWait::TimedOut => failures.push(format!(
                        "{}: preroll not complete within {:?}",
                        member.label(),
                        self.preroll_timeout
                    )),
                }
            }
        }

        if !failures.is_empty() {
            let message = failures.join("; ");
            error!("Playback group {} failed to start: {}", self.playback_group_id, message);
            self.rollback();
            return Err(Error::GroupStartFailed(message));
        }

        if let Err(e) = self.master().start_group_playback(start_time) {
            error!("Playback group {} master start failed: {}", self.playback_group_id, e);
            self.rollback();
            return Err(Error::GroupStartFailed(e.to_string()));
        }
        for member in &self.members[1..] {
            if let Err(e) = member.mark_group_running() {
                warn!("{}: {}", member.label(), e);
            }
        }

        info!(
            "Playback group {} running at start time {}",
            self.playback_group_id, start_time
        );
        self.events.emit_lossy(GenlockEvent::GroupStarted {
            playback_group_id: self.playback_group_id,
            members: self.members.len(),
            start_time,
            time_scale: self.request.mode.mode().time_scale,
            timestamp: chrono::Utc::now(),
        });
        Ok(start_time)
    }

    /// Stop the master (the only hardware stop), then every other member
    pub fn stop_group(&self) -> Result<()> {
        info!("Stopping playback group {}", self.playback_group_id);
        stop_member(self.master())?;

        let mut first_error = None;
        for member in &self.members[1..] {
            if let Err(e) = stop_member(member) {
                error!("{}: stop failed: {}", member.label(), e);
                first_error.get_or_insert(e);
                continue;
            }
            // A member already stopping on its own returns early; wait it out
            if !member.wait_for_state(PlaybackState::Idle, self.stop_timeout) {
                warn!(
                    "{}: not idle within {:?} (state {})",
                    member.label(),
                    self.stop_timeout,
                    member.state()
                );
            }
        }

        self.events.emit_lossy(GenlockEvent::GroupStopped {
            playback_group_id: self.playback_group_id,
            timestamp: chrono::Utc::now(),
        });

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Return every member to Idle after a failed start
    fn rollback(&self) {
        for member in &self.members {
            if let Err(e) = stop_member(member) {
                error!("{}: rollback stop failed: {}", member.label(), e);
            }
        }
        for member in &self.members {
            if !member.wait_for_state(PlaybackState::Idle, self.stop_timeout) {
                warn!("{}: not idle after rollback (state {})", member.label(), member.state());
            }
        }
    }
}

/// Stop one member; a member parked in Error needs a full disable
fn stop_member(member: &Scheduler) -> Result<()> {
    if member.state() != PlaybackState::Error {
        member.stop_playback()?;
    }
    // Also catches a clock failure that landed before the stop claimed the teardown
    if member.state() == PlaybackState::Error {
        warn!("{}: disabling member in error state", member.label());
        member.disable()?;
    }
    Ok(())
}
