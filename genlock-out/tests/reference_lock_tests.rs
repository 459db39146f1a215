//! Reference lock handling during start
//!
//! Covers both lock-failure policies, a lock arriving during the wait, and
//! the two ways a wait is abandoned (stop and explicit cancel).

mod helpers;

use genlock_common::events::{DeviceErrorKind, GenlockEvent, PlaybackState, ReferenceLockState};
use genlock_out::config::LockFailurePolicy;
use genlock_out::playback::{SchedulerOptions, StartOutcome};
use genlock_out::Error;
use helpers::*;
use std::thread;
use std::time::{Duration, Instant};

fn lock_required(policy: LockFailurePolicy, timeout: Duration) -> SchedulerOptions {
    let mut options = test_options();
    options.require_reference_lock = true;
    options.lock_failure_policy = policy;
    options.reference_lock_timeout = timeout;
    options
}

/// Given a device already locked to the house reference
/// When playback starts with lock required
/// Then start proceeds at once and reports the lock
#[test]
fn test_already_locked_starts_immediately() {
    let device = MockDevice::locked("mock");
    let (scheduler, _rx) = scheduler_for(
        &device,
        lock_required(LockFailurePolicy::Fail, Duration::from_secs(5)),
    );

    let started = Instant::now();
    let outcome = scheduler.start_playback(video_only()).unwrap();
    assert_eq!(outcome, StartOutcome::Prerolling { reference_locked: true });
    assert!(started.elapsed() < Duration::from_secs(1));

    scheduler.stop_playback().unwrap();
}

/// Given an unlocked device
/// When the reference locks during the wait
/// Then start completes locked and the change is published
#[test]
fn test_lock_acquired_during_wait() {
    let device = MockDevice::new("mock");
    let (scheduler, mut rx) = scheduler_for(
        &device,
        lock_required(LockFailurePolicy::Fail, Duration::from_secs(5)),
    );

    let locker = {
        let device = device.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            device.set_reference_locked(true);
        })
    };

    let outcome = scheduler.start_playback(video_only()).unwrap();
    locker.join().unwrap();
    assert_eq!(outcome, StartOutcome::Prerolling { reference_locked: true });
    assert_eq!(scheduler.snapshot().reference_lock, ReferenceLockState::Locked);

    let events = drain_events(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        GenlockEvent::ReferenceLockChanged {
            state: ReferenceLockState::Locked,
            ..
        }
    )));

    scheduler.stop_playback().unwrap();
}

/// Given an unlocked device and the Fail policy
/// When the lock wait times out
/// Then start fails, everything is released and the scheduler is Idle
#[test]
fn test_timeout_with_fail_policy() {
    let device = MockDevice::new("mock");
    let (scheduler, mut rx) = scheduler_for(
        &device,
        lock_required(LockFailurePolicy::Fail, Duration::from_millis(200)),
    );
    push_frames(&scheduler, 0, 3);

    let result = scheduler.start_playback(video_only());
    assert!(matches!(result, Err(Error::ReferenceLockTimeout(_))));
    assert_eq!(scheduler.state(), PlaybackState::Idle);
    assert_eq!(device.count_calls(|c| matches!(c, HwCall::Start { .. })), 0);
    assert!(device.calls().contains(&HwCall::DisableVideo));
    assert!(!device.has_callback());

    let events = drain_events(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        GenlockEvent::DeviceError {
            kind: DeviceErrorKind::ReferenceLockTimeout,
            ..
        }
    )));
}

/// Given an unlocked device and the ProceedUnlocked policy
/// When the lock wait times out
/// Then playback goes ahead unlocked
#[test]
fn test_timeout_with_proceed_policy() {
    let device = MockDevice::new("mock");
    let (scheduler, _rx) = scheduler_for(
        &device,
        lock_required(LockFailurePolicy::ProceedUnlocked, Duration::from_millis(200)),
    );
    push_frames(&scheduler, 0, 3);

    let outcome = scheduler.start_playback(video_only()).unwrap();
    assert_eq!(outcome, StartOutcome::Prerolling { reference_locked: false });
    assert!(scheduler.wait_for_state(PlaybackState::Running, WAIT));

    scheduler.stop_playback().unwrap();
}

/// Given a start blocked waiting for reference lock
/// When stop is requested
/// Then start returns Cancelled and the scheduler ends Idle
#[test]
fn test_stop_during_lock_wait_cancels_start() {
    let device = MockDevice::new("mock");
    let (scheduler, _rx) = scheduler_for(
        &device,
        lock_required(LockFailurePolicy::Fail, Duration::from_secs(10)),
    );

    let starter = {
        let scheduler = scheduler.clone();
        thread::spawn(move || scheduler.start_playback(video_only()))
    };
    assert!(wait_until(WAIT, || scheduler.state() == PlaybackState::Starting));
    thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    scheduler.stop_playback().unwrap();
    let outcome = starter.join().unwrap().unwrap();

    assert_eq!(outcome, StartOutcome::Cancelled);
    assert_eq!(scheduler.state(), PlaybackState::Idle);
    assert!(started.elapsed() < Duration::from_secs(5));
}

/// Given a start blocked waiting for reference lock under the Fail policy
/// When the wait is cancelled
/// Then start fails as it would on timeout
#[test]
fn test_cancel_reference_wait_applies_policy() {
    let device = MockDevice::new("mock");
    let (scheduler, _rx) = scheduler_for(
        &device,
        lock_required(LockFailurePolicy::Fail, Duration::from_secs(10)),
    );

    let starter = {
        let scheduler = scheduler.clone();
        thread::spawn(move || scheduler.start_playback(video_only()))
    };
    assert!(wait_until(WAIT, || scheduler.state() == PlaybackState::Starting));
    thread::sleep(Duration::from_millis(50));

    scheduler.cancel_reference_wait();
    let result = starter.join().unwrap();
    assert!(matches!(result, Err(Error::ReferenceLockTimeout(_))));
    assert_eq!(scheduler.state(), PlaybackState::Idle);
}

/// Given a running scheduler
/// When the reference is lost
/// Then the loss is published and playback continues
#[test]
fn test_lock_loss_while_running_is_reported() {
    let device = MockDevice::locked("mock");
    let (scheduler, mut rx) = scheduler_for(
        &device,
        lock_required(LockFailurePolicy::Fail, Duration::from_secs(1)),
    );
    push_frames(&scheduler, 0, 3);
    scheduler.start_playback(video_only()).unwrap();
    assert!(scheduler.wait_for_state(PlaybackState::Running, WAIT));

    device.set_reference_locked(false);
    assert_eq!(scheduler.snapshot().reference_lock, ReferenceLockState::Unlocked);
    assert_eq!(scheduler.state(), PlaybackState::Running);

    let events = drain_events(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        GenlockEvent::ReferenceLockChanged {
            state: ReferenceLockState::Unlocked,
            ..
        }
    )));

    scheduler.stop_playback().unwrap();
}
