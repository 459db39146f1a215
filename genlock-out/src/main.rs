//! Genlock Output (genlock-out) - Main entry point
//!
//! Plays a colour-bar test pattern with a 1 kHz tone on one or more simulated
//! output devices sharing a house reference. With several devices the outputs
//! run as one synchronized playback group. Every engine event is printed to
//! stdout as one JSON object per line.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use genlock_common::events::{EventBus, GenlockEvent, PlaybackState};
use genlock_out::config::GenlockConfig;
use genlock_out::hardware::simulated::{HouseReference, SimulatedDevice};
use genlock_out::hardware::{DisplayModeId, OutputDevice};
use genlock_out::playback::{
    MultiDeviceGroup, PlaybackRequest, ProducerPump, Scheduler, SchedulerOptions, StartOutcome,
    TestPatternProducer,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for genlock-out
#[derive(Parser, Debug)]
#[command(name = "genlock-out")]
#[command(about = "Frame-accurate scheduled playback to genlocked outputs")]
#[command(version)]
struct Args {
    /// Config file (overrides GENLOCK_CONFIG and the default locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of simulated output devices
    #[arg(short, long, default_value = "1", env = "GENLOCK_DEVICES")]
    devices: usize,

    /// Display mode, e.g. 1080p25, 1080p29.97, pal, ntsc
    #[arg(short, long, default_value = "1080p25", env = "GENLOCK_MODE")]
    mode: String,

    /// Stop after this many seconds (runs until Ctrl+C otherwise)
    #[arg(long, env = "GENLOCK_RUN_SECONDS")]
    run_seconds: Option<u64>,

    /// End the stream after this many frames
    #[arg(long)]
    frames: Option<u64>,

    /// Video only
    #[arg(long)]
    no_audio: bool,

    /// Run every device on its own instead of as a playback group
    #[arg(long)]
    standalone: bool,

    /// Hold the house reference unlocked for this long after startup
    #[arg(long, default_value = "0")]
    lock_delay_ms: u64,
}

/// Either one group or independent schedulers
enum Playback {
    Group(Arc<MultiDeviceGroup>),
    Standalone(Vec<Scheduler>),
}

impl Playback {
    fn schedulers(&self) -> Vec<Scheduler> {
        match self {
            Playback::Group(group) => group.members().to_vec(),
            Playback::Standalone(schedulers) => schedulers.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (config, config_path) =
        GenlockConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // RUST_LOG wins over the configured level
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("genlock_out={0},genlock_common={0}", config.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!(
        "genlock-out {} ({}, {} build, {})",
        env!("CARGO_PKG_VERSION"),
        env!("GENLOCK_GIT_HASH"),
        env!("GENLOCK_BUILD_PROFILE"),
        env!("GENLOCK_BUILD_TIMESTAMP")
    );
    match &config_path {
        Some(path) => info!("Configuration: {}", path.display()),
        None => info!("Configuration: built-in defaults"),
    }

    let mode: DisplayModeId = args.mode.parse().map_err(|e: String| anyhow!(e))?;
    if args.devices == 0 {
        return Err(anyhow!("--devices must be at least 1"));
    }

    let events = EventBus::new(config.playback.event_capacity);
    let printer = tokio::spawn(print_events(events.subscribe()));

    let house = HouseReference::new(args.lock_delay_ms == 0);
    if args.lock_delay_ms > 0 {
        let house = house.clone();
        let delay = Duration::from_millis(args.lock_delay_ms);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            house.set_locked(true);
        });
    }

    let devices: Vec<Arc<SimulatedDevice>> = (0..args.devices)
        .map(|i| SimulatedDevice::new(format!("sim-{}", i), Some(house.clone())))
        .collect();

    let mut request = PlaybackRequest::new(mode).with_audio(!args.no_audio);
    request.audio_channels = config.playback.audio_channels;

    let playback = if args.standalone || args.devices == 1 {
        let options = SchedulerOptions::from_config(&config);
        Playback::Standalone(
            devices
                .iter()
                .map(|d| {
                    Scheduler::new(d.clone() as Arc<dyn OutputDevice>, options.clone(), events.clone())
                })
                .collect(),
        )
    } else {
        let outputs = devices
            .iter()
            .map(|d| d.clone() as Arc<dyn OutputDevice>)
            .collect();
        Playback::Group(Arc::new(
            MultiDeviceGroup::prepare(outputs, request, &config, events.clone())
                .context("Failed to prepare playback group")?,
        ))
    };

    let pumps: Vec<ProducerPump> = playback
        .schedulers()
        .iter()
        .map(|scheduler| {
            let mut producer = TestPatternProducer::new(mode.mode(), request.audio_channels);
            if let Some(frames) = args.frames {
                producer = producer.with_frame_limit(frames);
            }
            ProducerPump::start(producer, scheduler, request.enable_audio)
        })
        .collect();

    start(&playback, request).await?;

    let run_for = args.run_seconds.map(Duration::from_secs);
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, stopping"),
        _ = sleep_or_forever(run_for) => info!("Run time elapsed, stopping"),
        _ = all_idle(playback.schedulers()) => info!("All outputs finished"),
    }

    stop(&playback).await?;
    for pump in pumps {
        pump.stop();
    }

    for scheduler in playback.schedulers() {
        let snapshot = scheduler.snapshot();
        info!(
            "{}: {} scheduled, {} completed, {} late, {} dropped, {} flushed",
            snapshot.device,
            snapshot.counters.frames_scheduled,
            snapshot.counters.frames_completed,
            snapshot.counters.frames_late,
            snapshot.counters.frames_dropped,
            snapshot.counters.frames_flushed
        );
    }

    drop(playback);
    drop(events);
    printer.abort();
    info!("Shutdown complete");
    Ok(())
}

async fn start(playback: &Playback, request: PlaybackRequest) -> Result<()> {
    match playback {
        Playback::Group(group) => {
            let group = group.clone();
            let start_time = tokio::task::spawn_blocking(move || group.start_group())
                .await
                .context("Group start task failed")??;
            info!("Group running from {}", start_time);
        }
        Playback::Standalone(schedulers) => {
            let starts: Vec<_> = schedulers
                .iter()
                .cloned()
                .map(|s| tokio::task::spawn_blocking(move || s.start_playback(request)))
                .collect();
            for (scheduler, start) in schedulers.iter().zip(starts) {
                match start.await.context("Start task failed")? {
                    Ok(StartOutcome::Prerolling { reference_locked }) => {
                        info!("{}: prerolling (reference locked: {})", scheduler.label(), reference_locked)
                    }
                    Ok(StartOutcome::Cancelled) => warn!("{}: start cancelled", scheduler.label()),
                    Err(e) => error!("{}: start failed: {}", scheduler.label(), e),
                }
            }
        }
    }
    Ok(())
}

async fn stop(playback: &Playback) -> Result<()> {
    match playback {
        Playback::Group(group) => {
            let group = group.clone();
            tokio::task::spawn_blocking(move || group.stop_group())
                .await
                .context("Group stop task failed")??;
        }
        Playback::Standalone(schedulers) => {
            for scheduler in schedulers.iter().cloned() {
                let label = scheduler.label().to_string();
                let result = tokio::task::spawn_blocking(move || {
                    if scheduler.state() == PlaybackState::Error {
                        scheduler.disable()
                    } else {
                        scheduler.stop_playback()
                    }
                })
                .await
                .context("Stop task failed")?;
                if let Err(e) = result {
                    error!("{}: stop failed: {}", label, e);
                }
            }
        }
    }
    Ok(())
}

async fn sleep_or_forever(duration: Option<Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending::<()>().await,
    }
}

/// Resolves once every scheduler has returned to Idle after running
async fn all_idle(schedulers: Vec<Scheduler>) {
    let mut interval = tokio::time::interval(Duration::from_millis(100));
    loop {
        interval.tick().await;
        let states: Vec<PlaybackState> = schedulers.iter().map(|s| s.state()).collect();
        if states
            .iter()
            .all(|s| matches!(s, PlaybackState::Idle | PlaybackState::Error))
        {
            return;
        }
    }
}

async fn print_events(mut rx: broadcast::Receiver<GenlockEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("Failed to serialize event: {}", e),
            },
            Err(RecvError::Lagged(skipped)) => warn!("Event printer lagged, {} events skipped", skipped),
            Err(RecvError::Closed) => break,
        }
    }
}
