//! Point-to-point session peer
//!
//! Runs one session from a TOML config, streams a synthetic payload to the
//! remote every frame interval and logs everything the session reports.
//!
//! ```text
//! peer [config.toml]
//! ```
//!
//! Without an argument the per-user config path is used. A missing config
//! file is created with defaults so it can be edited for the next run.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rtp_duo::{EventForwarder, SessionConfig, SessionEvent, SingleParticipantSession};

/// 20 ms of 8 kHz audio
const FRAME_INTERVAL: Duration = Duration::from_millis(20);
const SAMPLES_PER_FRAME: u32 = 160;
const STATS_INTERVAL: Duration = Duration::from_secs(5);

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config()?;
    tracing::info!(
        "Session {}: local {}:{}/{} -> remote {}:{}/{}",
        config.name,
        config.local.host,
        config.local.data_port,
        config.local.control_port,
        config.remote.host,
        config.remote.data_port,
        config.remote.control_port
    );

    let session = Arc::new(SingleParticipantSession::from_config(&config).context("Invalid session config")?);
    let (forwarder, events) = EventForwarder::new();
    session.add_data_listener(forwarder.clone());
    session.add_event_listener(forwarder.clone());
    session.init().context("Failed to start session")?;

    tracing::info!("Local participant: {}", session.local_participant());

    let running = Arc::new(AtomicBool::new(true));
    let running_for_signal = running.clone();
    ctrlc::set_handler(move || running_for_signal.store(false, Ordering::SeqCst))
        .context("Failed to install Ctrl+C handler")?;

    tracing::info!("Streaming - press Ctrl+C to stop");

    let mut timestamp: u32 = rand::random();
    let mut frame: u8 = 0;
    let mut next_frame = Instant::now();
    let mut last_stats_time = Instant::now();

    while running.load(Ordering::SeqCst) && session.is_running() {
        if Instant::now() >= next_frame {
            let payload = vec![frame; SAMPLES_PER_FRAME as usize];
            if !session.send_data(payload, timestamp, frame == 0) {
                tracing::debug!("Frame {} not sent", frame);
            }
            frame = frame.wrapping_add(1);
            timestamp = timestamp.wrapping_add(SAMPLES_PER_FRAME);
            next_frame += FRAME_INTERVAL;
        }

        for event in events.try_iter() {
            log_event(&event);
        }

        if last_stats_time.elapsed() >= STATS_INTERVAL {
            last_stats_time = Instant::now();
            let stats = session.stats();
            tracing::info!(
                "Stats: {} sent, {} received, {} collisions, remote {}",
                stats.data_packets_sent,
                stats.data_packets_delivered,
                stats.collisions_resolved,
                session.remote_participant()
            );
        }

        std::thread::sleep(Duration::from_millis(1));
    }

    session.terminate();
    for event in events.try_iter() {
        log_event(&event);
    }
    if forwarder.dropped() > 0 {
        tracing::warn!("{} events dropped", forwarder.dropped());
    }

    Ok(())
}

fn load_config() -> Result<SessionConfig> {
    let path = match std::env::args().nth(1) {
        Some(path) => PathBuf::from(path),
        None => match SessionConfig::default_path() {
            Some(path) => path,
            None => return Ok(SessionConfig::default()),
        },
    };

    if path.exists() {
        tracing::info!("Loading config from {}", path.display());
        return SessionConfig::load(&path).with_context(|| format!("Failed to load {}", path.display()));
    }

    let config = SessionConfig::default();
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    config.save(&path).with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::info!("Wrote default config to {}", path.display());
    Ok(config)
}

fn log_event(event: &SessionEvent) {
    let _span = tracing::info_span!("session", name = event.session()).entered();
    match event {
        SessionEvent::Data { packet, .. } => tracing::trace!("{}", packet),
        SessionEvent::JoinedFromData { participant, .. } => {
            tracing::info!("Peer joined: {}", participant)
        }
        SessionEvent::JoinedFromControl { participant, .. } => tracing::info!(
            "Peer joined ({}): {}",
            participant.cname().unwrap_or("no cname"),
            participant
        ),
        SessionEvent::ParticipantUpdated { participant, .. } => {
            tracing::info!("Peer updated: {}", participant)
        }
        SessionEvent::ParticipantLeft { participant, .. } => tracing::info!("Peer left: {}", participant),
        SessionEvent::CollisionResolved { old_id, new_id, .. } => {
            tracing::warn!("Identifier collision, {:#010x} -> {:#010x}", old_id, new_id)
        }
        SessionEvent::Terminated { cause: Some(cause), .. } => tracing::error!("Session failed: {}", cause),
        SessionEvent::Terminated { cause: None, .. } => tracing::info!("Session terminated"),
    }
}
