//! faceviewd - long-running face tracking daemon
//!
//! This daemon:
//! 1. Loads configuration (FACEVIEW_CONFIG file + FACEVIEW_* environment)
//! 2. Starts the configured camera and analysis worker
//! 3. Logs identity results and a periodic health line until Ctrl-C

use anyhow::Result;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use faceview_kernel::tracker::{ui_channel, DEFAULT_UI_QUEUE};
use faceview_kernel::{
    CameraSource, DisplayListSurface, EngineRegistry, FaceTracker, OverlayConfig,
    SyntheticCamera, UiEvent,
};

const HEALTH_INTERVAL: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(200);

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = OverlayConfig::load()?;
    let registry = EngineRegistry::with_builtin();
    log::info!(
        "faceviewd {} starting: camera {} ({}, {} @ {} fps), engine {} (available: {})",
        env!("CARGO_PKG_VERSION"),
        config.camera.url,
        config.camera.facing,
        config.camera.capture_size,
        config.camera.fps,
        config.engine,
        registry.list().join(", ")
    );

    let (surface, overlay) = DisplayListSurface::new(config.surface_size);
    let (dispatcher, events) = ui_channel(DEFAULT_UI_QUEUE);
    let dispatcher = Arc::new(dispatcher);
    let tracker = FaceTracker::from_config(&config, &registry, Box::new(surface), dispatcher.clone())?;

    let mut camera = SyntheticCamera::new(config.camera.clone())?;
    tracker.start_session(&mut camera)?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("faceviewd running; waiting for shutdown signal (Ctrl-C)...");
    let mut last_health = Instant::now();
    loop {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }

        for event in events.drain() {
            match event {
                UiEvent::PipelineStarted { preview, mirror } => {
                    overlay.resize(tracker.surface_size());
                    log::info!(
                        "preview {} (mirror {}), overlay {}",
                        preview,
                        mirror,
                        tracker.surface_size()
                    );
                }
                UiEvent::FacesDetected { .. } => {}
                UiEvent::Identity(outcome) => {
                    if let Some(face) = &outcome.enrolled {
                        log::info!("enrolled face {:?}", face.id);
                    }
                    if let Some((face, score)) = &outcome.matched {
                        log::info!("face {:?} matches enrolled face ({:.2})", face.id, score);
                    }
                    if let Some((face, score)) = &outcome.distinct {
                        log::info!("face {:?} is someone else ({:.2})", face.id, score);
                    }
                }
            }
        }

        if last_health.elapsed() >= HEALTH_INTERVAL {
            let metrics = tracker.metrics();
            let slot = tracker.slot_stats();
            log::info!(
                "health: capture {:.2} fps, analysis {:.2} fps, latency {} ms, published {}, dropped {}, ui dropped {}, enrolled {}, overlay posts {}",
                metrics.capture_rate.unwrap_or(0.0),
                metrics.analysis_rate.unwrap_or(0.0),
                metrics.last_analysis_ms,
                slot.published,
                slot.dropped,
                dispatcher.dropped(),
                tracker.is_enrolled(),
                overlay.posts()
            );
            last_health = Instant::now();
        }
    }

    log::info!("shutdown signal received, stopping camera and analysis...");
    camera.stop()?;
    tracker.stop()?;
    Ok(())
}
