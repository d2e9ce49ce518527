//! demo - time-bounded synthetic run that writes overlay artifacts

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use faceview_kernel::identity::fingerprint;
use faceview_kernel::tracker::ui_channel;
use faceview_kernel::{
    CameraFacing, CameraSource, DisplayListSurface, EngineRegistry, FaceTracker, OverlayConfig,
    SyntheticCamera, UiEvent,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Run time in seconds.
    #[arg(long, default_value_t = 3)]
    seconds: u64,
    /// Synthetic camera frame rate.
    #[arg(long, default_value_t = 15)]
    fps: u32,
    /// Face engine name.
    #[arg(long, default_value = "stub")]
    engine: String,
    /// Camera facing (front|back).
    #[arg(long, default_value = "front")]
    facing: CameraFacing,
    /// Let the engine read device face annotations.
    #[arg(long)]
    use_geometry: bool,
    /// Output directory.
    #[arg(long, default_value = "demo_out")]
    out: String,
    /// Seed for the synthetic scene.
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if args.fps == 0 {
        return Err(anyhow!("fps must be >= 1"));
    }
    let out_dir = PathBuf::from(&args.out);
    fs::create_dir_all(&out_dir)
        .with_context(|| format!("creating output directory {}", out_dir.display()))?;

    let mut config = OverlayConfig::load()?;
    config.engine = args.engine.clone();
    config.camera.fps = args.fps;
    config.camera.facing = args.facing;
    config.camera.sensor_orientation = args.facing.default_orientation();
    config.flags.use_geometry_graph = args.use_geometry;

    let registry = EngineRegistry::with_builtin();
    let (surface, overlay) = DisplayListSurface::new(config.surface_size);
    let (dispatcher, events) = ui_channel(256);
    let tracker = FaceTracker::from_config(&config, &registry, Box::new(surface), Arc::new(dispatcher))?;

    let mut camera = SyntheticCamera::new(config.camera.clone())?;
    if let Some(seed) = args.seed {
        camera = camera.with_seed(seed);
    }
    tracker.start_session(&mut camera)?;

    let mut snapshot = None;
    let mut faces_seen = 0u64;
    let mut matched = 0u64;
    let mut distinct = 0u64;
    let mut enrolled = None;
    let deadline = Instant::now() + Duration::from_secs(args.seconds);
    while Instant::now() < deadline {
        let Some(event) = events.recv_timeout(Duration::from_millis(100)) else {
            continue;
        };
        match event {
            UiEvent::PipelineStarted { .. } => overlay.resize(tracker.surface_size()),
            UiEvent::FacesDetected {
                faces, snapshot: image, ..
            } => {
                faces_seen += faces as u64;
                if image.is_some() {
                    snapshot = image;
                }
            }
            UiEvent::Identity(outcome) => {
                if let Some(face) = &outcome.enrolled {
                    enrolled = Some(fingerprint(face));
                }
                matched += outcome.matched.is_some() as u64;
                distinct += outcome.distinct.is_some() as u64;
            }
        }
    }

    camera.stop()?;
    tracker.stop()?;

    let overlay_path = out_dir.join("overlay.json");
    fs::write(&overlay_path, serde_json::to_string_pretty(&overlay.latest())?)
        .with_context(|| format!("writing {}", overlay_path.display()))?;

    if let Some(image) = &snapshot {
        let face_path = out_dir.join("face.jpg");
        image
            .save(&face_path)
            .with_context(|| format!("writing {}", face_path.display()))?;
        log::info!("face snapshot written to {}", face_path.display());
    }

    let metrics = tracker.metrics();
    let slot = tracker.slot_stats();
    let summary = serde_json::json!({
        "seconds": args.seconds,
        "engine": config.engine,
        "facing": config.camera.facing,
        "capture_rate": metrics.capture_rate,
        "analysis_rate": metrics.analysis_rate,
        "last_analysis_ms": metrics.last_analysis_ms,
        "frames_published": slot.published,
        "frames_analyzed": slot.taken,
        "frames_dropped": slot.dropped,
        "faces_seen": faces_seen,
        "enrolled_fingerprint": enrolled,
        "matched_events": matched,
        "distinct_events": distinct,
        "overlay_posts": overlay.posts(),
    });
    let summary_path = out_dir.join("summary.json");
    fs::write(&summary_path, serde_json::to_string_pretty(&summary)?)
        .with_context(|| format!("writing {}", summary_path.display()))?;

    println!("demo complete: {}", out_dir.display());
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
