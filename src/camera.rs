//! Camera configuration and frame sources.
//!
//! The camera is a collaborator: it pushes frames into a `FrameIngress` on its
//! own thread and reports started/stopped through `CameraEvents`. The crate
//! ships `SyntheticCamera` for `stub://` URLs, which renders moving bright
//! faces on a noisy dark background and annotates them the way a device face
//! detector would.

use anyhow::{anyhow, bail, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::annotation::{GeometryGraph, FACE_GROUP, LEFT_EYE_POINT, MOUTH_POINT, RIGHT_EYE_POINT};
use crate::frame::{Orientation, PixelFormat, RawFrame};
use crate::geometry::{Point, Rect, Size};
use crate::tracker::FrameIngress;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraFacing {
    Front,
    Back,
}

impl CameraFacing {
    /// Usual sensor mounting for phones: front sensors need 270 degrees, back 90.
    pub fn default_orientation(self) -> Orientation {
        match self {
            CameraFacing::Front => Orientation::Clockwise270,
            CameraFacing::Back => Orientation::Clockwise90,
        }
    }
}

impl FromStr for CameraFacing {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "front" => Ok(CameraFacing::Front),
            "back" => Ok(CameraFacing::Back),
            other => Err(anyhow!("unknown camera facing '{}' (front|back)", other)),
        }
    }
}

impl fmt::Display for CameraFacing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraFacing::Front => f.write_str("front"),
            CameraFacing::Back => f.write_str("back"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CameraConfig {
    pub url: String,
    pub facing: CameraFacing,
    /// Sensor-native capture size, usually landscape.
    pub capture_size: Size,
    pub fps: u32,
    /// Quarter turns that make sensor frames upright.
    pub sensor_orientation: Orientation,
    /// Attach device face annotations to frames.
    pub annotate_faces: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            url: "stub://front_camera".to_string(),
            facing: CameraFacing::Front,
            capture_size: Size::new(640, 480),
            fps: 15,
            sensor_orientation: CameraFacing::Front.default_orientation(),
            annotate_faces: true,
        }
    }
}

impl CameraConfig {
    pub fn is_front(&self) -> bool {
        self.facing == CameraFacing::Front
    }

    /// Preview size in portrait: width and height swapped when capture is landscape.
    pub fn portrait_preview_size(&self) -> Size {
        if self.capture_size.is_landscape() {
            self.capture_size.transposed()
        } else {
            self.capture_size
        }
    }

    /// Surface size of the given width that keeps the preview aspect ratio.
    pub fn fit_to_width(&self, width: u32) -> Size {
        let preview = self.portrait_preview_size();
        if preview.width == 0 {
            return Size::new(width, 0);
        }
        let height = width as u64 * preview.height as u64 / preview.width as u64;
        Size::new(width, height as u32)
    }

    fn frame_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.fps.max(1) as u64)
    }
}

/// Camera lifecycle notifications.
pub trait CameraEvents: Send + Sync {
    fn on_camera_started(&self, config: &CameraConfig);
    fn on_camera_stopped(&self);
}

pub trait CameraSource: Send {
    fn config(&self) -> &CameraConfig;

    /// Begin delivering frames. Must not block on frame delivery.
    fn start(&mut self, ingress: FrameIngress, events: Arc<dyn CameraEvents>) -> Result<()>;

    /// Stop delivering frames. Idempotent.
    fn stop(&mut self) -> Result<()>;
}

// ----------------------------------------------------------------------------
// Synthetic camera (stub://)
// ----------------------------------------------------------------------------

const BACKGROUND_LUMA: std::ops::Range<u8> = 20..60;
const FACE_LUMA: u8 = 230;
const STRIPE_LUMA: [u8; 2] = [210, 250];
const FACE_SIZE: (i32, i32) = (96, 120);

/// Renders synthetic scenes on a background thread.
pub struct SyntheticCamera {
    config: CameraConfig,
    seed: u64,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SyntheticCamera {
    pub fn new(config: CameraConfig) -> Result<Self> {
        if !config.url.starts_with("stub://") {
            bail!(
                "camera url '{}' is not supported; only stub:// sources are built in",
                config.url
            );
        }
        if config.capture_size.is_empty() || config.fps == 0 {
            bail!("camera capture size and fps must be non-zero");
        }
        Ok(Self {
            config,
            seed: 0x5eed,
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        })
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

impl CameraSource for SyntheticCamera {
    fn config(&self) -> &CameraConfig {
        &self.config
    }

    fn start(&mut self, ingress: FrameIngress, events: Arc<dyn CameraEvents>) -> Result<()> {
        if self.handle.is_some() {
            bail!("camera {} already started", self.config.url);
        }
        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let config = self.config.clone();
        let seed = self.seed;
        let handle = thread::Builder::new()
            .name("faceview-camera".to_string())
            .spawn(move || {
                log::info!("camera {} started (synthetic)", config.url);
                events.on_camera_started(&config);
                let mut scene = SyntheticScene::new(config.clone(), seed);
                let epoch = Instant::now();
                let interval = config.frame_interval();
                while running.load(Ordering::SeqCst) {
                    let timestamp = epoch.elapsed().as_nanos() as u64;
                    match scene.next_frame(timestamp) {
                        Ok(frame) => ingress.on_frame_captured(frame, timestamp),
                        Err(e) => log::warn!("synthetic frame failed: {}", e),
                    }
                    thread::sleep(interval);
                }
                events.on_camera_stopped();
                log::info!("camera {} stopped", config.url);
            })?;
        self.handle = Some(handle);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| anyhow!("camera thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for SyntheticCamera {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("camera stop on drop failed: {}", e);
        }
    }
}

/// Frame generator behind `SyntheticCamera`, usable directly in tests.
///
/// Two faces drift horizontally: a uniformly bright one and a striped one,
/// so histogram embeddings tell them apart.
pub struct SyntheticScene {
    config: CameraConfig,
    rng: StdRng,
    frame_index: u64,
}

impl SyntheticScene {
    pub fn new(config: CameraConfig, seed: u64) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
            frame_index: 0,
        }
    }

    /// Face rectangles of the next frame, in sensor space.
    pub fn face_rects(&self) -> [Rect; 2] {
        let Size { width, height } = self.config.capture_size;
        let (fw, fh) = FACE_SIZE;
        let (w, h) = (width as i32, height as i32);
        let half = (w / 2 - fw).max(1);
        let drift = |speed: u64| (self.frame_index * speed % half as u64) as i32;
        [
            Rect::new(drift(4).min(w - fw).max(0), (h / 4).min(h - fh).max(0), fw, fh),
            Rect::new(
                (w / 2 + drift(3)).min(w - fw).max(0),
                (h / 3).min(h - fh).max(0),
                fw,
                fh,
            ),
        ]
    }

    pub fn next_frame(&mut self, timestamp: u64) -> Result<RawFrame> {
        let Size { width, height } = self.config.capture_size;
        let faces = self.face_rects();
        let luma_len = (width * height) as usize;
        let mut data = Vec::with_capacity(PixelFormat::Nv21.frame_len(width, height)?);
        for _ in 0..luma_len {
            data.push(self.rng.gen_range(BACKGROUND_LUMA));
        }
        for (index, rect) in faces.iter().enumerate() {
            for y in rect.y..rect.bottom().min(height as i32) {
                for x in rect.x..rect.right().min(width as i32) {
                    let luma = if index == 0 {
                        FACE_LUMA
                    } else {
                        STRIPE_LUMA[(x % 2) as usize]
                    };
                    data[(y as u32 * width + x as u32) as usize] = luma;
                }
            }
        }
        data.resize(luma_len + luma_len / 2, 128);

        let orientation = self.config.sensor_orientation;
        let mut frame = RawFrame::new(data, width, height, PixelFormat::Nv21, timestamp)?
            .with_orientation(orientation)
            .with_degree(orientation.degrees());
        if self.config.annotate_faces {
            frame = frame.with_geometry(annotate(&faces));
        }
        self.frame_index += 1;
        Ok(frame)
    }
}

fn annotate(faces: &[Rect]) -> GeometryGraph {
    let mut group = GeometryGraph::new(FACE_GROUP);
    for (index, rect) in faces.iter().enumerate() {
        let at = |fx: i32, fy: i32| {
            vec![Point::new(
                rect.x + rect.width * fx / 10,
                rect.y + rect.height * fy / 10,
            )]
        };
        let mut node = GeometryGraph::new("face.outline")
            .with_points(rect.corners().to_vec())
            .with_child(GeometryGraph::new(MOUTH_POINT).with_points(at(5, 7)))
            .with_child(GeometryGraph::new(LEFT_EYE_POINT).with_points(at(3, 3)))
            .with_child(GeometryGraph::new(RIGHT_EYE_POINT).with_points(at(7, 3)));
        node.id = Some(index as i64);
        node.score = Some(95);
        group = group.with_child(node);
    }
    GeometryGraph::new("device").with_child(group)
}
