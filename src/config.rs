use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::camera::{CameraConfig, CameraFacing};
use crate::geometry::Size;
use crate::overlay::{LabelPosition, LicenseStatus};
use crate::pipeline::AnalysisFlags;
use crate::tracker::TrackerOptions;

const DEFAULT_CAMERA_URL: &str = "stub://front_camera";
const DEFAULT_CAMERA_FPS: u32 = 15;
const DEFAULT_CAPTURE_WIDTH: u32 = 640;
const DEFAULT_CAPTURE_HEIGHT: u32 = 480;
const DEFAULT_ENGINE: &str = "stub";
const DEFAULT_MATCH_THRESHOLD: f32 = 0.7;
const DEFAULT_MATCH_INTERVAL_MS: u64 = 500;
const DEFAULT_METRICS_WINDOW: usize = 10;
const DEFAULT_SURFACE_WIDTH: u32 = 480;
const DEFAULT_SURFACE_HEIGHT: u32 = 640;

#[derive(Debug, Deserialize, Default)]
struct OverlayConfigFile {
    camera: Option<CameraConfigFile>,
    analysis: Option<AnalysisConfigFile>,
    identity: Option<IdentityConfigFile>,
    overlay: Option<OverlaySurfaceFile>,
    metrics: Option<MetricsConfigFile>,
    license: Option<LicenseConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    url: Option<String>,
    facing: Option<CameraFacing>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
    annotate_faces: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct AnalysisConfigFile {
    engine: Option<String>,
    adjust_orientation: Option<bool>,
    adjust_degree: Option<bool>,
    use_geometry_graph: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct IdentityConfigFile {
    enabled: Option<bool>,
    threshold: Option<f32>,
    interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct OverlaySurfaceFile {
    width: Option<u32>,
    height: Option<u32>,
    label_position: Option<LabelPosition>,
}

#[derive(Debug, Deserialize, Default)]
struct MetricsConfigFile {
    window: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct LicenseConfigFile {
    status: Option<String>,
    expires: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OverlayConfig {
    pub camera: CameraConfig,
    pub engine: String,
    pub flags: AnalysisFlags,
    pub identity: IdentitySettings,
    pub surface_size: Size,
    pub label_position: LabelPosition,
    pub metrics_window: usize,
    pub license: LicenseStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdentitySettings {
    pub enabled: bool,
    pub threshold: f32,
    pub interval: Duration,
}

impl OverlayConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("FACEVIEW_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: OverlayConfigFile) -> Self {
        let camera_file = file.camera.unwrap_or_default();
        let facing = camera_file.facing.unwrap_or(CameraFacing::Front);
        let camera = CameraConfig {
            url: camera_file
                .url
                .unwrap_or_else(|| DEFAULT_CAMERA_URL.to_string()),
            facing,
            capture_size: Size::new(
                camera_file.width.unwrap_or(DEFAULT_CAPTURE_WIDTH),
                camera_file.height.unwrap_or(DEFAULT_CAPTURE_HEIGHT),
            ),
            fps: camera_file.fps.unwrap_or(DEFAULT_CAMERA_FPS),
            sensor_orientation: facing.default_orientation(),
            annotate_faces: camera_file.annotate_faces.unwrap_or(true),
        };

        let analysis = file.analysis.unwrap_or_default();
        let defaults = AnalysisFlags::default();
        let flags = AnalysisFlags {
            adjust_orientation: analysis
                .adjust_orientation
                .unwrap_or(defaults.adjust_orientation),
            adjust_degree: analysis.adjust_degree.unwrap_or(defaults.adjust_degree),
            use_geometry_graph: analysis
                .use_geometry_graph
                .unwrap_or(defaults.use_geometry_graph),
        };

        let identity_file = file.identity.unwrap_or_default();
        let identity = IdentitySettings {
            enabled: identity_file.enabled.unwrap_or(true),
            threshold: identity_file.threshold.unwrap_or(DEFAULT_MATCH_THRESHOLD),
            interval: Duration::from_millis(
                identity_file
                    .interval_ms
                    .unwrap_or(DEFAULT_MATCH_INTERVAL_MS),
            ),
        };

        let overlay = file.overlay.unwrap_or_default();
        let license = file
            .license
            .map(|license| LicenseStatus {
                state: license
                    .status
                    .unwrap_or_else(|| LicenseStatus::default().state),
                expires: license.expires,
            })
            .unwrap_or_default();

        Self {
            camera,
            engine: analysis
                .engine
                .unwrap_or_else(|| DEFAULT_ENGINE.to_string()),
            flags,
            identity,
            surface_size: Size::new(
                overlay.width.unwrap_or(DEFAULT_SURFACE_WIDTH),
                overlay.height.unwrap_or(DEFAULT_SURFACE_HEIGHT),
            ),
            label_position: overlay.label_position.unwrap_or(LabelPosition::Top),
            metrics_window: file
                .metrics
                .and_then(|metrics| metrics.window)
                .unwrap_or(DEFAULT_METRICS_WINDOW),
            license,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("FACEVIEW_CAMERA_URL") {
            if !url.trim().is_empty() {
                self.camera.url = url;
            }
        }
        if let Ok(facing) = std::env::var("FACEVIEW_CAMERA_FACING") {
            if !facing.trim().is_empty() {
                self.camera.facing = facing.parse()?;
                self.camera.sensor_orientation = self.camera.facing.default_orientation();
            }
        }
        if let Ok(size) = std::env::var("FACEVIEW_CAPTURE_SIZE") {
            if !size.trim().is_empty() {
                self.camera.capture_size = Size::parse(&size)
                    .ok_or_else(|| anyhow!("FACEVIEW_CAPTURE_SIZE must be WxH, got '{}'", size))?;
            }
        }
        if let Ok(engine) = std::env::var("FACEVIEW_ENGINE") {
            if !engine.trim().is_empty() {
                self.engine = engine.trim().to_string();
            }
        }
        if let Ok(threshold) = std::env::var("FACEVIEW_MATCH_THRESHOLD") {
            self.identity.threshold = threshold
                .trim()
                .parse()
                .map_err(|_| anyhow!("FACEVIEW_MATCH_THRESHOLD must be a number"))?;
        }
        if let Ok(flag) = std::env::var("FACEVIEW_USE_GEOMETRY") {
            self.flags.use_geometry_graph = parse_bool(&flag)
                .ok_or_else(|| anyhow!("FACEVIEW_USE_GEOMETRY must be true or false"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.camera.capture_size.is_empty() {
            return Err(anyhow!("camera capture size must be non-zero"));
        }
        if self.camera.fps == 0 {
            return Err(anyhow!("camera fps must be greater than zero"));
        }
        if self.surface_size.is_empty() {
            return Err(anyhow!("overlay surface size must be non-zero"));
        }
        if self.metrics_window < 2 {
            return Err(anyhow!("metrics window must hold at least 2 samples"));
        }
        if !(0.0..=1.0).contains(&self.identity.threshold) {
            return Err(anyhow!(
                "match threshold must be within [0, 1], got {}",
                self.identity.threshold
            ));
        }
        Ok(())
    }

    pub fn tracker_options(&self) -> TrackerOptions {
        TrackerOptions {
            flags: self.flags,
            identity: self
                .identity
                .enabled
                .then_some((self.identity.threshold, self.identity.interval)),
            metrics_window: self.metrics_window,
            label_position: self.label_position,
            surface_size: self.surface_size,
        }
    }
}

fn read_config_file(path: &Path) -> Result<OverlayConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
