//! Face View Kernel
//!
//! Live face tracking for a camera preview: frames come in on the camera
//! thread, one analysis thread runs a face engine over the latest frame, and
//! the results are drawn as an overlay on a display surface.
//!
//! # Architecture
//!
//! The kernel holds a few properties by construction:
//!
//! 1. **Capture never waits**: the camera publishes into a single-slot
//!    exchange that overwrites an unclaimed frame instead of queueing.
//! 2. **Bounded staleness**: at most one frame is pending; analysis always
//!    sees the newest one.
//! 3. **Typed coordinate spaces**: raw analysis faces and preview faces are
//!    different types, so a face cannot be drawn in the wrong space.
//! 4. **Signal-driven shutdown**: stopping tears down the slot, which wakes
//!    a blocked analysis thread; no timeouts are involved.
//!
//! # Module Structure
//!
//! - `slot`: latest-frame exchange (`FrameSlot`)
//! - `worker`: Stopped/Running/Paused analysis thread (`Worker`)
//! - `pipeline`: per-frame analysis (`AnalysisPipeline`)
//! - `overlay`: display transforms and drawing (`OverlayRenderer`)
//! - `identity`: enrolled-face matching (`IdentityMatcher`)
//! - `metrics`: throughput windows (`RateWindow`, `PipelineMetrics`)
//! - `engine`: face engine trait, registry and built-in engines
//! - `camera`, `tracker`, `config`: session wiring

pub mod annotation;
pub mod camera;
pub mod config;
pub mod engine;
pub mod face;
pub mod frame;
pub mod geometry;
pub mod identity;
pub mod metrics;
pub mod overlay;
pub mod pipeline;
pub mod slot;
pub mod tracker;
pub mod worker;

pub use annotation::{parse_face_features, GeometryGraph};
pub use camera::{CameraConfig, CameraEvents, CameraFacing, CameraSource, SyntheticCamera};
pub use config::OverlayConfig;
pub use engine::{EngineCapability, EngineRegistry, FaceEngine, SharedEngine, StubEngine};
pub use face::{FaceFeature, Landmarks, PreviewSpaceFeatures, RawSpaceFeatures};
pub use frame::{AnalyzedFrame, FrameView, Orientation, PixelFormat, RawFrame};
pub use geometry::{Point, Polygon, Rect, Size};
pub use identity::{IdentityMatcher, MatchOutcome};
pub use metrics::{MetricsSnapshot, PipelineMetrics, RateWindow};
pub use overlay::{DisplayListSurface, DisplayTransform, OverlayRenderer, RenderSurface};
pub use pipeline::{AnalysisFlags, AnalysisPipeline, FrameReport, PipelineListener};
pub use slot::{FrameSlot, SlotTake};
pub use tracker::{ui_channel, FaceTracker, FrameIngress, TrackerOptions, UiEvent};
pub use worker::{Worker, WorkerHooks, WorkerState};
