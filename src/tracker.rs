//! Face tracking session: camera -> frame slot -> analysis worker -> pipeline.
//!
//! The camera thread only records its capture rate and publishes into the
//! slot. One worker thread takes frames and runs the analysis pipeline. The
//! worker hooks keep the slot in step with the lifecycle: starting reopens
//! it, pausing drops the pending frame, stopping tears it down so a blocked
//! take returns at once.

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::camera::{CameraConfig, CameraEvents, CameraSource};
use crate::config::OverlayConfig;
use crate::engine::{EngineCapability, EngineRegistry, FaceEngine, SharedEngine};
use crate::face::RawSpaceFeatures;
use crate::frame::{AnalyzedFrame, RawFrame};
use crate::geometry::Size;
use crate::identity::{IdentityMatcher, MatchOutcome};
use crate::metrics::{now_millis, MetricsSnapshot, PipelineMetrics};
use crate::overlay::{
    AmbientLight, LabelPosition, LicenseStatus, OverlayRenderer, RenderSurface, SurfaceSize,
};
use crate::pipeline::{AnalysisFlags, AnalysisPipeline, PipelineListener, SessionStatus};
use crate::slot::{FrameSlot, SlotStats, SlotTake};
use crate::worker::{Step, Worker, WorkerControl, WorkerHooks, WorkerState};

/// Producer side handed to the camera.
#[derive(Clone)]
pub struct FrameIngress {
    slot: Arc<FrameSlot>,
    metrics: Arc<PipelineMetrics>,
}

impl FrameIngress {
    pub fn new(slot: Arc<FrameSlot>, metrics: Arc<PipelineMetrics>) -> Self {
        Self { slot, metrics }
    }

    /// Camera callback. Never waits on analysis.
    pub fn on_frame_captured(&self, frame: RawFrame, timestamp: u64) {
        self.metrics.record_capture(timestamp, now_millis());
        self.slot.publish(frame, timestamp);
    }
}

struct SlotHooks {
    slot: Arc<FrameSlot>,
}

impl WorkerHooks for SlotHooks {
    fn on_starting(&self) {
        self.slot.reopen();
    }

    fn on_pausing(&self) {
        self.slot.discard_pending();
    }

    fn on_stopping(&self) {
        self.slot.teardown();
    }
}

#[derive(Clone, Debug)]
pub struct TrackerOptions {
    pub flags: AnalysisFlags,
    /// `None` disables identity matching.
    pub identity: Option<(f32, Duration)>,
    pub metrics_window: usize,
    pub label_position: LabelPosition,
    pub surface_size: Size,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            flags: AnalysisFlags::default(),
            identity: Some((
                crate::identity::DEFAULT_THRESHOLD,
                crate::identity::DEFAULT_INTERVAL,
            )),
            metrics_window: crate::metrics::DEFAULT_WINDOW,
            label_position: LabelPosition::Top,
            surface_size: Size::new(480, 640),
        }
    }
}

pub struct FaceTracker {
    slot: Arc<FrameSlot>,
    metrics: Arc<PipelineMetrics>,
    worker: Worker,
    pipeline: Arc<Mutex<AnalysisPipeline>>,
    surface_size: SurfaceSize,
    status: SessionStatus,
}

impl FaceTracker {
    pub fn new(
        engine: SharedEngine,
        surface: Box<dyn RenderSurface>,
        listener: Arc<dyn PipelineListener>,
        options: TrackerOptions,
    ) -> Result<Arc<Self>> {
        let slot = Arc::new(FrameSlot::new());
        let metrics = Arc::new(PipelineMetrics::new(options.metrics_window));
        let surface_size = SurfaceSize::new(options.surface_size);
        let status = SessionStatus::default();

        let renderer = OverlayRenderer::new(surface, surface_size.clone(), false)
            .with_label_position(options.label_position);
        let mut pipeline = AnalysisPipeline::new(engine, options.flags, renderer, metrics.clone())
            .with_listener(listener)
            .with_status(status.clone());
        if let Some((threshold, interval)) = options.identity {
            pipeline = pipeline.with_identity(
                IdentityMatcher::new(threshold, interval).context("identity matcher")?,
            );
        }

        let hooks = Arc::new(SlotHooks { slot: slot.clone() });
        Ok(Arc::new(Self {
            worker: Worker::new("faceview-analysis", hooks),
            slot,
            metrics,
            pipeline: Arc::new(Mutex::new(pipeline)),
            surface_size,
            status,
        }))
    }

    /// Build a tracker for `config`, with the configured engine warmed up.
    /// Identity matching is switched off when the engine cannot compare faces.
    pub fn from_config(
        config: &OverlayConfig,
        registry: &EngineRegistry,
        surface: Box<dyn RenderSurface>,
        listener: Arc<dyn PipelineListener>,
    ) -> Result<Arc<Self>> {
        let engine = registry.prepare(&config.engine)?;
        let mut options = config.tracker_options();
        fit_options_to_engine(
            &*engine.lock().map_err(|_| anyhow!("engine lock poisoned"))?,
            &mut options,
        );
        let tracker = Self::new(engine, surface, listener, options)?;
        tracker.set_license(config.license.clone());
        Ok(tracker)
    }

    fn pipeline(&self) -> MutexGuard<'_, AnalysisPipeline> {
        self.pipeline.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn ingress(&self) -> FrameIngress {
        FrameIngress::new(self.slot.clone(), self.metrics.clone())
    }

    /// Start `camera`; the worker starts when the camera reports in.
    pub fn start_session(self: &Arc<Self>, camera: &mut dyn CameraSource) -> Result<()> {
        log::info!("starting session on {}", camera.config().url);
        camera
            .start(self.ingress(), Arc::new(TrackerEvents(self.clone())))
            .with_context(|| format!("starting camera {}", camera.config().url))
    }

    /// Camera opened: prepare the pipeline, fit the overlay to the preview
    /// aspect and start analysis.
    pub fn on_camera_started(&self, config: &CameraConfig) -> Result<()> {
        let current = self.surface_size.get();
        if current.width > 0 {
            self.surface_size.set(config.fit_to_width(current.width));
        }
        self.pipeline().on_started(config);

        let slot = self.slot.clone();
        let pipeline = self.pipeline.clone();
        self.worker.start(move |control: &WorkerControl| {
            let (frame, timestamp) = match slot.take_blocking() {
                SlotTake::Closed => return Ok(Step::Exit),
                SlotTake::Frame { frame, timestamp } => (frame, timestamp),
            };
            if control.is_paused() {
                log::trace!("paused; dropping frame {}", timestamp);
                return Ok(Step::Continue);
            }
            let report = pipeline
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .process(frame)
                .with_context(|| format!("analyzing frame {}", timestamp))?;
            log::debug!(
                "frame {}: {} faces ({} device) in {} ms",
                report.timestamp,
                report.faces,
                report.device_faces,
                report.latency_ms
            );
            Ok(Step::Continue)
        })
    }

    pub fn on_camera_stopped(&self) -> Result<()> {
        self.stop()
    }

    pub fn stop(&self) -> Result<()> {
        self.worker.stop()
    }

    pub fn pause(&self) -> Result<()> {
        self.worker.pause()
    }

    pub fn resume(&self) -> Result<()> {
        self.worker.resume()
    }

    pub fn state(&self) -> WorkerState {
        self.worker.state()
    }

    /// Overlay surface size changed (UI layout).
    pub fn set_surface_size(&self, size: Size) {
        self.surface_size.set(size);
    }

    pub fn surface_size(&self) -> Size {
        self.surface_size.get()
    }

    pub fn set_ambient_light(&self, light: AmbientLight) {
        self.status.set_ambient_light(light);
    }

    pub fn set_license(&self, license: LicenseStatus) {
        self.status.set_license(license);
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn slot_stats(&self) -> SlotStats {
        self.slot.stats()
    }

    pub fn is_enrolled(&self) -> bool {
        self.pipeline()
            .identity()
            .is_some_and(|matcher| matcher.enrolled().is_some())
    }
}

struct TrackerEvents(Arc<FaceTracker>);

impl CameraEvents for TrackerEvents {
    fn on_camera_started(&self, config: &CameraConfig) {
        if let Err(e) = self.0.on_camera_started(config) {
            log::error!("analysis did not start: {:#}", e);
        }
    }

    fn on_camera_stopped(&self) {
        if let Err(e) = self.0.on_camera_stopped() {
            log::error!("analysis did not stop cleanly: {:#}", e);
        }
    }
}

// ----------------------------------------------------------------------------
// UI dispatch
// ----------------------------------------------------------------------------

pub const DEFAULT_UI_QUEUE: usize = 16;

#[derive(Debug)]
pub enum UiEvent {
    PipelineStarted {
        preview: Size,
        mirror: bool,
    },
    FacesDetected {
        timestamp: u64,
        faces: usize,
        /// Crop of the first face.
        snapshot: Option<RgbImage>,
    },
    Identity(MatchOutcome),
}

/// Pipeline listener that forwards to the UI thread without blocking.
pub struct UiDispatcher {
    tx: SyncSender<UiEvent>,
    dropped: AtomicU64,
}

/// UI-side receiver.
pub struct UiEvents {
    rx: Receiver<UiEvent>,
}

/// Bounded channel between the analysis thread and the UI.
pub fn ui_channel(capacity: usize) -> (UiDispatcher, UiEvents) {
    let (tx, rx) = mpsc::sync_channel(capacity.max(1));
    (
        UiDispatcher {
            tx,
            dropped: AtomicU64::new(0),
        },
        UiEvents { rx },
    )
}

impl UiDispatcher {
    fn send(&self, event: UiEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                log::debug!("ui queue full; event dropped");
            }
            Err(TrySendError::Disconnected(_)) => {
                log::debug!("ui receiver gone; event dropped");
            }
        }
    }

    /// Events dropped because the UI was behind.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl PipelineListener for UiDispatcher {
    fn on_pipeline_started(&self, config: &CameraConfig) {
        self.send(UiEvent::PipelineStarted {
            preview: config.portrait_preview_size(),
            mirror: config.is_front(),
        });
    }

    fn on_faces_detected(&self, frame: &Arc<AnalyzedFrame>, faces: &RawSpaceFeatures) {
        let snapshot = faces.first().and_then(|face| frame.crop(face.rectangle));
        self.send(UiEvent::FacesDetected {
            timestamp: frame.timestamp(),
            faces: faces.len(),
            snapshot,
        });
    }

    fn on_identity(&self, outcome: &MatchOutcome) {
        self.send(UiEvent::Identity(outcome.clone()));
    }
}

impl UiEvents {
    pub fn recv_timeout(&self, timeout: Duration) -> Option<UiEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Everything queued right now.
    pub fn drain(&self) -> Vec<UiEvent> {
        self.rx.try_iter().collect()
    }
}

/// Turn off or force what `engine` cannot honor as configured.
fn fit_options_to_engine(engine: &dyn FaceEngine, options: &mut TrackerOptions) {
    let hints_only = !engine.supports(EngineCapability::PixelDetection)
        && engine.supports(EngineCapability::DeviceHints);
    if hints_only && !options.flags.use_geometry_graph {
        log::warn!(
            "engine '{}' only reads device geometry; passing annotations through",
            engine.name()
        );
        options.flags.use_geometry_graph = true;
    }
    if options.identity.is_some() && !engine.supports(EngineCapability::Comparison) {
        log::warn!(
            "engine '{}' cannot compare faces; identity matching disabled",
            engine.name()
        );
        options.identity = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraFacing, SyntheticScene};
    use crate::engine::{GeometryEngine, StubEngine};
    use crate::overlay::DisplayListSurface;
    use std::time::Instant;

    fn tracker() -> (Arc<FaceTracker>, UiEvents) {
        let (dispatcher, events) = ui_channel(64);
        let (surface, _) = DisplayListSurface::new(Size::new(480, 640));
        let tracker = FaceTracker::new(
            Arc::new(Mutex::new(StubEngine::new())),
            Box::new(surface),
            Arc::new(dispatcher),
            TrackerOptions::default(),
        )
        .unwrap();
        (tracker, events)
    }

    fn wait_for<F: Fn() -> bool>(f: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if f() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn frames_flow_to_ui_events() -> Result<()> {
        let (tracker, events) = tracker();
        let config = CameraConfig {
            facing: CameraFacing::Back,
            ..CameraConfig::default()
        };
        tracker.on_camera_started(&config)?;
        assert_eq!(tracker.state(), WorkerState::Running);
        assert_eq!(tracker.surface_size(), Size::new(480, 640));

        let mut scene = SyntheticScene::new(config, 9);
        tracker.ingress().on_frame_captured(scene.next_frame(1)?, 1);
        assert!(wait_for(|| tracker.is_enrolled()));

        tracker.stop()?;
        assert_eq!(tracker.state(), WorkerState::Stopped);

        let received = events.drain();
        assert!(matches!(
            received[0],
            UiEvent::PipelineStarted { mirror: false, .. }
        ));
        assert!(received.iter().any(|e| matches!(
            e,
            UiEvent::FacesDetected { faces: 2, snapshot: Some(img), .. } if img.dimensions() == (96, 120)
        )));
        assert!(received.iter().any(|e| matches!(e, UiEvent::Identity(o) if o.enrolled.is_some())));
        Ok(())
    }

    #[test]
    fn paused_worker_skips_frames() -> Result<()> {
        let (tracker, events) = tracker();
        tracker.on_camera_started(&CameraConfig::default())?;
        tracker.pause()?;
        let mut scene = SyntheticScene::new(CameraConfig::default(), 2);
        tracker.ingress().on_frame_captured(scene.next_frame(1)?, 1);
        assert!(wait_for(|| tracker.slot_stats().taken >= 1));
        std::thread::sleep(Duration::from_millis(50));
        assert!(!tracker.is_enrolled());

        tracker.resume()?;
        tracker.ingress().on_frame_captured(scene.next_frame(2)?, 2);
        assert!(wait_for(|| tracker.is_enrolled()));
        tracker.stop()?;
        drop(events);
        Ok(())
    }

    #[test]
    fn full_ui_queue_drops_events() {
        let (dispatcher, events) = ui_channel(1);
        let config = CameraConfig::default();
        dispatcher.on_pipeline_started(&config);
        dispatcher.on_pipeline_started(&config);
        assert_eq!(dispatcher.dropped(), 1);
        assert_eq!(events.drain().len(), 1);
    }

    #[test]
    fn options_follow_engine_capabilities() {
        let mut options = TrackerOptions::default();
        assert!(!options.flags.use_geometry_graph);
        fit_options_to_engine(&GeometryEngine::new(), &mut options);
        assert!(options.flags.use_geometry_graph);
        assert!(options.identity.is_none());

        let mut options = TrackerOptions::default();
        fit_options_to_engine(&StubEngine::new(), &mut options);
        assert_eq!(options.flags, AnalysisFlags::default());
        assert!(options.identity.is_some());
    }
}
