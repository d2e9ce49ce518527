//! Per-frame analysis: orientation handling, engine, preview mapping,
//! RGB conversion, overlay and callbacks.

use anyhow::{anyhow, Result};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use crate::annotation::parse_face_features;
use crate::camera::CameraConfig;
use crate::engine::{FaceEngine, SharedEngine};
use crate::face::{PreviewSpaceFeatures, RawSpaceFeatures};
use crate::frame::{AnalyzedFrame, RawFrame};
use crate::geometry::Size;
use crate::identity::{IdentityMatcher, MatchOutcome};
use crate::metrics::{now_millis, PipelineMetrics};
use crate::overlay::{AmbientLight, Diagnostics, LicenseStatus, OverlayFrame, OverlayRenderer};

/// Analysis toggles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AnalysisFlags {
    /// When **false**, frames carrying an orientation hint are rotated
    /// upright before analysis. When true, the hint is left alone and only
    /// the degree annotation steers preview mapping. The inverted sense is
    /// kept for compatibility with existing configurations.
    pub adjust_orientation: bool,
    /// When false, the rotation-degree annotation is dropped before analysis.
    pub adjust_degree: bool,
    /// When false, the device geometry annotation is hidden from the engine.
    pub use_geometry_graph: bool,
}

impl Default for AnalysisFlags {
    fn default() -> Self {
        Self {
            adjust_orientation: true,
            adjust_degree: true,
            use_geometry_graph: false,
        }
    }
}

/// Application callbacks, invoked on the analysis thread. Must not block.
pub trait PipelineListener: Send + Sync {
    fn on_pipeline_started(&self, _config: &CameraConfig) {}

    fn on_faces_detected(&self, _frame: &Arc<AnalyzedFrame>, _faces: &RawSpaceFeatures) {}

    fn on_identity(&self, _outcome: &MatchOutcome) {}
}

/// Listener that ignores everything.
pub struct NoListener;

impl PipelineListener for NoListener {}

/// Ambient light and license state shown in diagnostics. Written from
/// sensor and license callbacks, read by the analysis thread.
#[derive(Clone, Default)]
pub struct SessionStatus {
    inner: Arc<Mutex<(Option<AmbientLight>, LicenseStatus)>>,
}

impl SessionStatus {
    fn lock(&self) -> MutexGuard<'_, (Option<AmbientLight>, LicenseStatus)> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn set_ambient_light(&self, light: AmbientLight) {
        self.lock().0 = Some(light);
    }

    pub fn set_license(&self, license: LicenseStatus) {
        self.lock().1 = license;
    }

    pub fn ambient_light(&self) -> Option<AmbientLight> {
        self.lock().0
    }

    pub fn license(&self) -> LicenseStatus {
        self.lock().1.clone()
    }
}

/// Outcome of one processed frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameReport {
    pub timestamp: u64,
    pub faces: usize,
    pub device_faces: usize,
    pub latency_ms: u64,
    pub rendered: bool,
}

pub struct AnalysisPipeline {
    engine: SharedEngine,
    flags: AnalysisFlags,
    preview: Size,
    renderer: OverlayRenderer,
    identity: Option<IdentityMatcher>,
    listener: Arc<dyn PipelineListener>,
    metrics: Arc<PipelineMetrics>,
    status: SessionStatus,
}

impl AnalysisPipeline {
    pub fn new(
        engine: SharedEngine,
        flags: AnalysisFlags,
        renderer: OverlayRenderer,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            engine,
            flags,
            preview: Size::default(),
            renderer,
            identity: None,
            listener: Arc::new(NoListener),
            metrics,
            status: SessionStatus::default(),
        }
    }

    pub fn with_identity(mut self, matcher: IdentityMatcher) -> Self {
        self.identity = Some(matcher);
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn PipelineListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn with_status(mut self, status: SessionStatus) -> Self {
        self.status = status;
        self
    }

    pub fn flags(&self) -> AnalysisFlags {
        self.flags
    }

    pub fn preview_size(&self) -> Size {
        self.preview
    }

    pub fn identity(&self) -> Option<&IdentityMatcher> {
        self.identity.as_ref()
    }

    /// Camera opened: adopt its preview geometry and mirroring, clear the
    /// enrolled identity and notify the listener.
    pub fn on_started(&mut self, config: &CameraConfig) {
        self.preview = config.portrait_preview_size();
        self.renderer.set_mirror(config.is_front());
        if let Some(matcher) = self.identity.as_mut() {
            matcher.reset();
        }
        log::info!(
            "pipeline started: preview {}, mirror {}",
            self.preview,
            config.is_front()
        );
        self.listener.on_pipeline_started(config);
    }

    pub fn process(&mut self, mut frame: RawFrame) -> Result<FrameReport> {
        self.metrics.record_analysis_tick(now_millis());

        if !self.flags.adjust_orientation && frame.orientation().is_some() {
            frame.rotate_upright();
        }
        if !self.flags.adjust_degree {
            frame.clear_degree();
        }
        let hidden = if self.flags.use_geometry_graph {
            None
        } else {
            Some(frame.detach_geometry())
        };

        let started = Instant::now();
        let analyzed = {
            let mut engine = lock_engine(&self.engine);
            let view = frame.view();
            catch_unwind(AssertUnwindSafe(|| engine.analyze(&view)))
                .unwrap_or_else(|_| Err(anyhow!("face engine panicked")))
        };
        if let Some(geometry) = hidden {
            frame.reattach_geometry(geometry);
        }
        let raw = analyzed?;
        let latency_ms = started.elapsed().as_millis() as u64;
        self.metrics.record_analysis_latency(latency_ms);

        let source = frame.frame_geometry();
        let (preview_faces, device_faces) = {
            let engine = lock_engine(&self.engine);
            let preview_faces = engine.adjust_for_preview(&raw, source, self.preview);
            let device_faces = frame
                .geometry()
                .map(parse_face_features)
                .filter(|faces| !faces.is_empty())
                .map(|faces| engine.adjust_for_preview(&faces, source, self.preview));
            (preview_faces, device_faces)
        };

        let rgb = Arc::new(frame.to_rgb()?);
        drop(frame);

        let rendered = self.render(&rgb, &preview_faces, device_faces.as_ref());

        if !raw.is_empty() {
            self.listener.on_faces_detected(&rgb, &raw);
            self.match_identity(&raw);
        }

        Ok(FrameReport {
            timestamp: rgb.timestamp(),
            faces: raw.len(),
            device_faces: device_faces.as_ref().map_or(0, |faces| faces.len()),
            latency_ms,
            rendered,
        })
    }

    fn render(
        &mut self,
        frame: &AnalyzedFrame,
        faces: &PreviewSpaceFeatures,
        device_faces: Option<&PreviewSpaceFeatures>,
    ) -> bool {
        let diagnostics = Diagnostics {
            metrics: self.metrics.snapshot(),
            ambient: self.status.ambient_light(),
            license: self.status.license(),
        };
        self.renderer.render(&OverlayFrame {
            frame,
            preview: self.preview,
            faces,
            device_faces,
            diagnostics: &diagnostics,
        })
    }

    fn match_identity(&mut self, raw: &RawSpaceFeatures) {
        let Some(matcher) = self.identity.as_mut() else {
            return;
        };
        let engine = lock_engine(&self.engine);
        match matcher.observe(raw, Instant::now(), |a, b| engine.compare(a, b)) {
            Ok(outcome) if !outcome.is_empty() => self.listener.on_identity(&outcome),
            Ok(_) => {}
            Err(e) => log::warn!("identity matching failed: {:#}", e),
        }
    }
}

/// Engine lock that survives a poisoned mutex.
fn lock_engine(engine: &SharedEngine) -> MutexGuard<'_, dyn FaceEngine + 'static> {
    engine.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::{GeometryGraph, FACE_GROUP};
    use crate::camera::{CameraFacing, SyntheticScene};
    use crate::engine::{EngineCapability, GeometryEngine, StubEngine};
    use crate::face::FaceFeature;
    use crate::frame::{FrameView, Orientation, PixelFormat};
    use crate::geometry::Rect;
    use crate::overlay::{Color, DisplayListHandle, DisplayListSurface, DrawOp, SurfaceSize};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records what the engine was shown.
    #[derive(Default)]
    struct RecordingEngine {
        saw_geometry: Arc<Mutex<Vec<bool>>>,
        saw_size: Arc<Mutex<Vec<(u32, u32, Option<i32>)>>>,
        panic_next: bool,
    }

    impl FaceEngine for RecordingEngine {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn supports(&self, _: EngineCapability) -> bool {
            true
        }

        fn analyze(&mut self, frame: &FrameView<'_>) -> Result<RawSpaceFeatures> {
            if std::mem::take(&mut self.panic_next) {
                panic!("engine crashed");
            }
            self.saw_geometry.lock().unwrap().push(frame.geometry().is_some());
            self.saw_size
                .lock()
                .unwrap()
                .push((frame.width(), frame.height(), frame.degree()));
            Ok(RawSpaceFeatures::empty())
        }
    }

    /// Always reports one face, regardless of the frame.
    struct OneFaceEngine;

    impl FaceEngine for OneFaceEngine {
        fn name(&self) -> &'static str {
            "one-face"
        }

        fn supports(&self, _: EngineCapability) -> bool {
            false
        }

        fn analyze(&mut self, _: &FrameView<'_>) -> Result<RawSpaceFeatures> {
            Ok(RawSpaceFeatures::new(vec![FaceFeature::from_rect(Rect::new(
                0, 0, 2, 2,
            ))]))
        }
    }

    /// Keeps the annotation of the last frame handed to the listener.
    #[derive(Default)]
    struct GeometryListener {
        last: Mutex<Option<Option<GeometryGraph>>>,
    }

    impl PipelineListener for GeometryListener {
        fn on_faces_detected(&self, frame: &Arc<AnalyzedFrame>, _: &RawSpaceFeatures) {
            *self.last.lock().unwrap() = Some(frame.geometry().cloned());
        }
    }

    #[derive(Default)]
    struct CountingListener {
        detected: AtomicUsize,
        identities: AtomicUsize,
        started: AtomicUsize,
    }

    impl PipelineListener for CountingListener {
        fn on_pipeline_started(&self, _: &CameraConfig) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        fn on_faces_detected(&self, _: &Arc<AnalyzedFrame>, _: &RawSpaceFeatures) {
            self.detected.fetch_add(1, Ordering::SeqCst);
        }

        fn on_identity(&self, _: &MatchOutcome) {
            self.identities.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn pipeline_with(
        engine: SharedEngine,
        flags: AnalysisFlags,
    ) -> (AnalysisPipeline, DisplayListHandle) {
        let (surface, handle) = DisplayListSurface::new(Size::new(480, 640));
        let renderer = OverlayRenderer::new(
            Box::new(surface),
            SurfaceSize::new(Size::new(480, 640)),
            false,
        );
        let mut pipeline =
            AnalysisPipeline::new(engine, flags, renderer, Arc::new(PipelineMetrics::default()));
        pipeline.on_started(&CameraConfig::default());
        (pipeline, handle)
    }

    fn annotation() -> GeometryGraph {
        GeometryGraph::new(FACE_GROUP).with_child(
            GeometryGraph::new("face.outline").with_points(Rect::new(2, 2, 4, 2).corners().to_vec()),
        )
    }

    fn annotated_frame() -> RawFrame {
        let graph = annotation();
        RawFrame::new(vec![0u8; 8 * 4 * 3], 8, 4, PixelFormat::Rgb24, 11)
            .unwrap()
            .with_orientation(Orientation::Clockwise90)
            .with_degree(90)
            .with_geometry(graph)
    }

    #[test]
    fn geometry_is_hidden_from_engine_and_restored() -> Result<()> {
        let recorder = RecordingEngine::default();
        let seen = recorder.saw_geometry.clone();
        let engine: SharedEngine = Arc::new(Mutex::new(recorder));
        let (mut pipeline, handle) = pipeline_with(engine, AnalysisFlags::default());

        let report = pipeline.process(annotated_frame())?;
        assert_eq!(*seen.lock().unwrap(), vec![false]);
        // The annotation came back for the device layer.
        assert_eq!(report.device_faces, 1);
        assert!(report.rendered);
        assert!(handle
            .latest()
            .iter()
            .any(|op| matches!(op, DrawOp::Line { paint, .. } if paint.color == Color::GREEN)));
        Ok(())
    }

    #[test]
    fn hidden_geometry_comes_back_unchanged() -> Result<()> {
        let listener = Arc::new(GeometryListener::default());
        let (pipeline, _) = pipeline_with(Arc::new(Mutex::new(OneFaceEngine)), AnalysisFlags::default());
        let mut pipeline = pipeline.with_listener(listener.clone());

        let report = pipeline.process(annotated_frame())?;
        assert_eq!(report.faces, 1);
        let restored = listener
            .last
            .lock()
            .unwrap()
            .clone()
            .expect("listener was not called")
            .expect("annotation was lost");
        assert_eq!(restored, annotation());
        assert_eq!(
            serde_json::to_vec(&restored)?,
            serde_json::to_vec(&annotation())?
        );
        Ok(())
    }

    fn outline_ops(handle: &DisplayListHandle) -> Vec<DrawOp> {
        handle
            .latest()
            .into_iter()
            .filter(|op| matches!(op, DrawOp::Line { .. } | DrawOp::Rect { .. }))
            .collect()
    }

    #[test]
    fn rotating_upright_lands_faces_where_the_hint_would() -> Result<()> {
        let shown = AnalysisFlags {
            use_geometry_graph: true,
            ..AnalysisFlags::default()
        };
        let (mut keep, keep_ops) = pipeline_with(Arc::new(Mutex::new(GeometryEngine::new())), shown);
        let keep_report = keep.process(annotated_frame())?;

        let rotate_first = AnalysisFlags {
            adjust_orientation: false,
            ..shown
        };
        let (mut rotate, rotate_ops) =
            pipeline_with(Arc::new(Mutex::new(GeometryEngine::new())), rotate_first);
        let rotate_report = rotate.process(annotated_frame())?;

        assert_eq!(keep_report.faces, 1);
        assert_eq!(rotate_report.faces, 1);
        let expected = outline_ops(&keep_ops);
        assert!(!expected.is_empty());
        assert_eq!(outline_ops(&rotate_ops), expected);
        Ok(())
    }

    #[test]
    fn geometry_flag_shows_annotation_to_engine() -> Result<()> {
        let recorder = RecordingEngine::default();
        let seen = recorder.saw_geometry.clone();
        let flags = AnalysisFlags {
            use_geometry_graph: true,
            ..AnalysisFlags::default()
        };
        let (mut pipeline, _) = pipeline_with(Arc::new(Mutex::new(recorder)), flags);
        pipeline.process(annotated_frame())?;
        assert_eq!(*seen.lock().unwrap(), vec![true]);
        Ok(())
    }

    #[test]
    fn orientation_flag_is_inverted() -> Result<()> {
        let recorder = RecordingEngine::default();
        let sizes = recorder.saw_size.clone();
        let engine: SharedEngine = Arc::new(Mutex::new(recorder));

        let (mut keep, _) = pipeline_with(engine.clone(), AnalysisFlags::default());
        keep.process(annotated_frame())?;

        let flags = AnalysisFlags {
            adjust_orientation: false,
            adjust_degree: false,
            ..AnalysisFlags::default()
        };
        let (mut rotate, _) = pipeline_with(engine, flags);
        rotate.process(annotated_frame())?;

        assert_eq!(*sizes.lock().unwrap(), vec![(8, 4, Some(90)), (4, 8, None)]);
        Ok(())
    }

    #[test]
    fn engine_panic_becomes_error_and_next_frame_works() -> Result<()> {
        let recorder = RecordingEngine {
            panic_next: true,
            ..RecordingEngine::default()
        };
        let (mut pipeline, _) = pipeline_with(Arc::new(Mutex::new(recorder)), AnalysisFlags::default());
        assert!(pipeline.process(annotated_frame()).is_err());
        assert!(pipeline.process(annotated_frame()).is_ok());
        Ok(())
    }

    #[test]
    fn faces_reach_listener_and_identity() -> Result<()> {
        let engine: SharedEngine = Arc::new(Mutex::new(StubEngine::new()));
        let listener = Arc::new(CountingListener::default());
        let (surface, _) = DisplayListSurface::new(Size::new(480, 640));
        let renderer = OverlayRenderer::new(
            Box::new(surface),
            SurfaceSize::new(Size::new(480, 640)),
            true,
        );
        let mut pipeline = AnalysisPipeline::new(
            engine,
            AnalysisFlags::default(),
            renderer,
            Arc::new(PipelineMetrics::default()),
        )
        .with_identity(IdentityMatcher::default())
        .with_listener(listener.clone());
        let config = CameraConfig {
            facing: CameraFacing::Front,
            ..CameraConfig::default()
        };
        pipeline.on_started(&config);
        assert_eq!(listener.started.load(Ordering::SeqCst), 1);

        let mut scene = SyntheticScene::new(config, 3);
        let report = pipeline.process(scene.next_frame(1)?)?;
        assert_eq!(report.faces, 2);
        assert_eq!(report.device_faces, 2);
        assert_eq!(listener.detected.load(Ordering::SeqCst), 1);
        // First frame enrolls one face and compares the other.
        assert_eq!(listener.identities.load(Ordering::SeqCst), 1);
        assert!(pipeline.identity().and_then(|m| m.enrolled()).is_some());

        pipeline.on_started(&CameraConfig::default());
        assert!(pipeline.identity().and_then(|m| m.enrolled()).is_none());
        Ok(())
    }

    #[test]
    fn empty_frames_still_render() -> Result<()> {
        let engine: SharedEngine = Arc::new(Mutex::new(StubEngine::new()));
        let listener = Arc::new(CountingListener::default());
        let (mut pipeline, handle) = pipeline_with(engine, AnalysisFlags::default());
        pipeline = pipeline.with_listener(listener.clone());
        let frame = RawFrame::new(vec![10u8; 16 * 8 * 3 / 2], 16, 8, PixelFormat::Nv21, 5)?;
        let report = pipeline.process(frame)?;
        assert_eq!(report.faces, 0);
        assert!(report.rendered);
        assert_eq!(handle.posts(), 1);
        assert_eq!(listener.detected.load(Ordering::SeqCst), 0);
        Ok(())
    }
}
