//! Overlay renderer: preview-space faces to destination pixels.
//!
//! A render locks the surface, clears it, draws the engine face layer, the
//! optional device-geometry layer and the diagnostics block, then posts. A
//! canvas that was handed out always goes back through `unlock_and_post`,
//! even when drawing fails or panics.

pub mod canvas;
pub mod scale;

use anyhow::Result;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use crate::face::{FaceFeature, PreviewSpaceFeatures};
use crate::frame::AnalyzedFrame;
use crate::geometry::Size;
use crate::metrics::MetricsSnapshot;

pub use canvas::{
    Canvas, Color, DisplayListHandle, DisplayListSurface, DisplayPoint, DisplayRect, DrawOp,
    Paint, PaintStyle, RenderSurface,
};
pub use scale::DisplayTransform;

const LABEL_OFFSET: f32 = 8.0;
const DIAGNOSTICS_X: f32 = 32.0;
const DIAGNOSTICS_LINE: f32 = 32.0;

/// Where a face label goes relative to the outline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelPosition {
    Top,
    Bottom,
}

/// Paints for one face layer.
#[derive(Clone, Copy, Debug)]
pub struct LayerStyle {
    pub outline: Paint,
    pub bounds: Paint,
    pub label: Paint,
    pub label_position: LabelPosition,
}

impl LayerStyle {
    pub fn engine(label_position: LabelPosition) -> Self {
        Self {
            outline: Paint::stroke(Color::YELLOW, 5.0),
            bounds: Paint::stroke(Color::BLUE, 5.0),
            label: Paint::text(Color::YELLOW, 64.0),
            label_position,
        }
    }

    pub fn device() -> Self {
        Self {
            outline: Paint::stroke(Color::GREEN, 5.0),
            bounds: Paint::stroke(Color::GREEN, 5.0),
            label: Paint::text(Color::GREEN, 64.0),
            label_position: LabelPosition::Bottom,
        }
    }
}

/// Last ambient light reading, if a sensor reported one.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AmbientLight {
    pub lux: f32,
    pub accuracy: i32,
}

/// Engine license state shown in the diagnostics block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LicenseStatus {
    pub state: String,
    pub expires: Option<String>,
}

impl Default for LicenseStatus {
    fn default() -> Self {
        Self {
            state: "unlicensed".to_string(),
            expires: None,
        }
    }
}

/// Everything the diagnostics block prints besides the frame itself.
#[derive(Clone, Debug, Default)]
pub struct Diagnostics {
    pub metrics: MetricsSnapshot,
    pub ambient: Option<AmbientLight>,
    pub license: LicenseStatus,
}

impl Diagnostics {
    pub fn lines(&self, frame: &AnalyzedFrame) -> Vec<String> {
        let rate = |r: Option<f32>| r.map_or_else(|| "--".to_string(), |r| format!("{:.2}", r));
        let (lux, accuracy) = self
            .ambient
            .map_or(("--".to_string(), -1), |a| (format!("{:.2}", a.lux), a.accuracy));
        vec![
            format!(
                "FPS:{}|{}",
                rate(self.metrics.capture_rate),
                rate(self.metrics.analysis_rate)
            ),
            format!("analysis time:{}ms", self.metrics.last_analysis_ms),
            format!("image size:{}x{}", frame.width(), frame.height()),
            format!(
                "image orientation:{}, degree:{}",
                frame.orientation().map_or(-1, |o| o.degrees()),
                frame.degree().unwrap_or(-1)
            ),
            format!(
                "timestamp:{}, time:{}",
                self.metrics.last_capture_timestamp, self.metrics.last_capture_wall_ms
            ),
            format!("light:{}|{}", lux, accuracy),
            format!(
                "license({}) {}",
                self.license.state,
                self.license.expires.as_deref().unwrap_or("-")
            ),
        ]
    }
}

/// Destination size shared between the UI (which learns it from surface
/// size changes) and the renderer.
#[derive(Clone, Debug, Default)]
pub struct SurfaceSize(Arc<Mutex<Size>>);

impl SurfaceSize {
    pub fn new(size: Size) -> Self {
        Self(Arc::new(Mutex::new(size)))
    }

    pub fn set(&self, size: Size) {
        *self.0.lock().unwrap_or_else(|p| p.into_inner()) = size;
    }

    pub fn get(&self) -> Size {
        *self.0.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// One render request.
pub struct OverlayFrame<'a> {
    pub frame: &'a AnalyzedFrame,
    pub preview: Size,
    pub faces: &'a PreviewSpaceFeatures,
    /// Faces from the device geometry annotation, already in preview space.
    pub device_faces: Option<&'a PreviewSpaceFeatures>,
    pub diagnostics: &'a Diagnostics,
}

pub struct OverlayRenderer {
    surface: Box<dyn RenderSurface>,
    dest: SurfaceSize,
    mirror: bool,
    engine_style: LayerStyle,
    device_style: LayerStyle,
    diagnostics_paint: Paint,
}

impl OverlayRenderer {
    pub fn new(surface: Box<dyn RenderSurface>, dest: SurfaceSize, mirror: bool) -> Self {
        Self {
            surface,
            dest,
            mirror,
            engine_style: LayerStyle::engine(LabelPosition::Top),
            device_style: LayerStyle::device(),
            diagnostics_paint: Paint::text(Color::BLACK, 32.0),
        }
    }

    pub fn with_label_position(mut self, position: LabelPosition) -> Self {
        self.engine_style.label_position = position;
        self
    }

    pub fn set_mirror(&mut self, mirror: bool) {
        self.mirror = mirror;
    }

    pub fn surface_size(&self) -> &SurfaceSize {
        &self.dest
    }

    /// Draw one overlay frame. Returns whether a canvas was posted.
    pub fn render(&mut self, request: &OverlayFrame<'_>) -> bool {
        let mut canvas = match self.surface.lock_canvas() {
            Ok(Some(canvas)) => canvas,
            Ok(None) => {
                log::debug!("overlay surface has no canvas; skipping frame");
                return false;
            }
            Err(e) => {
                log::debug!("overlay surface lock failed: {}", e);
                return false;
            }
        };

        let transform = DisplayTransform::new(request.preview, self.dest.get(), self.mirror);
        let drawn = catch_unwind(AssertUnwindSafe(|| {
            self.draw(canvas.as_mut(), &transform, request)
        }));
        self.surface.unlock_and_post(canvas);

        match drawn {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("overlay drawing failed: {}", e),
            Err(_) => log::error!("overlay drawing panicked"),
        }
        true
    }

    fn draw(
        &self,
        canvas: &mut dyn Canvas,
        transform: &DisplayTransform,
        request: &OverlayFrame<'_>,
    ) -> Result<()> {
        canvas.clear(Color::TRANSPARENT);
        if transform.is_usable() {
            for face in request.faces.iter() {
                draw_face(canvas, transform, face, &self.engine_style)?;
            }
            if let Some(device) = request.device_faces {
                for face in device.iter() {
                    draw_face(canvas, transform, face, &self.device_style)?;
                }
            }
        } else {
            log::debug!(
                "overlay sizes unknown (preview {}, surface {})",
                transform.preview,
                transform.dest
            );
        }

        let mut y = DIAGNOSTICS_LINE;
        for line in request.diagnostics.lines(request.frame) {
            canvas.draw_text(
                &line,
                DisplayPoint::new(DIAGNOSTICS_X, y),
                &self.diagnostics_paint,
            )?;
            y += DIAGNOSTICS_LINE;
        }
        Ok(())
    }
}

fn draw_face(
    canvas: &mut dyn Canvas,
    transform: &DisplayTransform,
    face: &FaceFeature,
    style: &LayerStyle,
) -> Result<()> {
    let points: Vec<DisplayPoint> = face
        .polygon
        .points()
        .iter()
        .map(|&p| transform.map_point(p))
        .collect();
    if points.is_empty() {
        return Ok(());
    }

    for pair in points.windows(2) {
        canvas.draw_line(pair[0], pair[1], &style.outline)?;
    }
    if points.len() > 1 {
        canvas.draw_line(points[points.len() - 1], points[0], &style.outline)?;
    }

    if !face.polygon.is_rect() {
        canvas.draw_rect(transform.map_rect(face.rectangle), &style.bounds)?;
    }

    if let Some(landmarks) = face.landmarks {
        let mouth = transform.map_landmark(landmarks.mouth);
        let left = transform.map_landmark(landmarks.left_eye);
        let right = transform.map_landmark(landmarks.right_eye);
        canvas.draw_line(mouth, left, &style.outline)?;
        canvas.draw_line(left, right, &style.outline)?;
        canvas.draw_line(mouth, right, &style.outline)?;
    }

    let min_x = points.iter().map(|p| p.x).fold(f32::INFINITY, f32::min);
    let min_y = points.iter().map(|p| p.y).fold(f32::INFINITY, f32::min);
    let max_y = points.iter().map(|p| p.y).fold(f32::NEG_INFINITY, f32::max);
    let anchor = match style.label_position {
        LabelPosition::Top => min_y,
        LabelPosition::Bottom => max_y,
    };
    canvas.draw_text(
        &face_label(face),
        DisplayPoint::new(min_x, anchor - LABEL_OFFSET),
        &style.label,
    )
}

fn face_label(face: &FaceFeature) -> String {
    format!(
        "score:{} clarity:{:.2}",
        face.score.unwrap_or(-1),
        face.clarity.unwrap_or(-1.0)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{PixelFormat, RawFrame};
    use crate::geometry::{Point, Polygon, Rect};
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn analyzed() -> AnalyzedFrame {
        RawFrame::new(vec![0u8; 4 * 4 * 3], 4, 4, PixelFormat::Rgb24, 42)
            .and_then(|f| f.to_rgb())
            .unwrap()
    }

    fn square_face() -> FaceFeature {
        FaceFeature::from_rect(Rect::new(50, 50, 100, 100)).with_scores(Some(88), Some(0.5))
    }

    #[test]
    fn draws_faces_labels_and_diagnostics() {
        let (surface, handle) = DisplayListSurface::new(Size::new(400, 400));
        let mut renderer =
            OverlayRenderer::new(Box::new(surface), SurfaceSize::new(Size::new(400, 400)), false);
        let frame = analyzed();
        let faces = PreviewSpaceFeatures::new(vec![square_face()]);
        let diagnostics = Diagnostics::default();
        assert!(renderer.render(&OverlayFrame {
            frame: &frame,
            preview: Size::new(200, 200),
            faces: &faces,
            device_faces: None,
            diagnostics: &diagnostics,
        }));

        let ops = handle.latest();
        assert!(matches!(ops[0], DrawOp::Clear { color } if color == Color::TRANSPARENT));
        let lines = ops.iter().filter(|op| matches!(op, DrawOp::Line { .. })).count();
        assert_eq!(lines, 4);
        // Axis-aligned outline: no extra bounding rectangle.
        assert!(!ops.iter().any(|op| matches!(op, DrawOp::Rect { .. })));
        let texts: Vec<(&str, DisplayPoint)> = ops
            .iter()
            .filter_map(|op| match op {
                DrawOp::Text { text, at, .. } => Some((text.as_str(), *at)),
                _ => None,
            })
            .collect();
        assert_eq!(texts[0], ("score:88 clarity:0.50", DisplayPoint::new(100.0, 92.0)));
        assert_eq!(texts[1].1, DisplayPoint::new(32.0, 32.0));
        assert!(texts[1].0.starts_with("FPS:--|--"));
        assert_eq!(texts[2].1, DisplayPoint::new(32.0, 64.0));
        assert!(texts.iter().any(|(t, _)| *t == "image size:4x4"));
        assert!(texts.iter().any(|(t, _)| *t == "image orientation:-1, degree:-1"));
    }

    #[test]
    fn non_rect_face_gets_bounds_and_landmarks() {
        let (surface, handle) = DisplayListSurface::new(Size::new(100, 100));
        let mut renderer =
            OverlayRenderer::new(Box::new(surface), SurfaceSize::new(Size::new(100, 100)), true);
        let outline = Polygon::new(vec![Point::new(50, 10), Point::new(90, 50), Point::new(50, 90)]);
        let face = FaceFeature::from_polygon(outline).with_landmarks(crate::face::Landmarks {
            mouth: Point::new(50, 70),
            left_eye: Point::new(40, 40),
            right_eye: Point::new(60, 40),
        });
        let faces = PreviewSpaceFeatures::new(vec![face]);
        let frame = analyzed();
        renderer.render(&OverlayFrame {
            frame: &frame,
            preview: Size::new(100, 100),
            faces: &faces,
            device_faces: None,
            diagnostics: &Diagnostics::default(),
        });

        let ops = handle.latest();
        let lines = ops.iter().filter(|op| matches!(op, DrawOp::Line { .. })).count();
        assert_eq!(lines, 3 + 3);
        let rect = ops
            .iter()
            .find_map(|op| match op {
                DrawOp::Rect { rect, .. } => Some(*rect),
                _ => None,
            })
            .unwrap();
        // Bounds (50,10)-(90,90) mirrored in a 100 wide surface.
        assert_eq!(rect.left, 10.0);
        assert!(ops.iter().any(|op| matches!(
            op,
            DrawOp::Text { text, at, .. } if text == "score:-1 clarity:-1.00" && *at == DisplayPoint::new(10.0, 2.0)
        )));
    }

    #[test]
    fn device_layer_is_green_with_label_below() {
        let (surface, handle) = DisplayListSurface::new(Size::new(200, 200));
        let mut renderer =
            OverlayRenderer::new(Box::new(surface), SurfaceSize::new(Size::new(200, 200)), false);
        let frame = analyzed();
        let none = PreviewSpaceFeatures::empty();
        let device = PreviewSpaceFeatures::new(vec![square_face()]);
        renderer.render(&OverlayFrame {
            frame: &frame,
            preview: Size::new(200, 200),
            faces: &none,
            device_faces: Some(&device),
            diagnostics: &Diagnostics::default(),
        });
        let ops = handle.latest();
        assert!(ops.iter().any(|op| matches!(
            op,
            DrawOp::Text { at, paint, .. } if paint.color == Color::GREEN && *at == DisplayPoint::new(50.0, 142.0)
        )));
    }

    struct FailingLock;

    impl RenderSurface for FailingLock {
        fn lock_canvas(&mut self) -> Result<Option<Box<dyn Canvas + Send>>> {
            Err(anyhow!("surface destroyed"))
        }

        fn unlock_and_post(&mut self, _canvas: Box<dyn Canvas + Send>) {
            panic!("nothing was locked");
        }
    }

    #[test]
    fn lock_failure_is_a_no_op() {
        let mut renderer =
            OverlayRenderer::new(Box::new(FailingLock), SurfaceSize::new(Size::new(10, 10)), false);
        let frame = analyzed();
        assert!(!renderer.render(&OverlayFrame {
            frame: &frame,
            preview: Size::new(10, 10),
            faces: &PreviewSpaceFeatures::empty(),
            device_faces: None,
            diagnostics: &Diagnostics::default(),
        }));
    }

    struct BrokenCanvas;

    impl Canvas for BrokenCanvas {
        fn size(&self) -> Size {
            Size::new(10, 10)
        }

        fn clear(&mut self, _color: Color) {}

        fn draw_line(&mut self, _: DisplayPoint, _: DisplayPoint, _: &Paint) -> Result<()> {
            Err(anyhow!("line failed"))
        }

        fn draw_rect(&mut self, _: DisplayRect, _: &Paint) -> Result<()> {
            Err(anyhow!("rect failed"))
        }

        fn draw_text(&mut self, _: &str, _: DisplayPoint, _: &Paint) -> Result<()> {
            panic!("text exploded");
        }
    }

    struct CountingSurface {
        unlocked: Arc<AtomicUsize>,
    }

    impl RenderSurface for CountingSurface {
        fn lock_canvas(&mut self) -> Result<Option<Box<dyn Canvas + Send>>> {
            let canvas: Box<dyn Canvas + Send> = Box::new(BrokenCanvas);
            Ok(Some(canvas))
        }

        fn unlock_and_post(&mut self, _canvas: Box<dyn Canvas + Send>) {
            self.unlocked.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn canvas_is_released_when_drawing_fails() {
        let unlocked = Arc::new(AtomicUsize::new(0));
        let surface = CountingSurface {
            unlocked: unlocked.clone(),
        };
        let mut renderer =
            OverlayRenderer::new(Box::new(surface), SurfaceSize::new(Size::new(10, 10)), false);
        let frame = analyzed();
        let faces = PreviewSpaceFeatures::new(vec![square_face()]);
        // Line drawing errors.
        assert!(renderer.render(&OverlayFrame {
            frame: &frame,
            preview: Size::new(10, 10),
            faces: &faces,
            device_faces: None,
            diagnostics: &Diagnostics::default(),
        }));
        // No faces: text drawing panics.
        assert!(renderer.render(&OverlayFrame {
            frame: &frame,
            preview: Size::new(10, 10),
            faces: &PreviewSpaceFeatures::empty(),
            device_faces: None,
            diagnostics: &Diagnostics::default(),
        }));
        assert_eq!(unlocked.load(Ordering::SeqCst), 2);
    }
}
