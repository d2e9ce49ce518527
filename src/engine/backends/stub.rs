use std::collections::VecDeque;

use anyhow::Result;
use image::{Rgb, RgbImage};

use crate::annotation::parse_face_features;
use crate::engine::backend::{EngineCapability, FaceEngine};
use crate::face::{FaceFeature, Landmarks, RawSpaceFeatures};
use crate::frame::FrameView;
use crate::geometry::{Point, Polygon, Rect, Size};

/// Luma at or above this counts as face pixels.
const BRIGHT_LUMA: u8 = 200;
/// Sampling grid cell edge, in pixels.
const CELL: u32 = 4;
/// Smallest blob (in cells) reported as a face.
const MIN_CELLS: usize = 12;
const HISTOGRAM_BINS: usize = 16;

/// Stub engine for tests and the synthetic camera.
///
/// Faces are bright blobs on a dark background. Each blob becomes an
/// octagonal outline with landmarks at fixed proportions; the embedding is
/// the blob's normalized luma histogram, so differently textured blobs
/// compare as different people. Device annotations, when the pipeline leaves
/// them attached, are used instead of the blob search.
#[derive(Default)]
pub struct StubEngine {
    frames_analyzed: u64,
}

impl StubEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_analyzed(&self) -> u64 {
        self.frames_analyzed
    }

    fn describe(&self, frame: &FrameView<'_>, face: FaceFeature) -> FaceFeature {
        let bounds = Size::new(frame.width(), frame.height());
        let Some(rect) = face.rectangle.clamp_to(bounds) else {
            return face;
        };
        let mut histogram = [0u32; HISTOGRAM_BINS];
        let mut bright = 0u32;
        let mut gradient = 0u64;
        let mut crop = RgbImage::new(rect.width as u32, rect.height as u32);
        for y in 0..rect.height as u32 {
            let mut prev = None;
            for x in 0..rect.width as u32 {
                let l = frame.luma(rect.x as u32 + x, rect.y as u32 + y);
                histogram[l as usize * HISTOGRAM_BINS / 256] += 1;
                if l >= BRIGHT_LUMA {
                    bright += 1;
                }
                if let Some(p) = prev {
                    gradient += (l as i32 - p as i32).unsigned_abs() as u64;
                }
                prev = Some(l);
                crop.put_pixel(x, y, Rgb([l, l, l]));
            }
        }
        let total = (rect.width * rect.height) as f32;
        let score = face
            .score
            .unwrap_or((bright as f32 * 100.0 / total).round() as i32);
        let clarity = (gradient as f32 / total / 64.0).min(1.0);
        FaceFeature {
            score: Some(score),
            clarity: Some(clarity),
            face_image: Some(crop),
            embedding: histogram.iter().map(|&c| c as f32 / total).collect(),
            ..face
        }
    }
}

impl FaceEngine for StubEngine {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn supports(&self, capability: EngineCapability) -> bool {
        matches!(
            capability,
            EngineCapability::PixelDetection
                | EngineCapability::DeviceHints
                | EngineCapability::Comparison
        )
    }

    fn analyze(&mut self, frame: &FrameView<'_>) -> Result<RawSpaceFeatures> {
        self.frames_analyzed += 1;

        if let Some(graph) = frame.geometry() {
            let hinted = parse_face_features(graph);
            if !hinted.is_empty() {
                return Ok(hinted
                    .into_inner()
                    .into_iter()
                    .map(|face| self.describe(frame, face))
                    .collect());
            }
        }

        Ok(find_bright_blobs(frame)
            .into_iter()
            .enumerate()
            .map(|(i, rect)| {
                let face = FaceFeature::from_polygon(octagon(rect))
                    .with_landmarks(landmarks_for(rect))
                    .with_id(i as i64);
                self.describe(frame, face)
            })
            .collect())
    }
}

fn find_bright_blobs(frame: &FrameView<'_>) -> Vec<Rect> {
    let gw = (frame.width() / CELL) as usize;
    let gh = (frame.height() / CELL) as usize;
    let mut bright = vec![false; gw * gh];
    for cy in 0..gh {
        for cx in 0..gw {
            bright[cy * gw + cx] = frame.luma(cx as u32 * CELL, cy as u32 * CELL) >= BRIGHT_LUMA;
        }
    }

    let mut seen = vec![false; gw * gh];
    let mut blobs = Vec::new();
    let mut queue = VecDeque::new();
    for start in 0..gw * gh {
        if !bright[start] || seen[start] {
            continue;
        }
        seen[start] = true;
        queue.push_back(start);
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (gw, gh, 0, 0);
        let mut cells = 0usize;
        while let Some(idx) = queue.pop_front() {
            let (x, y) = (idx % gw, idx / gw);
            cells += 1;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
            let neighbours = [
                (x > 0).then(|| idx - 1),
                (x + 1 < gw).then(|| idx + 1),
                (y > 0).then(|| idx - gw),
                (y + 1 < gh).then(|| idx + gw),
            ];
            for n in neighbours.into_iter().flatten() {
                if bright[n] && !seen[n] {
                    seen[n] = true;
                    queue.push_back(n);
                }
            }
        }
        if cells >= MIN_CELLS {
            let c = CELL as i32;
            blobs.push(Rect::new(
                min_x as i32 * c,
                min_y as i32 * c,
                (max_x - min_x + 1) as i32 * c,
                (max_y - min_y + 1) as i32 * c,
            ));
        }
    }
    blobs
}

fn octagon(rect: Rect) -> Polygon {
    let cut = rect.width.min(rect.height) / 5;
    let (l, t, r, b) = (rect.x, rect.y, rect.right(), rect.bottom());
    Polygon::new(vec![
        Point::new(l + cut, t),
        Point::new(r - cut, t),
        Point::new(r, t + cut),
        Point::new(r, b - cut),
        Point::new(r - cut, b),
        Point::new(l + cut, b),
        Point::new(l, b - cut),
        Point::new(l, t + cut),
    ])
}

fn landmarks_for(rect: Rect) -> Landmarks {
    let at = |fx: i32, fy: i32| Point::new(rect.x + rect.width * fx / 10, rect.y + rect.height * fy / 10);
    Landmarks {
        mouth: at(5, 7),
        left_eye: at(3, 3),
        right_eye: at(7, 3),
    }
}
