//! Raw analysis space to portrait preview space.

use crate::face::{PreviewSpaceFeatures, RawSpaceFeatures};
use crate::frame::{rotate_point, FrameGeometry};
use crate::geometry::{Point, Size};

/// Rotate raw faces by the frame's degree annotation (clockwise quarter
/// turns), then scale them to `preview`. The input is left untouched.
///
/// Degrees that are not a multiple of 90 are treated as no rotation.
pub fn adjust_for_preview(
    features: &RawSpaceFeatures,
    source: FrameGeometry,
    preview: Size,
) -> PreviewSpaceFeatures {
    let turns = match source.degree {
        Some(degree) if degree.rem_euclid(90) == 0 => (degree.rem_euclid(360) / 90) as u8,
        Some(degree) => {
            log::debug!("ignoring non-quarter rotation degree {}", degree);
            0
        }
        None => 0,
    };
    let rotated = if turns % 2 == 1 {
        source.size.transposed()
    } else {
        source.size
    };
    if rotated.is_empty() {
        return PreviewSpaceFeatures::empty();
    }
    features
        .iter()
        .map(|face| {
            face.map_points(|p| {
                let r = rotate_point(p, source.size, turns);
                Point::new(
                    scale(r.x, preview.width, rotated.width),
                    scale(r.y, preview.height, rotated.height),
                )
            })
        })
        .collect()
}

fn scale(value: i32, to: u32, from: u32) -> i32 {
    (value as i64 * to as i64 / from as i64) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::FaceFeature;
    use crate::geometry::Rect;

    #[test]
    fn rotates_landscape_capture_into_portrait_preview() {
        let raw = RawSpaceFeatures::new(vec![FaceFeature::from_rect(Rect::new(0, 0, 64, 48))]);
        let source = FrameGeometry {
            size: Size::new(640, 480),
            degree: Some(90),
        };
        let preview = adjust_for_preview(&raw, source, Size::new(960, 1280));
        // After a clockwise turn the top-left face sits at the top-right.
        assert_eq!(preview[0].rectangle, Rect::new(864, 0, 96, 128));
        // Raw values stay authoritative.
        assert_eq!(raw[0].rectangle, Rect::new(0, 0, 64, 48));
    }

    #[test]
    fn scales_without_degree() {
        let raw = RawSpaceFeatures::new(vec![FaceFeature::from_rect(Rect::new(10, 10, 20, 20))]);
        let source = FrameGeometry {
            size: Size::new(100, 100),
            degree: None,
        };
        let preview = adjust_for_preview(&raw, source, Size::new(200, 300));
        assert_eq!(preview[0].rectangle, Rect::new(20, 30, 40, 60));
    }
}
