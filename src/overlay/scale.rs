use crate::geometry::{Point, Rect, Size};

use super::canvas::{DisplayPoint, DisplayRect};

/// Preview space to display surface mapping, with optional horizontal mirror.
///
/// Scaling truncates to whole surface pixels and mirroring works on those
/// integers, landmarks reflecting about `dest_w / 2` rounded down. Outline
/// points, rectangles and landmarks each use their own mirror rule; for a
/// face symmetric about the vertical center line all three agree.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DisplayTransform {
    pub preview: Size,
    pub dest: Size,
    pub mirror: bool,
}

impl DisplayTransform {
    pub fn new(preview: Size, dest: Size, mirror: bool) -> Self {
        Self {
            preview,
            dest,
            mirror,
        }
    }

    /// False when either size is empty; nothing can be mapped then.
    pub fn is_usable(&self) -> bool {
        !self.preview.is_empty() && !self.dest.is_empty()
    }

    fn sx(&self, x: i32) -> i64 {
        scale(x, self.dest.width, self.preview.width)
    }

    fn sy(&self, y: i32) -> i64 {
        scale(y, self.dest.height, self.preview.height)
    }

    fn dest_w(&self) -> i64 {
        self.dest.width as i64
    }

    /// Outline point: `x' = dest_w - x`.
    pub fn map_point(&self, p: Point) -> DisplayPoint {
        let x = self.sx(p.x);
        let x = if self.mirror { self.dest_w() - x } else { x };
        DisplayPoint::new(x as f32, self.sy(p.y) as f32)
    }

    /// Rectangle: `x' = dest_w - x - w`. Right and bottom are inclusive.
    pub fn map_rect(&self, r: Rect) -> DisplayRect {
        let w = self.sx(r.width);
        let h = self.sy(r.height);
        let x = self.sx(r.x);
        let x = if self.mirror { self.dest_w() - x - w } else { x };
        let y = self.sy(r.y);
        DisplayRect {
            left: x as f32,
            top: y as f32,
            right: (x + w - 1) as f32,
            bottom: (y + h - 1) as f32,
        }
    }

    /// Landmark: `x' = x + 2 * (dest_w / 2 - x)`.
    pub fn map_landmark(&self, p: Point) -> DisplayPoint {
        let x = self.sx(p.x);
        let x = if self.mirror {
            x + 2 * (self.dest_w() / 2 - x)
        } else {
            x
        };
        DisplayPoint::new(x as f32, self.sy(p.y) as f32)
    }
}

fn scale(value: i32, to: u32, from: u32) -> i64 {
    if from == 0 {
        return 0;
    }
    value as i64 * to as i64 / from as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scales_point_into_surface() {
        let t = DisplayTransform::new(Size::new(200, 200), Size::new(400, 400), false);
        assert_eq!(t.map_point(Point::new(100, 100)), DisplayPoint::new(200.0, 200.0));
        let mirrored = DisplayTransform { mirror: true, ..t };
        assert_eq!(
            mirrored.map_point(Point::new(100, 100)),
            DisplayPoint::new(200.0, 200.0)
        );
        assert_eq!(mirrored.map_point(Point::new(50, 0)).x, 300.0);
    }

    #[test]
    fn mirror_rules_agree_on_centered_face() {
        let t = DisplayTransform::new(Size::new(100, 100), Size::new(200, 200), true);
        let face = Rect::new(30, 10, 40, 40);
        let rect = t.map_rect(face);
        let left = t.map_point(Point::new(face.right(), face.y));
        let right = t.map_point(Point::new(face.x, face.y));
        assert_eq!(rect.left, left.x);
        assert_eq!(rect.left + 80.0, right.x);
        // Centered landmark stays on the center line under both rules.
        let nose = Point::new(50, 50);
        assert_eq!(t.map_landmark(nose), t.map_point(nose));
        assert_eq!(t.map_landmark(nose).x, 100.0);
    }

    #[test]
    fn odd_surface_width_truncates_before_mirroring() {
        let t = DisplayTransform::new(Size::new(100, 100), Size::new(101, 101), true);
        // 50 * 101 / 100 truncates to 50; the landmark axis is 101 / 2 = 50.
        assert_eq!(t.map_landmark(Point::new(50, 50)), DisplayPoint::new(50.0, 50.0));
        assert_eq!(t.map_landmark(Point::new(10, 0)).x, 90.0);
        assert_eq!(t.map_point(Point::new(10, 0)).x, 91.0);
        let rect = t.map_rect(Rect::new(10, 10, 33, 33));
        // x = 10, w = 33: left = 101 - 10 - 33.
        assert_eq!(rect.left, 58.0);
        assert_eq!(rect.right, 90.0);
        assert_eq!(rect.bottom, 10.0 + 33.0 - 1.0);
    }

    #[test]
    fn empty_sizes_are_unusable() {
        assert!(!DisplayTransform::new(Size::new(0, 10), Size::new(10, 10), false).is_usable());
        assert!(DisplayTransform::new(Size::new(10, 10), Size::new(10, 10), false).is_usable());
    }
}
