//! Integer geometry shared by frames, annotations and face features.
//!
//! All values here live in whatever coordinate space produced them (raw
//! analysis space or preview space). Display-space values are `f32` and are
//! produced by `overlay::DisplayTransform`, never stored back into these types.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Width and height swapped.
    pub const fn transposed(self) -> Self {
        Self {
            width: self.height,
            height: self.width,
        }
    }

    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn is_landscape(self) -> bool {
        self.width > self.height
    }

    /// Parse `"640x480"` style dimensions.
    pub fn parse(value: &str) -> Option<Self> {
        let (w, h) = value.trim().split_once(['x', 'X'])?;
        let width = w.trim().parse().ok()?;
        let height = h.trim().parse().ok()?;
        Some(Self { width, height })
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    /// The four corners, clockwise from top-left.
    pub fn corners(&self) -> [Point; 4] {
        [
            Point::new(self.x, self.y),
            Point::new(self.right(), self.y),
            Point::new(self.right(), self.bottom()),
            Point::new(self.x, self.bottom()),
        ]
    }

    /// Smallest rectangle containing every point, `None` for no points.
    pub fn bounding(points: &[Point]) -> Option<Self> {
        let first = points.first()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for p in &points[1..] {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        Some(Self::new(min_x, min_y, max_x - min_x, max_y - min_y))
    }

    /// Intersection with `0..width` x `0..height`, `None` when empty.
    pub fn clamp_to(&self, bounds: Size) -> Option<Self> {
        let x0 = self.x.max(0);
        let y0 = self.y.max(0);
        let x1 = self.right().min(bounds.width as i32);
        let y1 = self.bottom().min(bounds.height as i32);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Self::new(x0, y0, x1 - x0, y1 - y0))
    }
}

/// Ordered outline of a face region.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Polygon {
    points: Vec<Point>,
    is_rect: bool,
}

impl Polygon {
    /// Build from points; `is_rect` is derived from the shape.
    pub fn new(points: Vec<Point>) -> Self {
        let is_rect = is_axis_aligned_rect(&points);
        Self { points, is_rect }
    }

    pub fn from_rect(rect: Rect) -> Self {
        Self {
            points: rect.corners().to_vec(),
            is_rect: true,
        }
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// True when the outline is an axis-aligned rectangle.
    pub fn is_rect(&self) -> bool {
        self.is_rect
    }

    pub fn bounding_rect(&self) -> Option<Rect> {
        Rect::bounding(&self.points)
    }

    pub fn map(&self, f: impl Fn(Point) -> Point) -> Self {
        Self::new(self.points.iter().copied().map(f).collect())
    }
}

fn is_axis_aligned_rect(points: &[Point]) -> bool {
    if points.len() != 4 {
        return false;
    }
    (0..4).all(|i| {
        let a = points[i];
        let b = points[(i + 1) % 4];
        (a.x == b.x) != (a.y == b.y)
    })
}
