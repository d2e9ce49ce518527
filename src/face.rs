//! Detected faces and the two coordinate spaces they travel in.
//!
//! The engine produces faces in raw analysis space (`RawSpaceFeatures`). The
//! overlay renderer consumes preview space (`PreviewSpaceFeatures`). Keeping
//! them as distinct types means a raw sequence cannot reach the renderer and a
//! preview sequence cannot reach the application callback:
//!
//! ```compile_fail
//! use faceview_kernel::{PreviewSpaceFeatures, RawSpaceFeatures};
//!
//! fn render(_faces: &PreviewSpaceFeatures) {}
//!
//! let raw = RawSpaceFeatures::new(Vec::new());
//! render(&raw);
//! ```

use image::RgbImage;
use std::ops::Deref;

use crate::geometry::{Point, Polygon, Rect};

/// Mouth and eye positions. Either all three are known or none is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Landmarks {
    pub mouth: Point,
    pub left_eye: Point,
    pub right_eye: Point,
}

impl Landmarks {
    pub fn map(&self, f: impl Fn(Point) -> Point) -> Self {
        Self {
            mouth: f(self.mouth),
            left_eye: f(self.left_eye),
            right_eye: f(self.right_eye),
        }
    }
}

/// One detected face.
///
/// Values are never edited after the producer hands them out; transforms
/// return new features via [`FaceFeature::map_points`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FaceFeature {
    pub id: Option<i64>,
    pub polygon: Polygon,
    pub rectangle: Rect,
    pub landmarks: Option<Landmarks>,
    /// Engine confidence, engine-specific integer scale.
    pub score: Option<i32>,
    pub clarity: Option<f32>,
    /// Cropped face image, when the engine provides one.
    pub face_image: Option<RgbImage>,
    /// Feature vector consumed by `FaceEngine::compare`.
    pub embedding: Vec<f32>,
}

impl FaceFeature {
    /// Face outlined by `polygon`; the rectangle is the polygon's bounds.
    pub fn from_polygon(polygon: Polygon) -> Self {
        let rectangle = polygon.bounding_rect().unwrap_or_default();
        Self {
            polygon,
            rectangle,
            ..Self::default()
        }
    }

    pub fn from_rect(rect: Rect) -> Self {
        Self {
            polygon: Polygon::from_rect(rect),
            rectangle: rect,
            ..Self::default()
        }
    }

    pub fn with_landmarks(mut self, landmarks: Landmarks) -> Self {
        self.landmarks = Some(landmarks);
        self
    }

    pub fn with_scores(mut self, score: Option<i32>, clarity: Option<f32>) -> Self {
        self.score = score;
        self.clarity = clarity;
        self
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    /// Copy of this face with every coordinate passed through `f`.
    ///
    /// The rectangle is rebuilt from its mapped corners so rotations keep it
    /// axis-aligned.
    pub fn map_points(&self, f: impl Fn(Point) -> Point) -> Self {
        let corners = self.rectangle.corners().map(&f);
        Self {
            id: self.id,
            polygon: self.polygon.map(&f),
            rectangle: Rect::bounding(&corners).unwrap_or_default(),
            landmarks: self.landmarks.map(|l| l.map(&f)),
            score: self.score,
            clarity: self.clarity,
            face_image: self.face_image.clone(),
            embedding: self.embedding.clone(),
        }
    }
}

macro_rules! feature_space {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Default, PartialEq)]
        pub struct $name(Vec<FaceFeature>);

        impl $name {
            pub fn new(features: Vec<FaceFeature>) -> Self {
                Self(features)
            }

            pub fn empty() -> Self {
                Self(Vec::new())
            }

            pub fn into_inner(self) -> Vec<FaceFeature> {
                self.0
            }
        }

        impl Deref for $name {
            type Target = [FaceFeature];

            fn deref(&self) -> &[FaceFeature] {
                &self.0
            }
        }

        impl FromIterator<FaceFeature> for $name {
            fn from_iter<I: IntoIterator<Item = FaceFeature>>(iter: I) -> Self {
                Self(iter.into_iter().collect())
            }
        }
    };
}

feature_space!(
    /// Faces in the coordinate space of the analyzed frame.
    RawSpaceFeatures
);
feature_space!(
    /// Faces rotated and scaled into the portrait preview.
    PreviewSpaceFeatures
);
