//! Device geometry annotations.
//!
//! Some camera stacks run their own face detector and attach the result to
//! the frame as a small tree of named shapes. The root holds a `face` group;
//! every child of that group is one face outline whose own children name the
//! mouth and eye points.
//!
//! The tree is opaque to the pipeline apart from [`parse_face_features`]; it
//! is carried byte-for-byte between detaching and reattaching.

use serde::{Deserialize, Serialize};

use crate::face::{FaceFeature, Landmarks, RawSpaceFeatures};
use crate::geometry::{Point, Polygon};

pub const FACE_GROUP: &str = "face";
pub const MOUTH_POINT: &str = "face.mouth";
pub const LEFT_EYE_POINT: &str = "face.left_eye";
pub const RIGHT_EYE_POINT: &str = "face.right_eye";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeometryGraph {
    #[serde(default)]
    pub id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub score: Option<i32>,
    #[serde(default)]
    pub points: Vec<Point>,
    #[serde(default)]
    pub children: Vec<GeometryGraph>,
}

impl GeometryGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_points(mut self, points: Vec<Point>) -> Self {
        self.points = points;
        self
    }

    pub fn with_child(mut self, child: GeometryGraph) -> Self {
        self.children.push(child);
        self
    }

    /// Depth-first search for the first node called `name`, this node included.
    pub fn find(&self, name: &str) -> Option<&GeometryGraph> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(name))
    }

    /// The node read as a single point (its first point).
    pub fn as_point(&self) -> Option<Point> {
        self.points.first().copied()
    }

    /// Copy of the tree with every point passed through `f`.
    pub fn map_points(&self, f: &impl Fn(Point) -> Point) -> Self {
        Self {
            id: self.id,
            name: self.name.clone(),
            score: self.score,
            points: self.points.iter().copied().map(f).collect(),
            children: self.children.iter().map(|c| c.map_points(f)).collect(),
        }
    }
}

/// Faces described by a device annotation, in the frame's raw space.
///
/// Returns an empty sequence when the tree has no `face` group. Landmarks are
/// only set when all three named points are present.
pub fn parse_face_features(root: &GeometryGraph) -> RawSpaceFeatures {
    let Some(faces) = root.find(FACE_GROUP) else {
        return RawSpaceFeatures::empty();
    };
    faces
        .children
        .iter()
        .filter(|face| !face.points.is_empty())
        .map(|face| {
            let mut feature = FaceFeature::from_polygon(Polygon::new(face.points.clone()));
            feature.id = face.id;
            feature.score = face.score;
            feature.landmarks = parse_landmarks(face);
            feature
        })
        .collect()
}

fn parse_landmarks(face: &GeometryGraph) -> Option<Landmarks> {
    let (mut mouth, mut left_eye, mut right_eye) = (None, None, None);
    for part in &face.children {
        match part.name.as_str() {
            MOUTH_POINT => mouth = part.as_point(),
            LEFT_EYE_POINT => left_eye = part.as_point(),
            RIGHT_EYE_POINT => right_eye = part.as_point(),
            _ => {}
        }
    }
    Some(Landmarks {
        mouth: mouth?,
        left_eye: left_eye?,
        right_eye: right_eye?,
    })
}
