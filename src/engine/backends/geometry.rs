use anyhow::Result;

use crate::annotation::parse_face_features;
use crate::engine::backend::{EngineCapability, FaceEngine};
use crate::face::RawSpaceFeatures;
use crate::frame::FrameView;

/// Engine that only reads device geometry annotations.
///
/// With the annotation detached it sees nothing, which makes it a cheap way
/// to run the pipeline on cameras that detect faces themselves.
#[derive(Default)]
pub struct GeometryEngine;

impl GeometryEngine {
    pub fn new() -> Self {
        Self
    }
}

impl FaceEngine for GeometryEngine {
    fn name(&self) -> &'static str {
        "geometry"
    }

    fn supports(&self, capability: EngineCapability) -> bool {
        matches!(capability, EngineCapability::DeviceHints)
    }

    fn analyze(&mut self, frame: &FrameView<'_>) -> Result<RawSpaceFeatures> {
        Ok(frame
            .geometry()
            .map(parse_face_features)
            .unwrap_or_default())
    }
}
