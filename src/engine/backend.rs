use anyhow::{anyhow, Result};

use crate::face::{FaceFeature, PreviewSpaceFeatures, RawSpaceFeatures};
use crate::frame::{FrameGeometry, FrameView};
use crate::geometry::Size;

use super::preview::adjust_for_preview;

/// What an engine can do.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineCapability {
    /// Find faces from pixel content alone.
    PixelDetection,
    /// Turn device geometry annotations into faces.
    DeviceHints,
    /// Score two faces for same-person similarity.
    Comparison,
}

/// Face engine trait.
///
/// Engines are black boxes to the pipeline: pixels in, faces out. The frame
/// arrives as a borrowed `FrameView`; implementations must not retain pixel
/// data past the `analyze` call.
pub trait FaceEngine: Send {
    /// Engine identifier used by configuration.
    fn name(&self) -> &'static str;

    fn supports(&self, capability: EngineCapability) -> bool;

    /// Detect faces. Output coordinates are in the view's pixel space.
    fn analyze(&mut self, frame: &FrameView<'_>) -> Result<RawSpaceFeatures>;

    /// Rotate and scale raw faces into the portrait preview.
    fn adjust_for_preview(
        &self,
        features: &RawSpaceFeatures,
        source: FrameGeometry,
        preview: Size,
    ) -> PreviewSpaceFeatures {
        adjust_for_preview(features, source, preview)
    }

    /// Similarity in `[0, 1]`.
    fn compare(&self, a: &FaceFeature, b: &FaceFeature) -> Result<f32> {
        embedding_similarity(&a.embedding, &b.embedding)
    }

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Cosine similarity of two embeddings, clamped into `[0, 1]`.
pub fn embedding_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.is_empty() || b.is_empty() {
        return Err(anyhow!("face has no embedding to compare"));
    }
    if a.len() != b.len() {
        return Err(anyhow!(
            "embedding length mismatch: {} vs {}",
            a.len(),
            b.len()
        ));
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return Ok(0.0);
    }
    Ok((dot / (na * nb)).clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn similarity_is_cosine() -> Result<()> {
        assert!((embedding_similarity(&[1.0, 0.0], &[2.0, 0.0])? - 1.0).abs() < 1e-6);
        assert_eq!(embedding_similarity(&[1.0, 0.0], &[0.0, 1.0])?, 0.0);
        assert_eq!(embedding_similarity(&[1.0, 0.0], &[-1.0, 0.0])?, 0.0);
        assert!(embedding_similarity(&[], &[1.0]).is_err());
        assert!(embedding_similarity(&[1.0], &[1.0, 2.0]).is_err());
        Ok(())
    }
}
