//! Frame containers.
//!
//! - `RawFrame`: camera-native pixels plus capture annotations. Not `Clone`;
//!   exactly one stage owns it at a time. Pixels are zeroized on drop.
//! - `FrameView`: borrowed read-only view handed to face engines. Engines can
//!   read pixels and annotations for the duration of the call but cannot take
//!   the frame or edit its annotations.
//! - `AnalyzedFrame`: the RGB rendition consumed by the renderer and by
//!   application callbacks. Immutable once built.

use anyhow::{anyhow, Result};
use image::RgbImage;
use zeroize::Zeroize;

use crate::annotation::GeometryGraph;
use crate::geometry::{Point, Rect, Size};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    /// Y plane followed by interleaved V/U at quarter resolution (Android camera default).
    Nv21,
    /// Y plane followed by interleaved U/V at quarter resolution.
    Nv12,
    Rgb24,
}

impl PixelFormat {
    pub fn frame_len(self, width: u32, height: u32) -> Result<usize> {
        let pixels = (width as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        match self {
            PixelFormat::Nv21 | PixelFormat::Nv12 => {
                if width % 2 != 0 || height % 2 != 0 {
                    return Err(anyhow!(
                        "{:?} frames need even dimensions, got {}x{}",
                        self,
                        width,
                        height
                    ));
                }
                Ok(pixels + pixels / 2)
            }
            PixelFormat::Rgb24 => pixels
                .checked_mul(3)
                .ok_or_else(|| anyhow!("frame dimensions overflow")),
        }
    }
}

/// Clockwise rotation that turns the frame content upright.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Orientation {
    Upright,
    Clockwise90,
    Clockwise180,
    Clockwise270,
}

impl Orientation {
    pub fn from_degrees(degrees: i32) -> Option<Self> {
        match degrees.rem_euclid(360) {
            0 => Some(Self::Upright),
            90 => Some(Self::Clockwise90),
            180 => Some(Self::Clockwise180),
            270 => Some(Self::Clockwise270),
            _ => None,
        }
    }

    pub fn degrees(self) -> i32 {
        self.quarter_turns() as i32 * 90
    }

    pub fn quarter_turns(self) -> u8 {
        match self {
            Self::Upright => 0,
            Self::Clockwise90 => 1,
            Self::Clockwise180 => 2,
            Self::Clockwise270 => 3,
        }
    }
}

/// Rotate a point `quarter_turns` times clockwise inside a frame of `size`.
pub fn rotate_point(p: Point, size: Size, quarter_turns: u8) -> Point {
    let (w, h) = (size.width as i32, size.height as i32);
    match quarter_turns % 4 {
        1 => Point::new(h - p.y, p.x),
        2 => Point::new(w - p.x, h - p.y),
        3 => Point::new(p.y, w - p.x),
        _ => p,
    }
}

/// Dimensions and rotation annotation of the frame the engine analyzed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameGeometry {
    pub size: Size,
    pub degree: Option<i32>,
}

// ----------------------------------------------------------------------------
// RawFrame
// ----------------------------------------------------------------------------

pub struct RawFrame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    format: PixelFormat,
    timestamp: u64,
    orientation: Option<Orientation>,
    degree: Option<i32>,
    geometry: Option<GeometryGraph>,
}

impl RawFrame {
    /// Wrap camera pixels. Fails when the buffer does not match the format.
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
        timestamp: u64,
    ) -> Result<Self> {
        let expected = format.frame_len(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "{:?} frame length mismatch: expected {}, got {}",
                format,
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            format,
            timestamp,
            orientation: None,
            degree: None,
            geometry: None,
        })
    }

    pub fn with_orientation(mut self, orientation: Orientation) -> Self {
        self.orientation = Some(orientation);
        self
    }

    pub fn with_degree(mut self, degree: i32) -> Self {
        self.degree = Some(degree);
        self
    }

    pub fn with_geometry(mut self, geometry: GeometryGraph) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn orientation(&self) -> Option<Orientation> {
        self.orientation
    }

    pub fn degree(&self) -> Option<i32> {
        self.degree
    }

    pub fn geometry(&self) -> Option<&GeometryGraph> {
        self.geometry.as_ref()
    }

    pub fn frame_geometry(&self) -> FrameGeometry {
        FrameGeometry {
            size: self.size(),
            degree: self.degree,
        }
    }

    pub fn clear_degree(&mut self) {
        self.degree = None;
    }

    /// Remove the device annotation so the engine sees pixel content only.
    pub fn detach_geometry(&mut self) -> Option<GeometryGraph> {
        self.geometry.take()
    }

    pub fn reattach_geometry(&mut self, geometry: Option<GeometryGraph>) {
        self.geometry = geometry;
    }

    /// Rotate pixels (and annotation points) so the content is upright, then
    /// drop the orientation hint. The applied turns are taken off the degree
    /// annotation so preview mapping does not rotate a second time. No-op
    /// without a hint.
    pub fn rotate_upright(&mut self) {
        let Some(orientation) = self.orientation.take() else {
            return;
        };
        let turns = orientation.quarter_turns();
        if turns == 0 {
            return;
        }
        let size = self.size();
        let rotated = match self.format {
            PixelFormat::Rgb24 => rotate_plane(&self.data, size, 3, turns),
            PixelFormat::Nv21 | PixelFormat::Nv12 => {
                let y_len = (size.width * size.height) as usize;
                let chroma = Size::new(size.width / 2, size.height / 2);
                let mut out = rotate_plane(&self.data[..y_len], size, 1, turns);
                out.extend(rotate_plane(&self.data[y_len..], chroma, 2, turns));
                out
            }
        };
        let mut old = std::mem::replace(&mut self.data, rotated);
        old.zeroize();
        if turns % 2 == 1 {
            std::mem::swap(&mut self.width, &mut self.height);
        }
        self.geometry = self
            .geometry
            .as_ref()
            .map(|graph| graph.map_points(&|p| rotate_point(p, size, turns)));
        self.degree = self
            .degree
            .map(|degree| (degree - orientation.degrees()).rem_euclid(360));
    }

    /// Restricted view for the face engine.
    pub fn view(&self) -> FrameView<'_> {
        FrameView { frame: self }
    }

    /// RGB rendition for rendering and callbacks.
    pub fn to_rgb(&self) -> Result<AnalyzedFrame> {
        let rgb = match self.format {
            PixelFormat::Rgb24 => self.data.clone(),
            PixelFormat::Nv21 => yuv420sp_to_rgb(&self.data, self.width, self.height, true),
            PixelFormat::Nv12 => yuv420sp_to_rgb(&self.data, self.width, self.height, false),
        };
        let image = RgbImage::from_raw(self.width, self.height, rgb)
            .ok_or_else(|| anyhow!("RGB buffer does not match {}x{}", self.width, self.height))?;
        Ok(AnalyzedFrame {
            image,
            timestamp: self.timestamp,
            orientation: self.orientation,
            degree: self.degree,
            geometry: self.geometry.clone(),
        })
    }
}

impl Drop for RawFrame {
    fn drop(&mut self) {
        // Camera frames carry faces; don't leave them in freed memory.
        self.data.zeroize();
    }
}

fn rotate_plane(src: &[u8], size: Size, bpp: usize, turns: u8) -> Vec<u8> {
    let (w, h) = (size.width as usize, size.height as usize);
    let mut dst = vec![0u8; src.len()];
    for y in 0..h {
        for x in 0..w {
            let (dx, dy, dw) = match turns % 4 {
                1 => (h - 1 - y, x, h),
                2 => (w - 1 - x, h - 1 - y, w),
                3 => (y, w - 1 - x, h),
                _ => (x, y, w),
            };
            let s = (y * w + x) * bpp;
            let d = (dy * dw + dx) * bpp;
            dst[d..d + bpp].copy_from_slice(&src[s..s + bpp]);
        }
    }
    dst
}

fn yuv420sp_to_rgb(pixels: &[u8], width: u32, height: u32, vu_order: bool) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;
    let y_plane = w * h;
    let mut rgb = vec![0u8; y_plane * 3];
    for j in 0..h {
        for i in 0..w {
            let y = pixels[j * w + i] as f32;
            let uv_index = y_plane + (j / 2) * w + (i / 2) * 2;
            let (u, v) = if vu_order {
                (pixels[uv_index + 1], pixels[uv_index])
            } else {
                (pixels[uv_index], pixels[uv_index + 1])
            };
            let u = u as f32 - 128.0;
            let v = v as f32 - 128.0;

            let r = y + 1.402_f32 * v;
            let g = y - 0.344_136_f32 * u - 0.714_136_f32 * v;
            let b = y + 1.772_f32 * u;

            let offset = (j * w + i) * 3;
            rgb[offset] = clamp_to_u8(r);
            rgb[offset + 1] = clamp_to_u8(g);
            rgb[offset + 2] = clamp_to_u8(b);
        }
    }
    rgb
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

// ----------------------------------------------------------------------------
// FrameView
// ----------------------------------------------------------------------------

/// Read-only frame access for face engines.
pub struct FrameView<'a> {
    frame: &'a RawFrame,
}

impl<'a> FrameView<'a> {
    pub fn width(&self) -> u32 {
        self.frame.width
    }

    pub fn height(&self) -> u32 {
        self.frame.height
    }

    pub fn format(&self) -> PixelFormat {
        self.frame.format
    }

    pub fn pixels(&self) -> &'a [u8] {
        &self.frame.data
    }

    pub fn degree(&self) -> Option<i32> {
        self.frame.degree
    }

    /// Device annotation, absent when the pipeline detached it.
    pub fn geometry(&self) -> Option<&'a GeometryGraph> {
        self.frame.geometry.as_ref()
    }

    /// Luma at `(x, y)`; for RGB frames the BT.601 weighted sum.
    pub fn luma(&self, x: u32, y: u32) -> u8 {
        let w = self.frame.width as usize;
        let idx = y as usize * w + x as usize;
        match self.frame.format {
            PixelFormat::Nv21 | PixelFormat::Nv12 => self.frame.data[idx],
            PixelFormat::Rgb24 => {
                let px = &self.frame.data[idx * 3..idx * 3 + 3];
                clamp_to_u8(0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32)
            }
        }
    }
}

// ----------------------------------------------------------------------------
// AnalyzedFrame
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct AnalyzedFrame {
    image: RgbImage,
    timestamp: u64,
    orientation: Option<Orientation>,
    degree: Option<i32>,
    geometry: Option<GeometryGraph>,
}

impl AnalyzedFrame {
    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn size(&self) -> Size {
        Size::new(self.width(), self.height())
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn orientation(&self) -> Option<Orientation> {
        self.orientation
    }

    pub fn degree(&self) -> Option<i32> {
        self.degree
    }

    pub fn geometry(&self) -> Option<&GeometryGraph> {
        self.geometry.as_ref()
    }

    pub fn frame_geometry(&self) -> FrameGeometry {
        FrameGeometry {
            size: self.size(),
            degree: self.degree,
        }
    }

    /// Copy of the pixels inside `rect`, clipped to the frame.
    pub fn crop(&self, rect: Rect) -> Option<RgbImage> {
        let r = rect.clamp_to(self.size())?;
        Some(
            image::imageops::crop_imm(
                &self.image,
                r.x as u32,
                r.y as u32,
                r.width as u32,
                r.height as u32,
            )
            .to_image(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgb_frame(width: u32, height: u32) -> RawFrame {
        let data = (0..width * height)
            .flat_map(|i| [i as u8, 0, 0])
            .collect::<Vec<_>>();
        RawFrame::new(data, width, height, PixelFormat::Rgb24, 1).unwrap()
    }

    #[test]
    fn rejects_mismatched_length() {
        assert!(RawFrame::new(vec![0u8; 5], 2, 2, PixelFormat::Rgb24, 0).is_err());
        assert!(RawFrame::new(vec![0u8; 6], 2, 2, PixelFormat::Nv21, 0).is_ok());
        assert!(RawFrame::new(vec![0u8; 9], 3, 2, PixelFormat::Nv12, 0).is_err());
    }

    #[test]
    fn nv21_gray_converts_to_gray() -> Result<()> {
        let frame = RawFrame::new(vec![128u8; 6], 2, 2, PixelFormat::Nv21, 0)?;
        let rgb = frame.to_rgb()?;
        assert_eq!(rgb.image().as_raw(), &vec![128u8; 12]);
        Ok(())
    }

    #[test]
    fn nv21_and_nv12_swap_chroma() -> Result<()> {
        // Y=128, first chroma byte 128+50, second 128.
        let data = vec![128, 128, 128, 128, 178, 128];
        let nv21 = RawFrame::new(data.clone(), 2, 2, PixelFormat::Nv21, 0)?.to_rgb()?;
        let nv12 = RawFrame::new(data, 2, 2, PixelFormat::Nv12, 0)?.to_rgb()?;
        // NV21: V=+50 raises red. NV12: U=+50 raises blue.
        assert!(nv21.image().get_pixel(0, 0)[0] > 128);
        assert!(nv12.image().get_pixel(0, 0)[2] > 128);
        Ok(())
    }

    #[test]
    fn rotate_upright_turns_pixels_and_clears_hint() -> Result<()> {
        // 3x2 frame, red channel holds the pixel index.
        let mut frame = rgb_frame(3, 2).with_orientation(Orientation::Clockwise90);
        frame.rotate_upright();
        assert_eq!(frame.size(), Size::new(2, 3));
        assert_eq!(frame.orientation(), None);
        let rgb = frame.to_rgb()?;
        // Clockwise: bottom-left source pixel (index 3) lands top-left.
        assert_eq!(rgb.image().get_pixel(0, 0)[0], 3);
        assert_eq!(rgb.image().get_pixel(1, 0)[0], 0);
        assert_eq!(rgb.image().get_pixel(1, 2)[0], 2);
        Ok(())
    }

    #[test]
    fn rotate_upright_rotates_annotation_points() {
        let graph = GeometryGraph::new("root").with_points(vec![Point::new(1, 0)]);
        let mut frame = rgb_frame(4, 2)
            .with_orientation(Orientation::Clockwise180)
            .with_geometry(graph);
        frame.rotate_upright();
        assert_eq!(frame.geometry().unwrap().points, vec![Point::new(3, 2)]);
    }

    #[test]
    fn rotate_upright_consumes_matching_degree() {
        let mut frame = rgb_frame(4, 2)
            .with_orientation(Orientation::Clockwise90)
            .with_degree(90);
        frame.rotate_upright();
        assert_eq!(frame.degree(), Some(0));

        let mut frame = rgb_frame(4, 2)
            .with_orientation(Orientation::Clockwise90)
            .with_degree(0);
        frame.rotate_upright();
        assert_eq!(frame.degree(), Some(270));
    }

    #[test]
    fn rotate_nv12_keeps_planes_consistent() {
        let mut data = vec![0u8; 4 * 2];
        data[0] = 200; // top-left luma
        data.extend([10, 20, 30, 40]); // two chroma pairs
        let mut frame = RawFrame::new(data, 4, 2, PixelFormat::Nv12, 0)
            .unwrap()
            .with_orientation(Orientation::Clockwise270);
        frame.rotate_upright();
        assert_eq!(frame.size(), Size::new(2, 4));
        // Counter-clockwise: top-left goes to bottom-left.
        let view = frame.view();
        assert_eq!(view.luma(0, 3), 200);
        // Right chroma pair moves to the top.
        assert_eq!(&view.pixels()[8..], &[30, 40, 10, 20]);
    }

    #[test]
    fn orientation_from_degrees_normalizes() {
        assert_eq!(Orientation::from_degrees(-90), Some(Orientation::Clockwise270));
        assert_eq!(Orientation::from_degrees(450), Some(Orientation::Clockwise90));
        assert_eq!(Orientation::from_degrees(45), None);
    }

    #[test]
    fn crop_clips_to_frame() -> Result<()> {
        let rgb = rgb_frame(4, 4).to_rgb()?;
        let cut = rgb.crop(Rect::new(2, 2, 10, 10)).unwrap();
        assert_eq!(cut.dimensions(), (2, 2));
        assert!(rgb.crop(Rect::new(10, 10, 2, 2)).is_none());
        Ok(())
    }
}
