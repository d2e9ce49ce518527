//! Drawing surface seam between the renderer and the UI.
//!
//! The UI owns a `RenderSurface`. Each render locks a `Canvas`, draws, and
//! hands the canvas back through `unlock_and_post`, which publishes the frame.
//! `DisplayListSurface` is the in-process implementation: it records draw
//! operations into a back buffer and flips them to readers on post.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::geometry::Size;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const TRANSPARENT: Color = Color::rgba(0, 0, 0, 0);
    pub const BLACK: Color = Color::rgba(0, 0, 0, 255);
    pub const YELLOW: Color = Color::rgba(255, 255, 0, 255);
    pub const GREEN: Color = Color::rgba(0, 255, 0, 255);
    pub const BLUE: Color = Color::rgba(0, 0, 255, 255);

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub enum PaintStyle {
    Stroke,
    Fill,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Paint {
    pub color: Color,
    pub style: PaintStyle,
    pub stroke_width: f32,
    pub text_size: f32,
}

impl Paint {
    pub const fn stroke(color: Color, width: f32) -> Self {
        Self {
            color,
            style: PaintStyle::Stroke,
            stroke_width: width,
            text_size: 0.0,
        }
    }

    pub const fn text(color: Color, size: f32) -> Self {
        Self {
            color,
            style: PaintStyle::Fill,
            stroke_width: 5.0,
            text_size: size,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct DisplayPoint {
    pub x: f32,
    pub y: f32,
}

impl DisplayPoint {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct DisplayRect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

pub trait Canvas {
    fn size(&self) -> Size;
    /// Fill the whole canvas with `color`, replacing what is there.
    fn clear(&mut self, color: Color);
    fn draw_line(&mut self, from: DisplayPoint, to: DisplayPoint, paint: &Paint) -> Result<()>;
    fn draw_rect(&mut self, rect: DisplayRect, paint: &Paint) -> Result<()>;
    fn draw_text(&mut self, text: &str, at: DisplayPoint, paint: &Paint) -> Result<()>;
}

pub trait RenderSurface: Send {
    /// `Ok(None)` when no drawable is available right now (surface gone,
    /// not sized yet). Every returned canvas must come back through
    /// `unlock_and_post`.
    fn lock_canvas(&mut self) -> Result<Option<Box<dyn Canvas + Send>>>;
    fn unlock_and_post(&mut self, canvas: Box<dyn Canvas + Send>);
}

// ----------------------------------------------------------------------------
// Display list surface
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DrawOp {
    Clear {
        color: Color,
    },
    Line {
        from: DisplayPoint,
        to: DisplayPoint,
        paint: Paint,
    },
    Rect {
        rect: DisplayRect,
        paint: Paint,
    },
    Text {
        text: String,
        at: DisplayPoint,
        paint: Paint,
    },
}

#[derive(Default)]
struct SurfaceBuffers {
    size: Size,
    back: Vec<DrawOp>,
    front: Vec<DrawOp>,
    locked: bool,
    posts: u64,
}

fn lock_buffers(buffers: &Mutex<SurfaceBuffers>) -> MutexGuard<'_, SurfaceBuffers> {
    buffers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Surface that records draw operations.
pub struct DisplayListSurface {
    buffers: Arc<Mutex<SurfaceBuffers>>,
}

/// UI-side handle of a [`DisplayListSurface`]: resize it and read posted frames.
#[derive(Clone)]
pub struct DisplayListHandle {
    buffers: Arc<Mutex<SurfaceBuffers>>,
}

impl DisplayListSurface {
    pub fn new(size: Size) -> (Self, DisplayListHandle) {
        let buffers = Arc::new(Mutex::new(SurfaceBuffers {
            size,
            ..SurfaceBuffers::default()
        }));
        (
            Self {
                buffers: buffers.clone(),
            },
            DisplayListHandle { buffers },
        )
    }
}

impl DisplayListHandle {
    pub fn resize(&self, size: Size) {
        lock_buffers(&self.buffers).size = size;
    }

    /// Operations of the last posted frame.
    pub fn latest(&self) -> Vec<DrawOp> {
        lock_buffers(&self.buffers).front.clone()
    }

    pub fn posts(&self) -> u64 {
        lock_buffers(&self.buffers).posts
    }

    pub fn is_locked(&self) -> bool {
        lock_buffers(&self.buffers).locked
    }
}

impl RenderSurface for DisplayListSurface {
    fn lock_canvas(&mut self) -> Result<Option<Box<dyn Canvas + Send>>> {
        let mut buffers = lock_buffers(&self.buffers);
        if buffers.locked {
            return Err(anyhow!("surface already locked"));
        }
        if buffers.size.is_empty() {
            return Ok(None);
        }
        buffers.locked = true;
        buffers.back.clear();
        let canvas: Box<dyn Canvas + Send> = Box::new(RecordingCanvas {
            size: buffers.size,
            buffers: self.buffers.clone(),
        });
        Ok(Some(canvas))
    }

    fn unlock_and_post(&mut self, canvas: Box<dyn Canvas + Send>) {
        drop(canvas);
        let mut buffers = lock_buffers(&self.buffers);
        let back = std::mem::take(&mut buffers.back);
        buffers.front = back;
        buffers.locked = false;
        buffers.posts += 1;
    }
}

struct RecordingCanvas {
    size: Size,
    buffers: Arc<Mutex<SurfaceBuffers>>,
}

impl RecordingCanvas {
    fn push(&self, op: DrawOp) {
        lock_buffers(&self.buffers).back.push(op);
    }
}

impl Canvas for RecordingCanvas {
    fn size(&self) -> Size {
        self.size
    }

    fn clear(&mut self, color: Color) {
        let mut buffers = lock_buffers(&self.buffers);
        buffers.back.clear();
        buffers.back.push(DrawOp::Clear { color });
    }

    fn draw_line(&mut self, from: DisplayPoint, to: DisplayPoint, paint: &Paint) -> Result<()> {
        self.push(DrawOp::Line {
            from,
            to,
            paint: *paint,
        });
        Ok(())
    }

    fn draw_rect(&mut self, rect: DisplayRect, paint: &Paint) -> Result<()> {
        self.push(DrawOp::Rect { rect, paint: *paint });
        Ok(())
    }

    fn draw_text(&mut self, text: &str, at: DisplayPoint, paint: &Paint) -> Result<()> {
        self.push(DrawOp::Text {
            text: text.to_string(),
            at,
            paint: *paint,
        });
        Ok(())
    }
}
