//! Rectangles in CSS pixels and their device-pixel counterparts

use serde::{Deserialize, Serialize};

use crate::Viewport;

/// An axis-aligned rectangle in CSS pixels (viewport- or page-relative
/// depending on where it came from).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    /// At least partially inside the viewport.
    pub fn intersects_viewport(&self, viewport: Viewport) -> bool {
        self.bottom() > 0.0 && self.right() > 0.0 && self.y < viewport.height && self.x < viewport.width
    }

    /// Shift by a page scroll offset.
    pub fn translate(&self, dx: f64, dy: f64) -> Rect {
        Rect { x: self.x + dx, y: self.y + dy, ..*self }
    }

    /// Normalize a pointer drag in any direction into a positive-size rect.
    pub fn from_drag(start: (f64, f64), end: (f64, f64)) -> Rect {
        let x = start.0.min(end.0);
        let y = start.1.min(end.1);
        Rect {
            x,
            y,
            width: start.0.max(end.0) - x,
            height: start.1.max(end.1) - y,
        }
    }

    /// Scale every coordinate by the device pixel ratio, rounding to whole
    /// device pixels.
    pub fn to_device(&self, device_pixel_ratio: f64) -> DeviceRect {
        DeviceRect {
            x: (self.x * device_pixel_ratio).round() as i64,
            y: (self.y * device_pixel_ratio).round() as i64,
            width: (self.width * device_pixel_ratio).round().max(0.0) as i64,
            height: (self.height * device_pixel_ratio).round().max(0.0) as i64,
        }
    }
}

/// A rectangle in whole device pixels. May extend past an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceRect {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

impl DeviceRect {
    /// Clamp to `[0, width) x [0, height)`. Returns `None` when nothing is
    /// left.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = self.x.clamp(0, width as i64);
        let y0 = self.y.clamp(0, height as i64);
        let x1 = (self.x + self.width).clamp(0, width as i64);
        let y1 = (self.y + self.height).clamp(0, height as i64);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
    }

    /// Like [`clamp_to`](Self::clamp_to), but the origin is pinned inside the
    /// image and each side keeps at least one pixel, so a rectangle past an
    /// edge becomes a sliver of that edge. `None` only for an empty image.
    pub fn clamp_to_edge(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        if width == 0 || height == 0 {
            return None;
        }
        let (w, h) = (width as i64, height as i64);
        let x0 = self.x.clamp(0, w - 1);
        let y0 = self.y.clamp(0, h - 1);
        let x1 = (self.x + self.width).clamp(x0 + 1, w);
        let y1 = (self.y + self.height).clamp(y0 + 1, h);
        Some((x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
    }
}
