//! Raster buffers, data URLs and the compositor

pub mod compositor;
pub mod data_url;

pub use compositor::{crop, stitch, stitch_with_overlap, DEFAULT_OVERLAP};
pub use data_url::DataUrl;

use crate::detect::Color;
use crate::{Error, Result};

/// An RGBA8 pixel buffer tagged with the device pixel ratio it was captured
/// at. Moved from producer to consumer, never shared.
#[derive(Debug, Clone, PartialEq)]
pub struct RawImage {
    width: u32,
    height: u32,
    device_pixel_ratio: f64,
    pixels: Vec<u8>,
}

impl RawImage {
    pub fn new(width: u32, height: u32, device_pixel_ratio: f64, pixels: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(Error::Other(format!(
                "pixel buffer of {} bytes does not match {}x{}",
                pixels.len(),
                width,
                height
            )));
        }
        Ok(Self { width, height, device_pixel_ratio, pixels })
    }

    /// A solid image.
    pub fn filled(width: u32, height: u32, device_pixel_ratio: f64, color: Color) -> Self {
        let px = [color.r, color.g, color.b, color.a];
        let pixels = px.iter().copied().cycle().take(width as usize * height as usize * 4).collect();
        Self { width, height, device_pixel_ratio, pixels }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn device_pixel_ratio(&self) -> f64 {
        self.device_pixel_ratio
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        [self.pixels[i], self.pixels[i + 1], self.pixels[i + 2], self.pixels[i + 3]]
    }

    /// Byte slice of `len` pixels starting at `(x, y)`.
    pub(crate) fn span(&self, x: u32, y: u32, len: u32) -> &[u8] {
        let start = (y as usize * self.width as usize + x as usize) * 4;
        &self.pixels[start..start + len as usize * 4]
    }

    pub(crate) fn span_mut(&mut self, x: u32, y: u32, len: u32) -> &mut [u8] {
        let start = (y as usize * self.width as usize + x as usize) * 4;
        &mut self.pixels[start..start + len as usize * 4]
    }

    /// Fill a clamped device-pixel rectangle with a solid colour.
    pub fn fill_rect(&mut self, x: u32, y: u32, width: u32, height: u32, color: Color) {
        let x1 = (x + width).min(self.width);
        let y1 = (y + height).min(self.height);
        if x >= x1 || y >= y1 {
            return;
        }
        let px = [color.r, color.g, color.b, color.a];
        for row in y..y1 {
            for chunk in self.span_mut(x, row, x1 - x).chunks_exact_mut(4) {
                chunk.copy_from_slice(&px);
            }
        }
    }
}
