//! Crop and stitch over RGBA buffers

use crate::geometry::Rect;
use crate::raster::RawImage;
use crate::{Error, Result};

/// Vertical band, in CSS pixels, shared by consecutive full-page tiles.
pub const DEFAULT_OVERLAP: f64 = 50.0;

/// Crop `image` to a logical rectangle.
///
/// Coordinates are multiplied by `device_pixel_ratio` before sampling. A
/// rectangle reaching past the image is shrunk to the image bounds; one
/// lying wholly outside yields a one-pixel sliver of the nearest edge.
pub fn crop(image: &RawImage, rect: Rect, device_pixel_ratio: f64) -> Result<RawImage> {
    let device = rect.to_device(device_pixel_ratio);
    let (x, y, width, height) = device
        .clamp_to_edge(image.width(), image.height())
        .ok_or_else(|| Error::CropFailed("source image is empty".into()))?;

    let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
    for row in y..y + height {
        pixels.extend_from_slice(image.span(x, row, width));
    }
    RawImage::new(width, height, image.device_pixel_ratio(), pixels)
}

/// Stitch full-viewport tiles captured top to bottom with the default
/// overlap.
pub fn stitch(tiles: &[RawImage], viewport_height: f64, total_height: f64, device_pixel_ratio: f64) -> Result<RawImage> {
    stitch_with_overlap(tiles, viewport_height, total_height, device_pixel_ratio, DEFAULT_OVERLAP)
}

/// Stitch tiles into one image `round(total_height * dpr)` tall and as wide
/// as the first tile.
///
/// Tile `i` was captured at scroll `i * (viewport_height - overlap)`; it
/// lands at that offset scaled by `dpr` and rounded once, so fractional
/// ratios do not accumulate drift. Each tile but the last contributes the
/// rows up to the next tile's offset. The last tile was usually captured at
/// a scroll position clamped short of a full step, so only its bottom
/// `remaining` rows are drawn, ending at the output's bottom edge.
pub fn stitch_with_overlap(
    tiles: &[RawImage],
    viewport_height: f64,
    total_height: f64,
    device_pixel_ratio: f64,
    overlap: f64,
) -> Result<RawImage> {
    let first = tiles.first().ok_or(Error::EmptyInput)?;

    let out_width = first.width();
    let out_height = (total_height * device_pixel_ratio).round().max(0.0) as u32;
    let step = viewport_height - overlap;
    if (step * device_pixel_ratio).round() <= 0.0 && tiles.len() > 1 {
        return Err(Error::StitchFailed(format!(
            "viewport height {} does not exceed overlap {}",
            viewport_height, overlap
        )));
    }
    let offset_of = |i: usize| ((i as f64 * step) * device_pixel_ratio).round().max(0.0) as u64;

    let mut out = RawImage::new(out_width, out_height, device_pixel_ratio, vec![0; out_width as usize * out_height as usize * 4])?;
    let last = tiles.len() - 1;

    for (i, tile) in tiles.iter().enumerate() {
        let offset = offset_of(i);
        if offset >= out_height as u64 {
            log::warn!("tile {} starts below the output ({} >= {}); skipped", i, offset, out_height);
            continue;
        }
        let offset = offset as u32;
        let width = tile.width().min(out_width);

        let (src_y, rows) = if i == last {
            let remaining = out_height - offset;
            (tile.height().saturating_sub(remaining), remaining.min(tile.height()))
        } else {
            let span = (offset_of(i + 1) - offset as u64).min(u32::MAX as u64) as u32;
            (0, span.min(tile.height()).min(out_height - offset))
        };

        for r in 0..rows {
            out.span_mut(0, offset + r, width).copy_from_slice(tile.span(0, src_y + r, width));
        }
    }

    log::debug!("stitched {} tiles into {}x{}", tiles.len(), out_width, out_height);
    Ok(out)
}
