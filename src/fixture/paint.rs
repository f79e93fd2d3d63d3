//! Paint commands for fixture pages and their rasterizer

use crate::detect::Color;
use crate::geometry::Rect;
use crate::raster::RawImage;

#[derive(Debug, Clone, PartialEq)]
pub enum PaintCommand {
    /// Page-space rectangle in CSS pixels
    SolidRect { rect: Rect, rgba: Color },
}

/// Rasterize `commands` into a `width` x `height` CSS px window whose top edge
/// sits at page offset `scroll_y`.
///
/// Device rows are computed as `round(y * dpr) - round(scroll_y * dpr)`, so
/// a window is always an exact slice of the full-page raster.
pub fn rasterize(
    commands: &[PaintCommand],
    width: f64,
    height: f64,
    scroll_y: f64,
    device_pixel_ratio: f64,
    background: Color,
) -> RawImage {
    let out_w = (width * device_pixel_ratio).round().max(0.0) as u32;
    let out_h = (height * device_pixel_ratio).round().max(0.0) as u32;
    let offset = (scroll_y * device_pixel_ratio).round() as i64;
    let mut image = RawImage::filled(out_w, out_h, device_pixel_ratio, background);

    for command in commands {
        match command {
            PaintCommand::SolidRect { rect, rgba } => {
                let device = rect.to_device(device_pixel_ratio);
                let y = device.y - offset;
                let clamped = crate::geometry::DeviceRect { y, ..device }.clamp_to(out_w, out_h);
                let Some((x, y, w, h)) = clamped else {
                    continue;
                };
                if rgba.a == 255 {
                    image.fill_rect(x, y, w, h, *rgba);
                } else {
                    blend_rect(&mut image, x, y, w, h, *rgba);
                }
            }
        }
    }
    image
}

/// Source-over blend of a translucent colour onto an opaque buffer.
fn blend_rect(image: &mut RawImage, x: u32, y: u32, width: u32, height: u32, color: Color) {
    let a = color.a as u32;
    let mix = |src: u8, dst: u8| ((src as u32 * a + dst as u32 * (255 - a) + 127) / 255) as u8;
    for row in y..y + height {
        for px in image.span_mut(x, row, width).chunks_exact_mut(4) {
            px[0] = mix(color.r, px[0]);
            px[1] = mix(color.g, px[1]);
            px[2] = mix(color.b, px[2]);
            px[3] = 255;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_commands_paint_over_earlier() {
        let cmds = vec![
            PaintCommand::SolidRect { rect: Rect::new(0.0, 0.0, 10.0, 10.0), rgba: Color::rgb(255, 0, 0) },
            PaintCommand::SolidRect { rect: Rect::new(5.0, 5.0, 10.0, 10.0), rgba: Color::rgb(0, 0, 255) },
        ];
        let img = rasterize(&cmds, 20.0, 20.0, 0.0, 1.0, Color::WHITE);
        assert_eq!(img.pixel(1, 1), [255, 0, 0, 255]);
        assert_eq!(img.pixel(6, 6), [0, 0, 255, 255]);
        assert_eq!(img.pixel(19, 19), [255, 255, 255, 255]);
    }

    #[test]
    fn window_is_a_slice_of_the_page() {
        let cmds = vec![PaintCommand::SolidRect { rect: Rect::new(0.0, 30.0, 4.0, 3.0), rgba: Color::rgb(9, 9, 9) }];
        let page = rasterize(&cmds, 4.0, 60.0, 0.0, 2.0, Color::WHITE);
        let window = rasterize(&cmds, 4.0, 20.0, 25.0, 2.0, Color::WHITE);
        for y in 0..window.height() {
            assert_eq!(window.pixel(3, y), page.pixel(3, y + 50));
        }
    }

    #[test]
    fn translucent_fill_blends() {
        let cmds = vec![PaintCommand::SolidRect {
            rect: Rect::new(0.0, 0.0, 1.0, 1.0),
            rgba: Color { r: 0, g: 0, b: 0, a: 128 },
        }];
        let img = rasterize(&cmds, 1.0, 1.0, 0.0, 1.0, Color::WHITE);
        assert_eq!(img.pixel(0, 0), [127, 127, 127, 255]);
    }
}
