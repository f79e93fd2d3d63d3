//! Inline `style` attribute parsing for fixture pages
//!
//! Only the handful of properties the detector and the rasterizer read are
//! understood. Geometry is absolute: `left`/`top` are page coordinates.

use csscolorparser::Color as CssColor;

use crate::detect::{Color, Display, StyleSnapshot};

/// Geometry and computed style declared on one element.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InlineStyle {
    pub left: Option<f64>,
    pub top: Option<f64>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub style: StyleSnapshot,
}

pub fn parse_inline_style(raw: &str) -> InlineStyle {
    let mut out = InlineStyle::default();
    for decl in raw.split(';') {
        let Some((name, value)) = decl.split_once(':') else {
            continue;
        };
        let name = name.trim().to_ascii_lowercase();
        let value = value.trim();
        match name.as_str() {
            "left" => out.left = parse_px(value),
            "top" => out.top = parse_px(value),
            "width" => out.width = parse_px(value),
            "height" => out.height = parse_px(value),
            "background" | "background-color" => {
                if let Some(c) = parse_color(value) {
                    out.style.background_color = c;
                }
            }
            "border" => {
                out.style.border_width = value.split_whitespace().find_map(parse_px).unwrap_or(0.0);
                if value == "none" {
                    out.style.border_width = 0.0;
                }
            }
            "border-width" => out.style.border_width = parse_px(value).unwrap_or(0.0),
            "border-radius" => out.style.border_radius = parse_px(value).unwrap_or(0.0),
            "box-shadow" => out.style.box_shadow = not_none(value),
            "backdrop-filter" => out.style.backdrop_filter = not_none(value),
            "display" => out.style.display = Display::parse(value),
            "visibility" => out.style.visibility_hidden = value == "hidden" || value == "collapse",
            "opacity" => out.style.opacity = value.parse().unwrap_or(1.0),
            _ => {}
        }
    }
    out
}

fn not_none(value: &str) -> Option<String> {
    if value.is_empty() || value == "none" {
        None
    } else {
        Some(value.to_string())
    }
}

/// `12px`, `12` or `0`.
pub fn parse_px(value: &str) -> Option<f64> {
    let v = value.trim();
    v.strip_suffix("px").unwrap_or(v).trim().parse::<f64>().ok()
}

/// Any CSS colour `csscolorparser` understands (hex, `rgb()`/`hsl()` in
/// comma or space syntax, named colours, `transparent`), plus `none`.
pub fn parse_color(value: &str) -> Option<Color> {
    let v = value.trim();
    if v.eq_ignore_ascii_case("none") {
        return Some(Color::TRANSPARENT);
    }
    let parsed: CssColor = v.parse().ok()?;
    let [r, g, b, a] = parsed.to_rgba8();
    Some(Color { r, g, b, a })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_and_visuals() {
        let s = parse_inline_style(
            "left: 10px; top:20px; width:300px; height: 120; background:#fff; border: 1px solid #ccc; border-radius: 12px; box-shadow: 0 2px 4px rgba(0,0,0,.2); display:flex",
        );
        assert_eq!((s.left, s.top, s.width, s.height), (Some(10.0), Some(20.0), Some(300.0), Some(120.0)));
        assert_eq!(s.style.background_color, Color::WHITE);
        assert_eq!(s.style.border_width, 1.0);
        assert_eq!(s.style.border_radius, 12.0);
        assert!(s.style.box_shadow.is_some());
        assert_eq!(s.style.display, Display::Flex);
    }

    #[test]
    fn hidden_and_none_values() {
        let s = parse_inline_style("visibility:hidden; box-shadow:none; opacity:0; border:none");
        assert!(s.style.visibility_hidden);
        assert!(s.style.box_shadow.is_none());
        assert_eq!(s.style.opacity, 0.0);
        assert_eq!(s.style.border_width, 0.0);
        assert!(s.style.is_hidden());
    }

    #[test]
    fn color_forms() {
        assert_eq!(parse_color("#0f0"), Some(Color::rgb(0, 255, 0)));
        assert_eq!(parse_color("rgba(10, 20, 30, 0)"), Some(Color { r: 10, g: 20, b: 30, a: 0 }));
        assert_eq!(parse_color("rgb(1,2,3)"), Some(Color::rgb(1, 2, 3)));
        assert_eq!(parse_color("#11223344").map(|c| c.a), Some(0x44));
        assert_eq!(parse_color("transparent"), Some(Color::TRANSPARENT));
        assert_eq!(parse_color("not-a-colour"), None);
    }

    #[test]
    fn modern_color_syntax() {
        assert_eq!(parse_color("hsl(0, 0%, 100%)"), Some(Color::WHITE));
        assert_eq!(parse_color("orange"), Some(Color::rgb(255, 165, 0)));
        assert_eq!(parse_color("rgb(0 0 0 / 50%)").map(|c| (c.r, c.a)), Some((0, 128)));
        assert_eq!(parse_color("rgba(0,0,0,50%)").map(|c| c.a), Some(128));
    }

    #[test]
    fn hsl_background_still_counts_as_painted() {
        let s = parse_inline_style("background: hsl(210, 40%, 96%); width: 10px");
        assert!(!s.style.background_color.is_transparent());
    }
}
