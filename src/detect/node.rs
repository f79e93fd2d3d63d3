//! Host render-tree handles and the style snapshot copied out of them

use serde::{Deserialize, Serialize};

use crate::geometry::Rect;
use crate::Viewport;

/// Identity of a node within one page. Stable while the node is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey(pub u64);

/// Non-owning handle to a host node. Upgrading fails once the page dropped
/// or replaced the node.
pub trait WeakNode: Clone {
    type Strong;

    fn upgrade(&self) -> Option<Self::Strong>;
}

/// A read-only handle into the host's render tree.
///
/// Implementations are cheap to clone and never mutate the page. Geometry and
/// style are read through [`crate::detect::probe::ProbePass`] so one sampling
/// pass computes them at most once per node.
pub trait VisualNode: Clone {
    type Weak: WeakNode<Strong = Self>;

    fn key(&self) -> NodeKey;

    /// Upper-case tag name (`DIV`, `NAV`, ...).
    fn tag(&self) -> String;

    fn attribute(&self, name: &str) -> Option<String>;

    /// Rendered box in viewport-relative CSS pixels.
    fn bounding_rect(&self) -> Rect;

    fn computed_style(&self) -> StyleSnapshot;

    /// Number of direct element children.
    fn child_count(&self) -> usize;

    /// Whether any descendant is an `<img>`.
    fn has_image_descendant(&self) -> bool;

    fn parent(&self) -> Option<Self>;

    fn downgrade(&self) -> Self::Weak;

    /// `<html>` or `<body>`: the selector stops here.
    fn is_document_root(&self) -> bool {
        matches!(self.tag().as_str(), "HTML" | "BODY")
    }

    /// Ancestor-or-self test.
    fn contains(&self, other: &Self) -> bool {
        let mine = self.key();
        let mut cur = Some(other.clone());
        while let Some(node) = cur {
            if node.key() == mine {
                return true;
            }
            cur = node.parent();
        }
        false
    }

    /// Nesting depth counted from the document element (which has depth 1).
    fn depth(&self) -> usize {
        let mut depth = 0;
        let mut cur = Some(self.clone());
        while let Some(node) = cur {
            depth += 1;
            cur = node.parent();
        }
        depth
    }

    fn class_name(&self) -> String {
        self.attribute("class").unwrap_or_default()
    }
}

/// Something that can answer "which node is under this point".
pub trait NodeSource {
    type Node: VisualNode;

    /// Topmost node at viewport coordinates, if any.
    fn element_at_point(&self, x: f64, y: f64) -> Option<Self::Node>;

    fn viewport(&self) -> Viewport;
}

/// RGBA colour as parsed from a computed style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const TRANSPARENT: Color = Color { r: 0, g: 0, b: 0, a: 0 };
    pub const WHITE: Color = Color { r: 255, g: 255, b: 255, a: 255 };

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Color { r, g, b, a: 255 }
    }

    pub fn is_transparent(&self) -> bool {
        self.a == 0
    }
}

/// CSS `display` values the detector cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Display {
    #[default]
    Block,
    Inline,
    InlineBlock,
    Flex,
    InlineFlex,
    Grid,
    InlineGrid,
    None,
    Other,
}

impl Display {
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "block" => Display::Block,
            "inline" => Display::Inline,
            "inline-block" => Display::InlineBlock,
            "flex" => Display::Flex,
            "inline-flex" => Display::InlineFlex,
            "grid" => Display::Grid,
            "inline-grid" => Display::InlineGrid,
            "none" => Display::None,
            _ => Display::Other,
        }
    }

    pub fn is_layout_container(&self) -> bool {
        matches!(self, Display::Flex | Display::InlineFlex | Display::Grid | Display::InlineGrid)
    }
}

/// Point-in-time copy of the computed style properties used for scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleSnapshot {
    pub background_color: Color,
    pub border_width: f64,
    pub border_radius: f64,
    /// `None` when the computed value is `none`
    pub box_shadow: Option<String>,
    /// `None` when the computed value is `none`
    pub backdrop_filter: Option<String>,
    pub display: Display,
    pub visibility_hidden: bool,
    pub opacity: f64,
}

impl Default for StyleSnapshot {
    fn default() -> Self {
        Self {
            background_color: Color::TRANSPARENT,
            border_width: 0.0,
            border_radius: 0.0,
            box_shadow: None,
            backdrop_filter: None,
            display: Display::Block,
            visibility_hidden: false,
            opacity: 1.0,
        }
    }
}

impl StyleSnapshot {
    /// Background, border, radius, shadow or backdrop filter.
    pub fn has_visual_boundary(&self) -> bool {
        !self.background_color.is_transparent()
            || self.border_width > 0.0
            || self.border_radius > 0.0
            || self.box_shadow.is_some()
            || self.backdrop_filter.is_some()
    }

    pub fn is_hidden(&self) -> bool {
        self.display == Display::None || self.visibility_hidden || self.opacity <= 0.0
    }
}
