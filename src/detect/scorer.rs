//! Block desirability scoring
//!
//! Every term is additive so each one can be tuned on its own through
//! [`BlockDetectionConfig`].

use serde::{Deserialize, Serialize};

use crate::detect::node::VisualNode;
use crate::detect::probe::ProbeData;
use crate::Viewport;

/// Weights and limits for block detection.
///
/// # Examples
///
/// ```
/// let cfg = blocksnap::detect::BlockDetectionConfig::default();
/// assert_eq!(cfg.max_depth, 15);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockDetectionConfig {
    /// Minimum candidate width in CSS pixels
    pub min_width: f64,
    /// Minimum candidate height in CSS pixels
    pub min_height: f64,
    /// Multiplier for the tag's semantic weight
    pub semantic_weight: f64,
    /// Multiplier for the visual boundary bonuses
    pub visual_weight: f64,
    /// Multiplier for the medium-size bonus
    pub size_weight: f64,
    /// Maximum number of ancestors walked from the pointed-at node
    pub max_depth: usize,
}

impl Default for BlockDetectionConfig {
    fn default() -> Self {
        Self {
            min_width: 50.0,
            min_height: 50.0,
            semantic_weight: 2.0,
            visual_weight: 1.5,
            size_weight: 1.0,
            max_depth: 15,
        }
    }
}

/// Intrinsic weight of a tag. Landmarks score highest, generic containers 0.
pub fn semantic_weight(tag: &str) -> f64 {
    match tag {
        "SECTION" | "ARTICLE" | "NAV" | "DIALOG" => 2.0,
        "ASIDE" | "HEADER" | "FOOTER" | "FORM" => 1.8,
        "FIGURE" => 1.6,
        "MAIN" | "DETAILS" => 1.5,
        _ => 0.0,
    }
}

fn visual_score(probe: &ProbeData, config: &BlockDetectionConfig) -> f64 {
    let style = &probe.style;
    let mut score = 0.0;
    if style.has_visual_boundary() {
        score += 1.0 * config.visual_weight;
    }
    if style.border_radius >= 8.0 {
        score += 0.3 * config.visual_weight;
    }
    if style.box_shadow.is_some() {
        score += 0.4 * config.visual_weight;
    }
    score
}

fn size_score(probe: &ProbeData, viewport: Viewport, config: &BlockDetectionConfig) -> f64 {
    let rect = &probe.rect;
    let mut score = 0.0;

    if rect.width < config.min_width || rect.height < config.min_height {
        score -= 2.0;
    }

    let width_ratio = if viewport.width > 0.0 { rect.width / viewport.width } else { 0.0 };
    let height_ratio = if viewport.height > 0.0 { rect.height / viewport.height } else { 0.0 };

    // whole-page wrappers are rarely what the user points at
    if width_ratio > 0.95 && height_ratio > 0.95 {
        score -= 1.0;
    }

    if width_ratio > 0.1 && width_ratio < 0.9 && height_ratio > 0.1 && height_ratio < 0.8 {
        score += 0.5 * config.size_weight;
    }

    score
}

fn pattern_score<N: VisualNode>(node: &N, tag: &str) -> f64 {
    let mut score = 0.0;
    if tag == "BUTTON" || tag == "A" || node.attribute("role").as_deref() == Some("button") {
        score += 0.8;
    }
    if tag == "FORM" {
        score += 1.0;
    }
    if tag == "FIGURE" || (tag == "DIV" && node.has_image_descendant()) {
        score += 0.4;
    }
    score
}

/// Score how likely `node` is a meaningful UI block.
///
/// `depth` is the node's nesting depth from the document element.
/// Deterministic for identical inputs.
pub fn score<N: VisualNode>(
    node: &N,
    probe: &ProbeData,
    depth: usize,
    viewport: Viewport,
    config: &BlockDetectionConfig,
) -> f64 {
    let tag = node.tag();
    let mut score = semantic_weight(&tag) * config.semantic_weight;

    score += visual_score(probe, config);

    if probe.style.display.is_layout_container() {
        score += 0.5;
    }
    if node.child_count() >= 2 {
        score += 0.3;
    }

    score += size_score(probe, viewport, config);

    if depth > 10 {
        score -= (depth - 10) as f64 * 0.1;
    }

    score + pattern_score(node, &tag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::node::{Color, Display, NodeKey, StyleSnapshot, WeakNode};
    use crate::geometry::Rect;

    #[derive(Clone, Default)]
    struct Stub {
        tag: &'static str,
        role: Option<&'static str>,
        children: usize,
        image: bool,
    }

    #[derive(Clone)]
    struct StubWeak;

    impl WeakNode for StubWeak {
        type Strong = Stub;
        fn upgrade(&self) -> Option<Stub> {
            None
        }
    }

    impl VisualNode for Stub {
        type Weak = StubWeak;
        fn key(&self) -> NodeKey {
            NodeKey(0)
        }
        fn tag(&self) -> String {
            self.tag.to_string()
        }
        fn attribute(&self, name: &str) -> Option<String> {
            (name == "role").then_some(self.role?.to_string())
        }
        fn bounding_rect(&self) -> Rect {
            Rect::default()
        }
        fn computed_style(&self) -> StyleSnapshot {
            StyleSnapshot::default()
        }
        fn child_count(&self) -> usize {
            self.children
        }
        fn has_image_descendant(&self) -> bool {
            self.image
        }
        fn parent(&self) -> Option<Self> {
            None
        }
        fn downgrade(&self) -> StubWeak {
            StubWeak
        }
    }

    const VIEWPORT: Viewport = Viewport { width: 1000.0, height: 1000.0 };

    fn probe_with(rect: Rect, style: StyleSnapshot) -> ProbeData {
        ProbeData { rect, style }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn plain_div_in_sweet_spot_gets_only_size_bonus() {
        let node = Stub { tag: "DIV", ..Default::default() };
        let p = probe_with(Rect::new(0.0, 0.0, 300.0, 300.0), StyleSnapshot::default());
        let cfg = BlockDetectionConfig::default();
        assert!(close(score(&node, &p, 3, VIEWPORT, &cfg), 0.5));
    }

    #[test]
    fn card_like_section_accumulates_terms() {
        let node = Stub { tag: "SECTION", children: 3, ..Default::default() };
        let style = StyleSnapshot {
            background_color: Color::WHITE,
            border_radius: 12.0,
            box_shadow: Some("0 1px 2px black".into()),
            display: Display::Flex,
            ..Default::default()
        };
        let p = probe_with(Rect::new(0.0, 0.0, 400.0, 300.0), style);
        let cfg = BlockDetectionConfig::default();
        // 4.0 semantic + 1.5 + 0.45 + 0.6 visual + 0.5 flex + 0.3 children + 0.5 size
        assert!(close(score(&node, &p, 4, VIEWPORT, &cfg), 7.85));
    }

    #[test]
    fn small_and_full_page_penalties() {
        let node = Stub { tag: "DIV", ..Default::default() };
        let cfg = BlockDetectionConfig::default();
        let small = probe_with(Rect::new(0.0, 0.0, 40.0, 200.0), StyleSnapshot::default());
        assert!(close(score(&node, &small, 2, VIEWPORT, &cfg), -2.0));
        let full = probe_with(Rect::new(0.0, 0.0, 1000.0, 990.0), StyleSnapshot::default());
        assert!(close(score(&node, &full, 2, VIEWPORT, &cfg), -1.0));
    }

    #[test]
    fn depth_penalty_and_patterns() {
        let cfg = BlockDetectionConfig::default();
        let outside = probe_with(Rect::new(0.0, 0.0, 950.0, 60.0), StyleSnapshot::default());
        let button = Stub { tag: "DIV", role: Some("button"), ..Default::default() };
        assert!(close(score(&button, &outside, 13, VIEWPORT, &cfg), 0.8 - 0.3));
        let form = Stub { tag: "FORM", ..Default::default() };
        assert!(close(score(&form, &outside, 1, VIEWPORT, &cfg), 1.8 * 2.0 + 1.0));
        let img_wrapper = Stub { tag: "DIV", image: true, ..Default::default() };
        assert!(close(score(&img_wrapper, &outside, 1, VIEWPORT, &cfg), 0.4));
    }

    #[test]
    fn scoring_is_deterministic() {
        let node = Stub { tag: "ARTICLE", children: 2, ..Default::default() };
        let p = probe_with(Rect::new(10.0, 10.0, 500.0, 400.0), StyleSnapshot::default());
        let cfg = BlockDetectionConfig::default();
        assert_eq!(score(&node, &p, 6, VIEWPORT, &cfg), score(&node, &p, 6, VIEWPORT, &cfg));
    }
}
