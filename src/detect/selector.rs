//! Candidate selection over a node's ancestor chain

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::detect::node::{NodeSource, VisualNode, WeakNode};
use crate::detect::probe::ProbePass;
use crate::detect::scorer::{self, BlockDetectionConfig};
use crate::geometry::Rect;
use crate::Viewport;

/// When the runner-up is within this margin of the winner and contains the
/// pointed-at node, the runner-up wins. Empirical; keep as is.
pub const TIE_BREAK_MARGIN: f64 = 0.5;

/// Non-visual tags never considered as blocks.
pub const SKIP_TAGS: &[&str] = &["SCRIPT", "STYLE", "LINK", "META", "HEAD", "NOSCRIPT", "BR", "HR"];

/// Semantic classification of a UI block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    Nav,
    Header,
    Footer,
    Section,
    Article,
    Card,
    Form,
    Button,
    Aside,
    Figure,
    Generic,
}

impl SemanticType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SemanticType::Nav => "nav",
            SemanticType::Header => "header",
            SemanticType::Footer => "footer",
            SemanticType::Section => "section",
            SemanticType::Article => "article",
            SemanticType::Card => "card",
            SemanticType::Form => "form",
            SemanticType::Button => "button",
            SemanticType::Aside => "aside",
            SemanticType::Figure => "figure",
            SemanticType::Generic => "generic",
        }
    }
}

/// A scored block. Holds only a weak handle to the host node.
#[derive(Debug, Clone)]
pub struct BlockCandidate<W> {
    pub id: String,
    pub node: W,
    pub score: f64,
    pub rect: Rect,
    pub semantic_type: SemanticType,
    pub label: String,
}

impl<W: WeakNode> BlockCandidate<W> {
    /// Serializable summary without the node handle.
    pub fn summary(&self) -> BlockSummary {
        BlockSummary {
            id: self.id.clone(),
            score: self.score,
            rect: self.rect,
            semantic_type: self.semantic_type,
            label: self.label.clone(),
        }
    }
}

/// What the overlay and the CLI see of a candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockSummary {
    pub id: String,
    pub score: f64,
    pub rect: Rect,
    pub semantic_type: SemanticType,
    pub label: String,
}

/// Landmark tag, then class pattern, then ARIA role, then generic.
pub fn classify<N: VisualNode>(node: &N) -> SemanticType {
    match node.tag().as_str() {
        "NAV" => return SemanticType::Nav,
        "HEADER" => return SemanticType::Header,
        "FOOTER" => return SemanticType::Footer,
        "SECTION" => return SemanticType::Section,
        "ARTICLE" => return SemanticType::Article,
        "ASIDE" => return SemanticType::Aside,
        "FIGURE" => return SemanticType::Figure,
        "FORM" => return SemanticType::Form,
        "BUTTON" => return SemanticType::Button,
        _ => {}
    }

    let classes = node.class_name().to_lowercase();
    if ["card", "modal", "panel", "tile"].iter().any(|p| classes.contains(p)) {
        return SemanticType::Card;
    }

    match node.attribute("role").as_deref() {
        Some("navigation") => SemanticType::Nav,
        Some("banner") => SemanticType::Header,
        Some("contentinfo") => SemanticType::Footer,
        Some("main") => SemanticType::Section,
        Some("complementary") => SemanticType::Aside,
        Some("dialog") => SemanticType::Card,
        Some("form") => SemanticType::Form,
        _ => SemanticType::Generic,
    }
}

/// Human-readable label: aria-label, else title-cased id, else the type.
pub fn label<N: VisualNode>(node: &N, semantic_type: SemanticType) -> String {
    if let Some(aria) = node.attribute("aria-label").filter(|s| !s.is_empty()) {
        return aria;
    }
    if let Some(id) = node.attribute("id").filter(|s| !s.is_empty()) {
        return id
            .split(['-', '_'])
            .filter(|w| !w.is_empty())
            .map(capitalize)
            .collect::<Vec<_>>()
            .join(" ");
    }
    capitalize(semantic_type.as_str())
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// `tag#id.class1.class2-<digest>`; the digest covers the ancestor path so
/// the same node yields the same id across samples.
pub fn element_id<N: VisualNode>(node: &N) -> String {
    let tag = node.tag().to_lowercase();
    let mut id = tag.clone();
    if let Some(dom_id) = node.attribute("id").filter(|s| !s.is_empty()) {
        id.push('#');
        id.push_str(&dom_id);
    }
    let classes: Vec<String> = node.class_name().split_whitespace().take(2).map(str::to_string).collect();
    if !classes.is_empty() {
        id.push('.');
        id.push_str(&classes.join("."));
    }

    let mut hasher = Sha256::new();
    let mut cur = Some(node.clone());
    while let Some(n) = cur {
        hasher.update(n.key().0.to_le_bytes());
        cur = n.parent();
    }
    let digest = hex::encode(hasher.finalize());
    format!("{}-{}", id, &digest[..8])
}

fn should_skip(tag: &str, probe: &crate::detect::probe::ProbeData) -> bool {
    SKIP_TAGS.contains(&tag) || probe.style.is_hidden() || probe.rect.width == 0.0 || probe.rect.height == 0.0
}

/// Pick the winner among scored candidates.
///
/// Highest score wins, unless the runner-up is within [`TIE_BREAK_MARGIN`]
/// and `contains_target` holds for it.
pub fn select_winner<T>(
    mut candidates: Vec<T>,
    score_of: impl Fn(&T) -> f64,
    contains_target: impl Fn(&T) -> bool,
) -> Option<T> {
    if candidates.is_empty() {
        return None;
    }
    candidates.sort_by(|a, b| score_of(b).total_cmp(&score_of(a)));

    if candidates.len() > 1 {
        let diff = score_of(&candidates[0]) - score_of(&candidates[1]);
        if diff < TIE_BREAK_MARGIN && contains_target(&candidates[1]) {
            return Some(candidates.swap_remove(1));
        }
    }
    Some(candidates.swap_remove(0))
}

/// Find the best block for the node under the pointer.
///
/// Returns `None` when no ancestor survives filtering; callers treat that as
/// a valid empty result.
pub fn find_best_block<N: VisualNode>(
    target: &N,
    viewport: Viewport,
    config: &BlockDetectionConfig,
) -> Option<BlockCandidate<N::Weak>> {
    let mut pass = ProbePass::new();
    let mut scored: Vec<(BlockCandidate<N::Weak>, N)> = Vec::new();
    let mut current = Some(target.clone());
    let mut steps = 0;

    while let Some(node) = current {
        if steps >= config.max_depth || node.is_document_root() {
            break;
        }

        let tag = node.tag();
        let probe = pass.get(&node).clone();
        if !should_skip(&tag, &probe)
            && probe.rect.intersects_viewport(viewport)
            && probe.rect.width >= config.min_width
            && probe.rect.height >= config.min_height
        {
            let semantic_type = classify(&node);
            let score = scorer::score(&node, &probe, node.depth(), viewport, config);
            scored.push((
                BlockCandidate {
                    id: element_id(&node),
                    node: node.downgrade(),
                    score,
                    rect: probe.rect,
                    semantic_type,
                    label: label(&node, semantic_type),
                },
                node.clone(),
            ));
        }

        current = node.parent();
        steps += 1;
    }

    log::trace!("{} candidates for sample ({} nodes probed)", scored.len(), pass.len());

    select_winner(scored, |(c, _)| c.score, |(_, n)| n.contains(target)).map(|(c, _)| c)
}

/// Grid-sample an area and return the distinct best blocks found.
pub fn find_blocks_in_area<S: NodeSource>(
    source: &S,
    area: Rect,
    grid_size: f64,
    config: &BlockDetectionConfig,
) -> Vec<BlockCandidate<<S::Node as VisualNode>::Weak>> {
    let mut seen = std::collections::HashSet::new();
    let mut blocks = Vec::new();
    if grid_size <= 0.0 {
        return blocks;
    }
    let viewport = source.viewport();

    let mut x = area.x;
    while x < area.right() {
        let mut y = area.y;
        while y < area.bottom() {
            if let Some(node) = source.element_at_point(x, y) {
                if let Some(block) = find_best_block(&node, viewport, config) {
                    if let Some(strong) = block.node.upgrade() {
                        if seen.insert(strong.key()) {
                            blocks.push(block);
                        }
                    }
                }
            }
            y += grid_size;
        }
        x += grid_size;
    }
    blocks
}
