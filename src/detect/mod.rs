//! Block detection: probe, scorer and candidate selector

pub mod node;
pub mod probe;
pub mod scorer;
pub mod selector;

pub use node::{Color, Display, NodeKey, NodeSource, StyleSnapshot, VisualNode, WeakNode};
pub use probe::{probe, ProbeData, ProbePass};
pub use scorer::BlockDetectionConfig;
pub use selector::{
    classify, find_best_block, find_blocks_in_area, select_winner, BlockCandidate, BlockSummary, SemanticType,
    TIE_BREAK_MARGIN,
};
