//! Geometry/style probe with a per-sample memo

use std::collections::HashMap;

use crate::detect::node::{NodeKey, StyleSnapshot, VisualNode};
use crate::geometry::Rect;

/// What one probe of a node yields.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeData {
    pub rect: Rect,
    pub style: StyleSnapshot,
}

/// Uncached probe. Idempotent and free of side effects on the page.
pub fn probe<N: VisualNode>(node: &N) -> ProbeData {
    ProbeData {
        rect: node.bounding_rect(),
        style: node.computed_style(),
    }
}

/// Memo for exactly one sampling pass (one pointer-move).
///
/// Create a new pass per sample and drop it afterwards; geometry carried
/// across samples would be stale after any scroll or layout change.
#[derive(Debug, Default)]
pub struct ProbePass {
    memo: HashMap<NodeKey, ProbeData>,
}

impl ProbePass {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<N: VisualNode>(&mut self, node: &N) -> &ProbeData {
        self.memo.entry(node.key()).or_insert_with(|| probe(node))
    }

    /// Number of distinct nodes probed in this pass.
    pub fn len(&self) -> usize {
        self.memo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memo.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::node::WeakNode;
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Clone)]
    struct Counting {
        calls: Rc<Cell<usize>>,
    }

    #[derive(Clone)]
    struct CountingWeak(Counting);

    impl WeakNode for CountingWeak {
        type Strong = Counting;
        fn upgrade(&self) -> Option<Counting> {
            Some(self.0.clone())
        }
    }

    impl VisualNode for Counting {
        type Weak = CountingWeak;
        fn key(&self) -> NodeKey {
            NodeKey(1)
        }
        fn tag(&self) -> String {
            "DIV".into()
        }
        fn attribute(&self, _name: &str) -> Option<String> {
            None
        }
        fn bounding_rect(&self) -> Rect {
            self.calls.set(self.calls.get() + 1);
            Rect::new(0.0, 0.0, 10.0, 10.0)
        }
        fn computed_style(&self) -> StyleSnapshot {
            StyleSnapshot::default()
        }
        fn child_count(&self) -> usize {
            0
        }
        fn has_image_descendant(&self) -> bool {
            false
        }
        fn parent(&self) -> Option<Self> {
            None
        }
        fn downgrade(&self) -> CountingWeak {
            CountingWeak(self.clone())
        }
    }

    #[test]
    fn pass_memoizes_and_new_pass_reprobes() {
        let node = Counting { calls: Rc::new(Cell::new(0)) };
        let mut pass = ProbePass::new();
        pass.get(&node);
        pass.get(&node);
        assert_eq!(node.calls.get(), 1);
        assert_eq!(pass.len(), 1);

        let mut next = ProbePass::new();
        next.get(&node);
        assert_eq!(node.calls.get(), 2);
    }
}
