//! Order of the chunks of one subtree inside a bucket.

use crate::cost::CostNode;
use cubefile_common::TraversalOrderKind;
use std::collections::VecDeque;

/// A chunk in layout order with the layout index of its parent.
#[derive(Debug, Clone, Copy)]
pub struct LaidOutChunk<'n> {
    pub node: &'n CostNode,
    pub parent: Option<usize>,
}

/// Lays out a subtree. The subtree root is always first.
pub trait TraversalOrder {
    /// Strategy name for logging.
    fn name(&self) -> &'static str;

    /// Chunks of the subtree rooted at `root` in storage order.
    fn layout<'n>(&self, root: &'n CostNode) -> Vec<LaidOutChunk<'n>>;
}

/// Returns the traversal for `kind`.
pub fn traversal_order(kind: TraversalOrderKind) -> Box<dyn TraversalOrder> {
    match kind {
        TraversalOrderKind::DepthFirst => Box::new(DepthFirst),
        TraversalOrderKind::BreadthFirst => Box::new(BreadthFirst),
    }
}

/// Pre-order depth-first layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct DepthFirst;

impl TraversalOrder for DepthFirst {
    fn name(&self) -> &'static str {
        "depth_first"
    }

    fn layout<'n>(&self, root: &'n CostNode) -> Vec<LaidOutChunk<'n>> {
        let mut out = Vec::with_capacity(root.chunk_count());
        let mut stack = vec![(root, None)];
        while let Some((node, parent)) = stack.pop() {
            let index = out.len();
            out.push(LaidOutChunk { node, parent });
            stack.extend(node.children.iter().rev().map(|child| (child, Some(index))));
        }
        out
    }
}

/// Level-order layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct BreadthFirst;

impl TraversalOrder for BreadthFirst {
    fn name(&self) -> &'static str {
        "breadth_first"
    }

    fn layout<'n>(&self, root: &'n CostNode) -> Vec<LaidOutChunk<'n>> {
        let mut out = Vec::with_capacity(root.chunk_count());
        let mut queue = VecDeque::from([(root, None)]);
        while let Some((node, parent)) = queue.pop_front() {
            let index = out.len();
            out.push(LaidOutChunk { node, parent });
            queue.extend(node.children.iter().map(|child| (child, Some(index))));
        }
        out
    }
}
