//! Cost tree: the chunk hierarchy with the exact size of every chunk, built
//! by scanning the fact file before anything is materialised.

use crate::cell_map::{CellMap, DuplicatePolicy};
use crate::context::{ConstructionContext, PackingLimits};
use crate::coords::calc_cell_offset;
use crate::facts::FactFile;
use crate::header::ChunkHeader;
use crate::schema::CubeInfo;
use cubefile_common::{CubeError, Result, ResultExt};
use tracing::debug;

/// One chunk of the cost tree.
#[derive(Debug, Clone, PartialEq)]
pub struct CostNode {
    pub header: ChunkHeader,
    /// Grain cells of an oversized data chunk, kept for large-chunk
    /// resolution. `None` everywhere else.
    pub cells: Option<CellMap>,
    pub children: Vec<CostNode>,
}

impl CostNode {
    /// Creates a node.
    pub fn new(header: ChunkHeader, cells: Option<CellMap>, children: Vec<CostNode>) -> Self {
        Self {
            header,
            cells,
            children,
        }
    }

    /// Bytes the subtree occupies in a bucket: every chunk plus its slot.
    pub fn subtree_cost(&self) -> usize {
        PackingLimits::chunk_cost(self.header.size)
            + self.children.iter().map(CostNode::subtree_cost).sum::<usize>()
    }

    /// Number of chunks in the subtree.
    pub fn chunk_count(&self) -> usize {
        1 + self.children.iter().map(CostNode::chunk_count).sum::<usize>()
    }

    /// Coordinates of the chunk inside its parent.
    pub fn coordinates(&self) -> Result<Vec<i32>> {
        self.header
            .id
            .last_domain()
            .map(<[i32]>::to_vec)
            .ok_or_else(|| CubeError::Internal("the root chunk has no parent cell".to_string()))
    }

    /// Detaches and returns the children.
    pub fn take_children(&mut self) -> Vec<CostNode> {
        std::mem::take(&mut self.children)
    }
}

fn check_cells_in_range(cells: &CellMap, header: &ChunkHeader) -> Result<()> {
    match cells
        .domains()
        .iter()
        .find(|domain| calc_cell_offset(domain, &header.ranges).is_none())
    {
        Some(domain) => Err(CubeError::Schema(format!(
            "cell {} lies outside the ranges of chunk {}",
            header.id.child(domain),
            header.id
        ))),
        None => Ok(()),
    }
}

/// Builds the cost tree rooted at `header`.
pub fn build_cost_tree(
    mut header: ChunkHeader,
    cube: &CubeInfo,
    facts: &FactFile,
    ctx: &mut ConstructionContext,
) -> Result<CostNode> {
    ctx.stats.chunks += 1;

    if header.is_data() {
        let cells = CellMap::scan(facts, &header.id, DuplicatePolicy::Reject)?;
        check_cells_in_range(&cells, &header)?;
        header.set_real_cells(cells.len());
        ctx.stats.data_chunks += 1;

        let oversized = ctx.limits.is_oversized(PackingLimits::chunk_cost(header.size));
        if oversized {
            debug!(
                chunk = %header.id,
                size = header.size,
                cells = cells.len(),
                "Retaining cell map of large data chunk"
            );
        }
        return Ok(CostNode::new(header, oversized.then_some(cells), Vec::new()));
    }

    let cells = CellMap::scan(facts, &header.id, DuplicatePolicy::Merge)?;
    check_cells_in_range(&cells, &header)?;
    header.set_real_cells(cells.len());

    let mut children = Vec::with_capacity(cells.len());
    for child_id in cells.cell_ids() {
        let child = ChunkHeader::for_chunk(child_id.clone(), cube)
            .and_then(|child_header| build_cost_tree(child_header, cube, facts, ctx))
            .context(|| format!("cost tree of chunk {}", child_id))?;
        children.push(child);
    }
    Ok(CostNode::new(header, None, children))
}
