//! Large-chunk resolution.
//!
//! A data chunk too large for one bucket is replaced by an artificial
//! directory over a coarse grid of its cells, with one smaller data chunk
//! per non-empty grid cell. The grid puts about the same number of
//! synthetic members on every dimension and about the same number of grain
//! members under every synthetic member.

use crate::cell_map::CellMap;
use crate::chunk_id::PSEUDO_ORDER_CODE;
use crate::constants::DIR_ENTRY_SIZE;
use crate::context::PackingLimits;
use crate::coords::{calc_cell_offset, total_cells, Coordinates, LevelRange};
use crate::cost::CostNode;
use crate::header::{ArtificialHierarchy, ChunkHeader, ChunkKind, MIN_DEPTH};
use cubefile_common::{CubeError, LargeChunkResolution, Result, ResultExt};
use std::collections::HashMap;
use tracing::debug;

/// Grid of one dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionGrid {
    /// Grain range being split.
    pub range: LevelRange,
    /// The dimension is not split; its synthetic level is pseudo.
    pub pseudo: bool,
    /// Grain members under each synthetic member.
    pub chunk_width: usize,
    /// Grain range of each synthetic member, by synthetic order code.
    pub members: Vec<LevelRange>,
}

impl DimensionGrid {
    /// Number of grain members.
    pub fn population(&self) -> usize {
        self.range.width()
    }
}

/// Grid chosen for one large data chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EquiGridPlan {
    /// Target number of synthetic members per split dimension.
    pub members_per_dim: usize,
    pub dims: Vec<DimensionGrid>,
}

impl EquiGridPlan {
    /// Ranges of the synthetic directory.
    pub fn synthetic_ranges(&self) -> Vec<LevelRange> {
        self.dims
            .iter()
            .map(|d| {
                if d.pseudo {
                    LevelRange::NULL
                } else {
                    LevelRange::new(0, d.members.len() as i32 - 1)
                }
            })
            .collect()
    }

    /// Cells of the synthetic directory.
    pub fn total_cells(&self) -> usize {
        total_cells(&self.synthetic_ranges())
    }

    /// Synthetic cell holding the grain cell `grain`.
    pub fn synthetic_cell(&self, grain: &[i32]) -> Option<Vec<i32>> {
        if grain.len() != self.dims.len() {
            return None;
        }
        self.dims
            .iter()
            .zip(grain)
            .map(|(d, code)| {
                if !d.range.contains(*code) {
                    None
                } else if d.pseudo {
                    Some(PSEUDO_ORDER_CODE)
                } else {
                    Some(((code - d.range.left) as usize / d.chunk_width) as i32)
                }
            })
            .collect()
    }

    /// Grain ranges covered by the synthetic cell `cell`.
    pub fn grain_ranges(&self, cell: &[i32]) -> Option<Vec<LevelRange>> {
        self.dims
            .iter()
            .zip(cell)
            .map(|(d, code)| {
                if d.pseudo {
                    Some(d.range)
                } else {
                    usize::try_from(*code).ok().and_then(|i| d.members.get(i).copied())
                }
            })
            .collect()
    }

    /// Synthetic-to-grain mapping stored in the artificial directory.
    pub fn artificial_hierarchy(&self) -> ArtificialHierarchy {
        let mut table = ArtificialHierarchy::new(self.dims.len());
        for (dim, grid) in self.dims.iter().enumerate() {
            if grid.pseudo {
                continue;
            }
            for (code, range) in grid.members.iter().enumerate() {
                table.insert(dim, code as i32, *range);
            }
        }
        table
    }
}

fn pow_exceeds(base: usize, exp: u32, limit: usize) -> bool {
    (base as u128)
        .checked_pow(exp)
        .map_or(true, |p| p > limit as u128)
}

/// Largest `m` with `m^n <= value`.
pub fn integer_root(value: usize, n: u32) -> usize {
    if n <= 1 {
        return value;
    }
    let mut m = (value as f64).powf(1.0 / n as f64).round() as usize;
    while m > 0 && pow_exceeds(m, n, value) {
        m -= 1;
    }
    while !pow_exceeds(m + 1, n, value) {
        m += 1;
    }
    m
}

/// Plans the grid for a chunk with `ranges` whose directory may hold at
/// most `max_entries` entries.
pub fn plan_equi_grid(ranges: &[LevelRange], max_entries: usize) -> Result<EquiGridPlan> {
    let populations: Vec<usize> = ranges.iter().map(LevelRange::width).collect();
    let mut m = integer_root(max_entries, ranges.len() as u32).max(2);

    if populations.iter().all(|&pop| pop < m) {
        m = populations
            .iter()
            .copied()
            .filter(|&pop| pop > 1)
            .min()
            .ok_or_else(|| {
                CubeError::Capacity(format!(
                    "cannot split a chunk whose ranges {:?} hold a single cell",
                    ranges
                ))
            })?;
    }

    let dims = ranges
        .iter()
        .zip(&populations)
        .map(|(range, &pop)| {
            if pop < m || range.is_null() {
                return DimensionGrid {
                    range: *range,
                    pseudo: true,
                    chunk_width: pop,
                    members: vec![*range],
                };
            }
            let width = pop.div_ceil(m);
            let members = (0..pop.div_ceil(width))
                .map(|i| {
                    let left = range.left + (i * width) as i32;
                    let right = (left + width as i32 - 1).min(range.right);
                    LevelRange::new(left, right)
                })
                .collect();
            DimensionGrid {
                range: *range,
                pseudo: false,
                chunk_width: width,
                members,
            }
        })
        .collect();

    Ok(EquiGridPlan {
        members_per_dim: m,
        dims,
    })
}

/// Strategy replacing an oversized data chunk with a subtree of smaller
/// chunks.
pub trait LargeChunkResolver {
    /// Strategy name for logging.
    fn name(&self) -> &'static str;

    /// Replaces the oversized data chunk `node` with an artificial
    /// directory subtree.
    fn resolve(&self, node: CostNode, limits: &PackingLimits) -> Result<CostNode>;
}

/// Returns the resolver for `kind`.
pub fn large_chunk_resolver(kind: LargeChunkResolution) -> Box<dyn LargeChunkResolver> {
    match kind {
        LargeChunkResolution::EquiGridEquiChildren => Box::new(EquiGridEquiChildren),
    }
}

/// Equal grid members per dimension, equal grain children per member.
#[derive(Debug, Clone, Copy, Default)]
pub struct EquiGridEquiChildren;

impl EquiGridEquiChildren {
    /// Plans the grid with the largest entry budget whose directory,
    /// artificial table included, still fits one bucket.
    fn plan_fitting(header: &ChunkHeader, limits: &PackingLimits) -> Result<EquiGridPlan> {
        let mut max_entries = limits.max_dir_entries(header.prefix_size());
        loop {
            let plan = plan_equi_grid(&header.ranges, max_entries)?;
            let size = header.prefix_size()
                + plan.artificial_hierarchy().encoded_size()
                + plan.total_cells() * DIR_ENTRY_SIZE;
            if !limits.is_oversized(PackingLimits::chunk_cost(size)) || max_entries <= 1 {
                return Ok(plan);
            }
            max_entries -= 1;
        }
    }

    fn child_node(
        parent: &ChunkHeader,
        plan: &EquiGridPlan,
        cell: &[i32],
        cells: CellMap,
        local_depth: i16,
        limits: &PackingLimits,
    ) -> Result<CostNode> {
        let ranges = plan.grain_ranges(cell).ok_or_else(|| {
            CubeError::Internal(format!("synthetic cell {:?} outside plan of {}", cell, parent.id))
        })?;
        let mut header = ChunkHeader {
            id: parent.id.child(cell),
            kind: ChunkKind::Data,
            depth: parent.depth,
            local_depth: local_depth + 1,
            next_local_depth: false,
            num_dims: parent.num_dims,
            tot_num_cells: total_cells(&ranges),
            ranges,
            real_num_cells: 0,
            num_measures: parent.num_measures,
            artificial: None,
            size: 0,
        };
        header.set_real_cells(cells.len());
        let oversized = limits.is_oversized(PackingLimits::chunk_cost(header.size));
        Ok(CostNode::new(header, oversized.then_some(cells), Vec::new()))
    }
}

impl LargeChunkResolver for EquiGridEquiChildren {
    fn name(&self) -> &'static str {
        "equi_grid_equi_children"
    }

    fn resolve(&self, mut node: CostNode, limits: &PackingLimits) -> Result<CostNode> {
        let cells = node.cells.take().ok_or_else(|| {
            CubeError::Internal(format!("large data chunk {} has no cell map", node.header.id))
        })?;
        let header = node.header;
        if !header.is_data() {
            return Err(CubeError::Internal(format!("chunk {} is not a data chunk", header.id)));
        }

        let local_depth = header.local_depth.max(MIN_DEPTH);
        let plan = Self::plan_fitting(&header, limits)
            .context(|| format!("resolving large data chunk {}", header.id))?;
        let synthetic_ranges = plan.synthetic_ranges();

        let mut groups: HashMap<usize, CellMap> = HashMap::new();
        for domain in cells.domains() {
            let offset = plan
                .synthetic_cell(domain)
                .and_then(|cell| calc_cell_offset(&cell, &synthetic_ranges))
                .ok_or_else(|| {
                    CubeError::Internal(format!(
                        "grain cell {:?} lies outside large chunk {}",
                        domain, header.id
                    ))
                })?;
            groups
                .entry(offset)
                .or_insert_with(|| CellMap::new(cells.prefix().clone()))
                .insert(domain.clone());
        }

        let mut children = Vec::with_capacity(groups.len());
        let mut cell = Coordinates::first_cell(&synthetic_ranges);
        let mut offset = 0;
        loop {
            if let Some(group) = groups.remove(&offset) {
                children.push(Self::child_node(&header, &plan, cell.codes(), group, local_depth, limits)?);
            }
            offset += 1;
            if cell.become_next_cell(&synthetic_ranges) {
                break;
            }
        }

        let resolved: usize = children.iter().map(|c| c.header.real_num_cells).sum();
        if resolved != header.real_num_cells || !groups.is_empty() {
            return Err(CubeError::Internal(format!(
                "resolving {} placed {} of {} cells",
                header.id, resolved, header.real_num_cells
            )));
        }

        let mut dir = ChunkHeader {
            id: header.id.clone(),
            kind: ChunkKind::Directory,
            depth: header.depth,
            local_depth,
            next_local_depth: true,
            num_dims: header.num_dims,
            tot_num_cells: plan.total_cells(),
            ranges: synthetic_ranges,
            real_num_cells: 0,
            num_measures: 0,
            artificial: Some(plan.artificial_hierarchy()),
            size: 0,
        };
        dir.set_real_cells(children.len());

        debug!(
            chunk = %header.id,
            members_per_dim = plan.members_per_dim,
            grid_cells = dir.tot_num_cells,
            children = children.len(),
            directory_size = dir.size,
            "Resolved large data chunk"
        );
        Ok(CostNode::new(dir, None, children))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_id::ChunkId;
    use crate::schema::{CubeInfo, Dimension};
    use rand::Rng;

    #[test]
    fn test_integer_root() {
        assert_eq!(integer_root(50, 2), 7);
        assert_eq!(integer_root(49, 2), 7);
        assert_eq!(integer_root(48, 2), 6);
        assert_eq!(integer_root(27, 3), 3);
        assert_eq!(integer_root(26, 3), 2);
        assert_eq!(integer_root(0, 2), 0);
        assert_eq!(integer_root(1000, 1), 1000);
    }

    #[test]
    fn test_plan_square_grid() {
        let ranges = vec![LevelRange::new(0, 99), LevelRange::new(0, 99)];
        let plan = plan_equi_grid(&ranges, 50).unwrap();
        assert_eq!(plan.members_per_dim, 7);
        assert_eq!(plan.dims[0].chunk_width, 15);
        assert_eq!(plan.dims[0].members.len(), 7);
        assert_eq!(plan.dims[0].members[6], LevelRange::new(90, 99));
        assert_eq!(plan.total_cells(), 49);
    }

    #[test]
    fn test_plan_small_dimension_is_pseudo() {
        let ranges = vec![LevelRange::new(10, 109), LevelRange::new(0, 2)];
        let plan = plan_equi_grid(&ranges, 100).unwrap();
        assert_eq!(plan.members_per_dim, 10);
        assert!(!plan.dims[0].pseudo);
        assert!(plan.dims[1].pseudo);
        assert_eq!(plan.synthetic_ranges()[1], LevelRange::NULL);
        assert_eq!(plan.total_cells(), 10);
        assert_eq!(plan.synthetic_cell(&[25, 1]), Some(vec![1, PSEUDO_ORDER_CODE]));
        assert_eq!(plan.synthetic_cell(&[5, 1]), None);
    }

    #[test]
    fn test_plan_degenerate_and_capacity() {
        let ranges = vec![LevelRange::new(0, 2), LevelRange::new(0, 0)];
        let plan = plan_equi_grid(&ranges, 100).unwrap();
        assert_eq!(plan.members_per_dim, 3);
        assert_eq!(plan.dims[0].members.len(), 3);
        assert!(plan.dims[1].pseudo);

        let single = vec![LevelRange::new(4, 4), LevelRange::new(0, 0)];
        assert!(matches!(plan_equi_grid(&single, 100), Err(CubeError::Capacity(_))));

        let tiny = plan_equi_grid(&[LevelRange::new(0, 9), LevelRange::new(0, 9)], 1).unwrap();
        assert_eq!(tiny.members_per_dim, 2);
    }

    #[test]
    fn test_plan_conserves_grain_members() {
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let dims = rng.gen_range(1..4);
            let ranges: Vec<LevelRange> = (0..dims)
                .map(|_| {
                    let left = rng.gen_range(0..50);
                    LevelRange::new(left, left + rng.gen_range(1..300))
                })
                .collect();
            let plan = plan_equi_grid(&ranges, rng.gen_range(1..2000)).unwrap();
            for grid in &plan.dims {
                let covered: usize = grid.members.iter().map(LevelRange::width).sum();
                assert_eq!(covered, grid.population());
                assert_eq!(grid.members.first().unwrap().left, grid.range.left);
                assert_eq!(grid.members.last().unwrap().right, grid.range.right);
                assert!(grid.members.windows(2).all(|w| w[0].right + 1 == w[1].left));
                if !grid.pseudo {
                    assert!(grid.members.len() <= plan.members_per_dim);
                }
            }
        }
    }

    fn create_large_node(limits: &PackingLimits) -> CostNode {
        let cube = CubeInfo::new(
            "large",
            vec![Dimension::balanced("a", &[1, 30]), Dimension::balanced("b", &[1, 30])],
            vec!["m".to_string()],
        );
        let mut header = ChunkHeader::for_chunk("0|0".parse().unwrap(), &cube).unwrap();
        let mut cells = CellMap::new(header.id.clone());
        for i in 0..30 {
            for j in 0..30 {
                if (i + j) % 3 != 0 {
                    cells.insert(vec![i, j]);
                }
            }
        }
        header.set_real_cells(cells.len());
        assert!(limits.is_oversized(PackingLimits::chunk_cost(header.size)));
        CostNode::new(header, Some(cells), Vec::new())
    }

    #[test]
    fn test_resolve_builds_artificial_directory() {
        let limits = PackingLimits::new(1024, 256, 8);
        let node = create_large_node(&limits);
        let real = node.header.real_num_cells;
        let id = node.header.id.clone();

        let subtree = EquiGridEquiChildren.resolve(node, &limits).unwrap();
        let dir = &subtree.header;
        assert_eq!(dir.kind, ChunkKind::Directory);
        assert_eq!(dir.id, id);
        assert!(dir.next_local_depth);
        assert_eq!(dir.local_depth, MIN_DEPTH);
        assert!(dir.size + 8 <= limits.usable_body);
        assert_eq!(dir.real_num_cells, subtree.children.len());

        let total: usize = subtree.children.iter().map(|c| c.header.real_num_cells).sum();
        assert_eq!(total, real);
        for child in &subtree.children {
            assert_eq!(child.header.kind, ChunkKind::Data);
            assert_eq!(child.header.local_depth, MIN_DEPTH + 1);
            assert_eq!(child.header.num_domains(), child.header.id.depth());
            assert_eq!(child.header.logical_id(), id);
            let cell = child.header.id.last_domain().unwrap();
            assert!(calc_cell_offset(cell, &dir.ranges).is_some());
        }
        let mut ids: Vec<ChunkId> = subtree.children.iter().map(|c| c.header.id.clone()).collect();
        let walked = ids.clone();
        ids.sort_by_key(|id| calc_cell_offset(id.last_domain().unwrap(), &dir.ranges));
        assert_eq!(ids, walked);
    }

    #[test]
    fn test_resolve_requires_cell_map() {
        let limits = PackingLimits::new(1024, 256, 8);
        let mut node = create_large_node(&limits);
        node.cells = None;
        assert!(matches!(
            EquiGridEquiChildren.resolve(node, &limits),
            Err(CubeError::Internal(_))
        ));
    }
}
