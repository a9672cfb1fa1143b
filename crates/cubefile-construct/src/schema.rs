//! Catalog schema of a cube.
//!
//! Dimensions are stored top level first. Hierarchies are bottom-aligned:
//! every grain level sits at chunk depth `max_depth`, and a dimension with
//! fewer levels than the deepest one is pseudo at the top depths.

use crate::chunk_id::ChunkId;
use crate::coords::LevelRange;
use cubefile_common::{BucketId, ConstructionConfig, CubeError, FileId, Result};
use serde::{Deserialize, Serialize};

/// One member of a level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub name: String,
    pub order_code: i32,
    /// Order code of the parent member, `None` at the top level.
    pub parent_order_code: Option<i32>,
    /// Order codes of the children in the level below, `None` at the grain.
    pub children: Option<LevelRange>,
}

/// A hierarchy level. Member `i` has order code `i`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    pub name: String,
    pub members: Vec<Member>,
}

impl Level {
    /// Member with `order_code`.
    pub fn member(&self, order_code: i32) -> Option<&Member> {
        usize::try_from(order_code)
            .ok()
            .and_then(|i| self.members.get(i))
    }

    /// Range spanning every member of the level.
    pub fn full_range(&self) -> LevelRange {
        LevelRange::new(0, self.members.len() as i32 - 1)
    }
}

/// A dimension with its levels, top level first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub levels: Vec<Level>,
}

impl Dimension {
    /// Builds a balanced hierarchy. `fanouts[0]` is the number of top level
    /// members and `fanouts[i]` the number of children of each member of
    /// level `i - 1`.
    pub fn balanced(name: &str, fanouts: &[usize]) -> Self {
        let mut levels: Vec<Level> = Vec::with_capacity(fanouts.len());
        for (depth, &fanout) in fanouts.iter().enumerate() {
            let parents = levels.last().map(|l| l.members.len());
            let count = parents.unwrap_or(1) * fanout;
            let members = (0..count)
                .map(|code| Member {
                    name: format!("{}{}_{}", name, depth, code),
                    order_code: code as i32,
                    parent_order_code: parents.map(|_| (code / fanout) as i32),
                    children: None,
                })
                .collect();
            if let (Some(parent_level), Some(_)) = (levels.last_mut(), parents) {
                for member in parent_level.members.iter_mut() {
                    let first = member.order_code * fanout as i32;
                    member.children = Some(LevelRange::new(first, first + fanout as i32 - 1));
                }
            }
            levels.push(Level {
                name: format!("{}_level{}", name, depth),
                members,
            });
        }
        Self {
            name: name.to_string(),
            levels,
        }
    }

    /// Number of levels.
    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }
}

/// Cube metadata: dimensions, measures, chunking depth and the location of
/// the constructed CUBE File.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CubeInfo {
    pub name: String,
    pub dimensions: Vec<Dimension>,
    pub measures: Vec<String>,
    /// Depth of the data chunks.
    pub max_depth: usize,
    pub config: ConstructionConfig,
    /// Set once the cube has been constructed.
    pub file_id: Option<FileId>,
    /// Bucket holding the root directory, set once constructed.
    pub root_bucket_id: Option<BucketId>,
}

impl CubeInfo {
    /// Creates a cube with the default construction config.
    pub fn new(name: &str, dimensions: Vec<Dimension>, measures: Vec<String>) -> Self {
        let max_depth = dimensions
            .iter()
            .map(Dimension::num_levels)
            .max()
            .unwrap_or(0)
            .saturating_sub(1);
        Self {
            name: name.to_string(),
            dimensions,
            measures,
            max_depth,
            config: ConstructionConfig::default(),
            file_id: None,
            root_bucket_id: None,
        }
    }

    /// Replaces the construction config.
    pub fn with_config(mut self, config: ConstructionConfig) -> Self {
        self.config = config;
        self
    }

    /// Number of dimensions.
    pub fn num_dims(&self) -> usize {
        self.dimensions.len()
    }

    /// Number of measures per grain cell.
    pub fn num_measures(&self) -> usize {
        self.measures.len()
    }

    /// Number of domains of a grain cell id.
    pub fn grain_depth(&self) -> usize {
        self.max_depth + 1
    }

    /// Level of dimension `dim` at chunk depth `depth`, `None` where the
    /// dimension is pseudo.
    pub fn level_at_depth(&self, dim: usize, depth: usize) -> Option<&Level> {
        let dimension = self.dimensions.get(dim)?;
        let offset = (self.max_depth + 1).checked_sub(dimension.num_levels())?;
        depth
            .checked_sub(offset)
            .and_then(|i| dimension.levels.get(i))
    }

    /// Cell ranges of the logical chunk `id`.
    pub fn chunk_ranges(&self, id: &ChunkId) -> Result<Vec<LevelRange>> {
        let depth = id.depth();
        if depth > self.max_depth {
            return Err(CubeError::MalformedChunkId {
                id: id.to_string(),
                reason: format!("deeper than max depth {}", self.max_depth),
            });
        }
        if let Some(n) = id.num_dims() {
            if n != self.num_dims() {
                return Err(CubeError::MalformedChunkId {
                    id: id.to_string(),
                    reason: format!("expected {} dimensions, found {}", self.num_dims(), n),
                });
            }
        }

        let mut ranges = Vec::with_capacity(self.num_dims());
        for dim in 0..self.num_dims() {
            let Some(level) = self.level_at_depth(dim, depth) else {
                ranges.push(LevelRange::NULL);
                continue;
            };
            let parent_level = depth.checked_sub(1).and_then(|d| self.level_at_depth(dim, d));
            let range = match (parent_level, id.last_domain()) {
                (Some(parent_level), Some(domain)) => {
                    let code = domain[dim];
                    let member = parent_level.member(code).ok_or_else(|| CubeError::MemberNotFound {
                        dimension: self.dimensions[dim].name.clone(),
                        level: parent_level.name.clone(),
                        order_code: code,
                    })?;
                    member.children.ok_or_else(|| {
                        CubeError::Schema(format!(
                            "member {} of level {} has no children",
                            member.name, parent_level.name
                        ))
                    })?
                }
                _ => level.full_range(),
            };
            ranges.push(range);
        }
        Ok(ranges)
    }

    /// Checks the schema for consistency.
    pub fn validate(&self) -> Result<()> {
        if self.dimensions.is_empty() {
            return Err(CubeError::Schema("cube has no dimensions".to_string()));
        }
        if self.measures.is_empty() {
            return Err(CubeError::Schema("cube has no measures".to_string()));
        }
        let deepest = self.dimensions.iter().map(Dimension::num_levels).max().unwrap_or(0);
        if deepest < 2 {
            return Err(CubeError::Schema(
                "at least one dimension needs two or more levels".to_string(),
            ));
        }
        if self.max_depth != deepest - 1 {
            return Err(CubeError::Schema(format!(
                "max depth {} does not match deepest hierarchy ({} levels)",
                self.max_depth, deepest
            )));
        }
        for dimension in &self.dimensions {
            validate_dimension(dimension)?;
        }
        Ok(())
    }
}

fn validate_dimension(dimension: &Dimension) -> Result<()> {
    let fail = |reason: String| Err(CubeError::Schema(format!("dimension {}: {}", dimension.name, reason)));
    if dimension.levels.is_empty() {
        return fail("no levels".to_string());
    }
    for (depth, level) in dimension.levels.iter().enumerate() {
        if level.members.is_empty() {
            return fail(format!("level {} has no members", level.name));
        }
        let below = dimension.levels.get(depth + 1);
        let mut expected_child = 0;
        for (code, member) in level.members.iter().enumerate() {
            if member.order_code != code as i32 {
                return fail(format!("member {} has order code {}, expected {}", member.name, member.order_code, code));
            }
            if (depth == 0) != member.parent_order_code.is_none() {
                return fail(format!("member {} has an inconsistent parent", member.name));
            }
            match (below, member.children) {
                (None, None) => {}
                (Some(below), Some(children)) => {
                    if children.is_null() || children.left != expected_child || children.right < children.left {
                        return fail(format!("member {} has non-contiguous children {}", member.name, children));
                    }
                    for child_code in children.left..=children.right {
                        let parent = below.member(child_code).and_then(|c| c.parent_order_code);
                        if parent != Some(member.order_code) {
                            return fail(format!("child {} of member {} does not point back", child_code, member.name));
                        }
                    }
                    expected_child = children.right + 1;
                }
                _ => return fail(format!("member {} has children inconsistent with its level", member.name)),
            }
        }
        if let Some(below) = below {
            if expected_child as usize != below.members.len() {
                return fail(format!("level {} is not fully covered by its parents", below.name));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_cube() -> CubeInfo {
        CubeInfo::new(
            "sales",
            vec![
                Dimension::balanced("time", &[1, 2, 3]),
                Dimension::balanced("store", &[2, 2]),
            ],
            vec!["amount".to_string()],
        )
    }

    #[test]
    fn test_balanced_dimension() {
        let dim = Dimension::balanced("d", &[2, 3]);
        assert_eq!(dim.num_levels(), 2);
        assert_eq!(dim.levels[1].members.len(), 6);
        assert_eq!(dim.levels[0].members[1].children, Some(LevelRange::new(3, 5)));
        assert_eq!(dim.levels[1].members[4].parent_order_code, Some(1));
        assert!(dim.levels[1].members[4].children.is_none());
    }

    #[test]
    fn test_validate_accepts_balanced_cube() {
        let cube = create_test_cube();
        assert_eq!(cube.max_depth, 2);
        cube.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_flat_cube() {
        let cube = CubeInfo::new("flat", vec![Dimension::balanced("d", &[4])], vec!["m".to_string()]);
        assert!(matches!(cube.validate(), Err(CubeError::Schema(_))));
    }

    #[test]
    fn test_validate_rejects_broken_children() {
        let mut cube = create_test_cube();
        cube.dimensions[0].levels[1].members[0].children = Some(LevelRange::new(1, 2));
        assert!(matches!(cube.validate(), Err(CubeError::Schema(_))));
    }

    #[test]
    fn test_level_at_depth_bottom_aligned() {
        let cube = create_test_cube();
        assert!(cube.level_at_depth(1, 0).is_none());
        assert_eq!(cube.level_at_depth(1, 1).unwrap().members.len(), 2);
        assert_eq!(cube.level_at_depth(1, 2).unwrap().members.len(), 4);
        assert_eq!(cube.level_at_depth(0, 0).unwrap().members.len(), 1);
    }

    #[test]
    fn test_chunk_ranges() {
        let cube = create_test_cube();
        let root = cube.chunk_ranges(&ChunkId::root()).unwrap();
        assert_eq!(root, vec![LevelRange::new(0, 0), LevelRange::NULL]);

        let depth1 = cube.chunk_ranges(&"0|P".parse().unwrap()).unwrap();
        assert_eq!(depth1, vec![LevelRange::new(0, 1), LevelRange::new(0, 1)]);

        let depth2 = cube.chunk_ranges(&"0|P.1|1".parse().unwrap()).unwrap();
        assert_eq!(depth2, vec![LevelRange::new(3, 5), LevelRange::new(2, 3)]);
    }

    #[test]
    fn test_chunk_ranges_unknown_member() {
        let cube = create_test_cube();
        let result = cube.chunk_ranges(&"0|P.1|7".parse().unwrap());
        assert!(matches!(result, Err(CubeError::MemberNotFound { order_code: 7, .. })));
    }

    #[test]
    fn test_cube_info_serde() {
        let cube = create_test_cube();
        let json = serde_json::to_string(&cube).unwrap();
        let back: CubeInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cube);
    }
}
