//! Non-empty child cells of a chunk.

use crate::chunk_id::{ChunkId, Domain};
use crate::facts::FactFile;
use cubefile_common::{CubeError, Result};
use std::collections::HashSet;

/// How a scan treats a repeated child domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Several grain cells share the child; keep it once.
    Merge,
    /// Each child is one grain cell; a repeat is a double entry.
    Reject,
}

/// Insertion-ordered set of the child cells of one chunk. Every cell id is
/// the chunk's prefix extended by one domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellMap {
    prefix: ChunkId,
    domains: Vec<Domain>,
    seen: HashSet<Domain>,
}

impl CellMap {
    /// Creates an empty map of the children of `prefix`.
    pub fn new(prefix: ChunkId) -> Self {
        Self {
            prefix,
            domains: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Collects the child domains of `prefix` from every fact line under it.
    /// Fails with `PrefixNotFound` if no line matches.
    pub fn scan(facts: &FactFile, prefix: &ChunkId, policy: DuplicatePolicy) -> Result<Self> {
        let mut map = CellMap::new(prefix.clone());
        let depth = prefix.depth();
        let matches = facts.scan_prefix(prefix, |line| {
            let domain = line.id.domain(depth).ok_or_else(|| CubeError::FactFile {
                line: line.line_no,
                reason: format!("cell {} has no domain below {}", line.id, prefix),
            })?;
            if !map.insert(domain.to_vec()) && policy == DuplicatePolicy::Reject {
                return Err(CubeError::DuplicateCell(line.id.prefix(depth + 1).to_string()));
            }
            Ok(())
        })?;
        if matches == 0 {
            return Err(CubeError::PrefixNotFound(prefix.to_string()));
        }
        Ok(map)
    }

    /// Adds a child domain. Returns false if it was already present.
    pub fn insert(&mut self, domain: Domain) -> bool {
        if self.seen.contains(&domain) {
            return false;
        }
        self.seen.insert(domain.clone());
        self.domains.push(domain);
        true
    }

    /// Returns true if the child with `domain` is present.
    pub fn contains(&self, domain: &[i32]) -> bool {
        self.seen.contains(domain)
    }

    /// Chunk whose children these are.
    pub fn prefix(&self) -> &ChunkId {
        &self.prefix
    }

    /// Number of children.
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    /// Returns true if there are no children.
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// Child domains in insertion order.
    pub fn domains(&self) -> &[Domain] {
        &self.domains
    }

    /// Full child ids in insertion order.
    pub fn cell_ids(&self) -> impl Iterator<Item = ChunkId> + '_ {
        self.domains.iter().map(|d| self.prefix.child(d))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CubeInfo, Dimension};

    fn create_test_cube() -> CubeInfo {
        CubeInfo::new(
            "cells",
            vec![Dimension::balanced("a", &[1, 2]), Dimension::balanced("b", &[1, 3])],
            vec!["m".to_string()],
        )
    }

    #[test]
    fn test_cell_map_insert_order() {
        let mut map = CellMap::new(ChunkId::root());
        assert!(map.insert(vec![1, 0]));
        assert!(map.insert(vec![0, 0]));
        assert!(!map.insert(vec![1, 0]));
        assert_eq!(map.len(), 2);
        assert_eq!(map.domains(), &[vec![1, 0], vec![0, 0]]);
        assert!(map.contains(&[0, 0]));
    }

    #[test]
    fn test_scan_merges_directory_children() {
        let cube = create_test_cube();
        let facts = FactFile::from_text(
            "VALUES_START\n0|0.0|0 1\n0|0.0|2 1\n0|0.1|1 1\nVALUES_END\n",
            &cube,
        );
        let map = CellMap::scan(&facts, &ChunkId::root(), DuplicatePolicy::Merge).unwrap();
        assert_eq!(map.len(), 1);

        let grain = CellMap::scan(&facts, &"0|0".parse().unwrap(), DuplicatePolicy::Reject).unwrap();
        let ids: Vec<String> = grain.cell_ids().map(|id| id.to_string()).collect();
        assert_eq!(ids, vec!["0|0.0|0", "0|0.0|2", "0|0.1|1"]);
    }

    #[test]
    fn test_scan_rejects_double_entry() {
        let cube = create_test_cube();
        let facts = FactFile::from_text("VALUES_START\n0|0.0|0 1\n0|0.0|0 2\nVALUES_END\n", &cube);
        let result = CellMap::scan(&facts, &"0|0".parse().unwrap(), DuplicatePolicy::Reject);
        assert!(matches!(result, Err(CubeError::DuplicateCell(id)) if id == "0|0.0|0"));
    }

    #[test]
    fn test_scan_prefix_not_found() {
        let cube = create_test_cube();
        let facts = FactFile::from_text("VALUES_START\n0|0.0|0 1\nVALUES_END\n", &cube);
        let result = CellMap::scan(&facts, &"0|0.1|1".parse().unwrap(), DuplicatePolicy::Merge);
        assert!(matches!(result, Err(CubeError::PrefixNotFound(_))));
    }
}
