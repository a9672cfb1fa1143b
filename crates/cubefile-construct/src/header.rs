//! Chunk headers and the closed-form chunk size.
//!
//! The size of a chunk is known as soon as its header is: the cost tree
//! sizes every chunk without materialising it, and the codec later produces
//! exactly that many bytes.

use crate::chunk_id::ChunkId;
use crate::constants::{
    ARTIFICIAL_COUNT_SIZE, ARTIFICIAL_ENTRY_SIZE, BITMAP_WORD_BITS, BITMAP_WORD_SIZE,
    CHUNK_FIXED_HEADER_SIZE, DIR_ENTRY_SIZE, LEVEL_RANGE_SIZE, MEASURE_SIZE, ORDER_CODE_SIZE,
};
use crate::coords::{total_cells, LevelRange};
use crate::schema::CubeInfo;
use cubefile_common::Result;
use std::collections::BTreeMap;
use std::fmt;

/// Local depth of a chunk outside any artificial chunking.
pub const NULL_DEPTH: i16 = -1;

/// Local depth of the first artificial level.
pub const MIN_DEPTH: i16 = 0;

/// Role of a chunk in the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkKind {
    Root,
    Directory,
    Data,
}

impl ChunkKind {
    /// Classifies a chunk from its depths. A chunk at `max_depth` with the
    /// continuation flag set is an artificial directory.
    pub fn classify(depth: usize, next_local_depth: bool, max_depth: usize) -> Self {
        if depth == 0 && !next_local_depth {
            ChunkKind::Root
        } else if depth < max_depth || (depth == max_depth && next_local_depth) {
            ChunkKind::Directory
        } else {
            ChunkKind::Data
        }
    }

    /// Returns true for root and directory chunks.
    pub fn is_directory(&self) -> bool {
        !matches!(self, ChunkKind::Data)
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkKind::Root => f.write_str("root"),
            ChunkKind::Directory => f.write_str("directory"),
            ChunkKind::Data => f.write_str("data"),
        }
    }
}

/// Mapping from synthetic order codes to the grain ranges they cover, one
/// map per dimension. Pseudo dimensions have an empty map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtificialHierarchy {
    dims: Vec<BTreeMap<i32, LevelRange>>,
}

impl ArtificialHierarchy {
    /// Creates an empty table for `num_dims` dimensions.
    pub fn new(num_dims: usize) -> Self {
        Self {
            dims: vec![BTreeMap::new(); num_dims],
        }
    }

    /// Maps synthetic `code` of dimension `dim` to `range`.
    pub fn insert(&mut self, dim: usize, code: i32, range: LevelRange) {
        self.dims[dim].insert(code, range);
    }

    /// Grain range of synthetic `code` in dimension `dim`.
    pub fn get(&self, dim: usize, code: i32) -> Option<LevelRange> {
        self.dims.get(dim).and_then(|m| m.get(&code).copied())
    }

    /// Entries of dimension `dim`, ascending by code.
    pub fn entries(&self, dim: usize) -> impl Iterator<Item = (i32, LevelRange)> + '_ {
        self.dims[dim].iter().map(|(code, range)| (*code, *range))
    }

    /// Number of dimensions.
    pub fn num_dims(&self) -> usize {
        self.dims.len()
    }

    /// Encoded size of the table.
    pub fn encoded_size(&self) -> usize {
        self.dims
            .iter()
            .map(|m| ARTIFICIAL_COUNT_SIZE + m.len() * ARTIFICIAL_ENTRY_SIZE)
            .sum()
    }
}

/// Metadata of one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkHeader {
    pub id: ChunkId,
    pub kind: ChunkKind,
    /// Logical depth; artificial domains are not counted.
    pub depth: usize,
    pub local_depth: i16,
    /// Set on the directory created by large-chunk resolution.
    pub next_local_depth: bool,
    pub num_dims: usize,
    pub ranges: Vec<LevelRange>,
    pub tot_num_cells: usize,
    pub real_num_cells: usize,
    /// Zero for directories.
    pub num_measures: usize,
    pub artificial: Option<ArtificialHierarchy>,
    /// Exact encoded size in bytes.
    pub size: usize,
}

impl ChunkHeader {
    /// Header of the logical chunk `id` with no cells counted yet.
    pub fn for_chunk(id: ChunkId, cube: &CubeInfo) -> Result<Self> {
        let ranges = cube.chunk_ranges(&id)?;
        let depth = id.depth();
        let kind = ChunkKind::classify(depth, false, cube.max_depth);
        let num_measures = if kind == ChunkKind::Data {
            cube.num_measures()
        } else {
            0
        };
        let mut header = Self {
            id,
            kind,
            depth,
            local_depth: NULL_DEPTH,
            next_local_depth: false,
            num_dims: cube.num_dims(),
            tot_num_cells: total_cells(&ranges),
            ranges,
            real_num_cells: 0,
            num_measures,
            artificial: None,
            size: 0,
        };
        header.refresh_size();
        Ok(header)
    }

    /// Returns true for root and directory chunks.
    pub fn is_directory(&self) -> bool {
        self.kind.is_directory()
    }

    /// Returns true for data chunks.
    pub fn is_data(&self) -> bool {
        self.kind == ChunkKind::Data
    }

    /// Returns true for a directory created by large-chunk resolution.
    pub fn is_artificial(&self) -> bool {
        self.artificial.is_some()
    }

    /// Number of domains in the id.
    pub fn num_domains(&self) -> usize {
        self.depth + (self.local_depth - MIN_DEPTH).max(0) as usize
    }

    /// The id with artificial domains stripped.
    pub fn logical_id(&self) -> ChunkId {
        self.id.prefix(self.depth)
    }

    /// Sets the number of non-empty cells and recomputes the size.
    pub fn set_real_cells(&mut self, real_num_cells: usize) {
        self.real_num_cells = real_num_cells;
        self.refresh_size();
    }

    /// Recomputes `size` from the other fields.
    pub fn refresh_size(&mut self) {
        self.size = self.encoded_size();
    }

    /// Size of the section shared by every kind: fixed header, id domains
    /// and ranges.
    pub fn prefix_size(&self) -> usize {
        CHUNK_FIXED_HEADER_SIZE
            + self.num_domains() * self.num_dims * ORDER_CODE_SIZE
            + self.num_dims * LEVEL_RANGE_SIZE
    }

    /// Closed-form encoded size.
    pub fn encoded_size(&self) -> usize {
        let artificial = self
            .artificial
            .as_ref()
            .map_or(0, ArtificialHierarchy::encoded_size);
        if self.is_directory() {
            self.prefix_size() + artificial + self.tot_num_cells * DIR_ENTRY_SIZE
        } else {
            self.prefix_size()
                + bitmap_words(self.tot_num_cells) * BITMAP_WORD_SIZE
                + self.real_num_cells * self.num_measures * MEASURE_SIZE
        }
    }

    /// Size without the artificial hierarchy table.
    pub fn size_without_artificial(&self) -> usize {
        self.size
            - self
                .artificial
                .as_ref()
                .map_or(0, ArtificialHierarchy::encoded_size)
    }
}

/// Number of bitmap words covering `bits` bits.
pub fn bitmap_words(bits: usize) -> usize {
    bits.div_ceil(BITMAP_WORD_BITS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Dimension;

    fn create_test_cube() -> CubeInfo {
        CubeInfo::new(
            "hdr",
            vec![Dimension::balanced("a", &[1, 2]), Dimension::balanced("b", &[1, 2])],
            vec!["m1".to_string(), "m2".to_string()],
        )
    }

    #[test]
    fn test_chunk_kind_classify() {
        assert_eq!(ChunkKind::classify(0, false, 2), ChunkKind::Root);
        assert_eq!(ChunkKind::classify(1, false, 2), ChunkKind::Directory);
        assert_eq!(ChunkKind::classify(2, false, 2), ChunkKind::Data);
        assert_eq!(ChunkKind::classify(2, true, 2), ChunkKind::Directory);
    }

    #[test]
    fn test_root_header_size() {
        let cube = create_test_cube();
        let mut root = ChunkHeader::for_chunk(ChunkId::root(), &cube).unwrap();
        root.set_real_cells(1);
        assert_eq!(root.kind, ChunkKind::Root);
        assert_eq!(root.tot_num_cells, 1);
        assert_eq!(root.num_domains(), 0);
        assert_eq!(root.size, 24 + 2 * 8 + 8);
    }

    #[test]
    fn test_data_header_size() {
        let cube = create_test_cube();
        let mut data = ChunkHeader::for_chunk("0|0".parse().unwrap(), &cube).unwrap();
        data.set_real_cells(3);
        assert_eq!(data.kind, ChunkKind::Data);
        assert_eq!(data.tot_num_cells, 4);
        assert_eq!(data.num_measures, 2);
        // header + one domain + ranges + one bitmap word + 3 cells x 2 measures
        assert_eq!(data.size, 24 + 2 * 4 + 2 * 8 + 4 + 3 * 2 * 8);
    }

    #[test]
    fn test_num_domains_with_local_depth() {
        let cube = create_test_cube();
        let mut header = ChunkHeader::for_chunk("0|0".parse().unwrap(), &cube).unwrap();
        assert_eq!(header.num_domains(), 1);
        header.local_depth = MIN_DEPTH;
        assert_eq!(header.num_domains(), 1);
        header.local_depth = MIN_DEPTH + 2;
        assert_eq!(header.num_domains(), 3);
    }

    #[test]
    fn test_artificial_table_size() {
        let mut table = ArtificialHierarchy::new(2);
        table.insert(0, 0, LevelRange::new(0, 9));
        table.insert(0, 1, LevelRange::new(10, 19));
        assert_eq!(table.encoded_size(), 4 + 2 * 12 + 4);
        assert_eq!(table.get(0, 1), Some(LevelRange::new(10, 19)));
        assert_eq!(table.get(1, 0), None);
    }
}
