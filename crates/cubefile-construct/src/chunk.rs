//! Materialised directory and data chunks.

use crate::bitmap::Bitmap;
use crate::coords::calc_cell_offset;
use crate::facts::FactFile;
use crate::header::{ChunkHeader, NULL_DEPTH};
use cubefile_common::{BucketId, CubeError, Result};
use std::fmt;

/// Pointer from a directory cell to a child chunk: the bucket holding it and
/// its slot inside that bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DirEntry {
    pub bucket_id: BucketId,
    pub chunk_slot: u16,
}

impl DirEntry {
    /// Entry of an empty cell.
    pub const EMPTY: DirEntry = DirEntry {
        bucket_id: BucketId::NULL,
        chunk_slot: u16::MAX,
    };

    /// Creates an entry.
    pub fn new(bucket_id: BucketId, chunk_slot: u16) -> Self {
        Self {
            bucket_id,
            chunk_slot,
        }
    }

    /// Returns true for the empty entry.
    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }
}

impl Default for DirEntry {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Display for DirEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("(empty)")
        } else {
            write!(f, "({}, slot {})", self.bucket_id, self.chunk_slot)
        }
    }
}

/// Directory chunk: one entry per cell in row-major order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirChunk {
    pub header: ChunkHeader,
    pub entries: Vec<DirEntry>,
}

impl DirChunk {
    /// Creates a directory with every entry empty.
    pub fn new(header: ChunkHeader) -> Self {
        let entries = vec![DirEntry::EMPTY; header.tot_num_cells];
        Self { header, entries }
    }

    /// Points the cell at `coords` to `entry`. The cell must lie inside the
    /// chunk and must not be set yet.
    pub fn set_entry(&mut self, coords: &[i32], entry: DirEntry) -> Result<()> {
        let offset = calc_cell_offset(coords, &self.header.ranges).ok_or_else(|| {
            CubeError::Internal(format!(
                "cell {:?} lies outside directory {}",
                coords, self.header.id
            ))
        })?;
        let slot = &mut self.entries[offset];
        if !slot.is_empty() {
            return Err(CubeError::Internal(format!(
                "cell {:?} of directory {} is already set to {}",
                coords, self.header.id, slot
            )));
        }
        *slot = entry;
        Ok(())
    }

    /// Entry of the cell at `coords`.
    pub fn entry_at(&self, coords: &[i32]) -> Option<DirEntry> {
        calc_cell_offset(coords, &self.header.ranges).map(|offset| self.entries[offset])
    }

    /// Number of non-empty entries.
    pub fn populated(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_empty()).count()
    }
}

/// Measures of one grain cell.
#[derive(Debug, Clone, PartialEq)]
pub struct DataEntry {
    pub measures: Vec<f64>,
}

/// Data chunk: compression bitmap plus the entries of the set cells.
#[derive(Debug, Clone, PartialEq)]
pub struct DataChunk {
    pub header: ChunkHeader,
    pub bitmap: Bitmap,
    pub entries: Vec<DataEntry>,
}

impl DataChunk {
    /// Builds a data chunk from `(offset, measures)` pairs in any order.
    pub fn from_cells(header: ChunkHeader, mut cells: Vec<(usize, Vec<f64>)>) -> Result<Self> {
        cells.sort_by_key(|(offset, _)| *offset);
        let mut bitmap = Bitmap::new(header.tot_num_cells);
        let mut entries = Vec::with_capacity(cells.len());
        for (offset, measures) in cells {
            if offset >= bitmap.len() {
                return Err(CubeError::Internal(format!(
                    "offset {} outside data chunk {} of {} cells",
                    offset,
                    header.id,
                    bitmap.len()
                )));
            }
            if bitmap.get(offset) {
                return Err(CubeError::DuplicateCell(format!(
                    "{} offset {}",
                    header.id, offset
                )));
            }
            if measures.len() != header.num_measures {
                return Err(CubeError::Internal(format!(
                    "cell at offset {} of {} has {} measures, expected {}",
                    offset,
                    header.id,
                    measures.len(),
                    header.num_measures
                )));
            }
            bitmap.set(offset);
            entries.push(DataEntry { measures });
        }
        Ok(Self {
            header,
            bitmap,
            entries,
        })
    }

    /// Materialises the chunk described by `header` from the fact lines
    /// under its logical id. Lines outside the header ranges belong to a
    /// sibling of an artificial chunk and are skipped.
    pub fn load(header: &ChunkHeader, facts: &FactFile) -> Result<Self> {
        let logical = header.logical_id();
        let depth = logical.depth();
        let mut cells = Vec::with_capacity(header.real_num_cells);
        facts.scan_prefix(&logical, |line| {
            let Some(domain) = line.id.domain(depth) else {
                return Ok(());
            };
            match calc_cell_offset(domain, &header.ranges) {
                Some(offset) => cells.push((offset, line.measures)),
                None if header.local_depth != NULL_DEPTH => {}
                None => {
                    return Err(CubeError::FactFile {
                        line: line.line_no,
                        reason: format!("cell {} lies outside chunk {}", line.id, header.id),
                    })
                }
            }
            Ok(())
        })?;

        if cells.len() != header.real_num_cells {
            return Err(CubeError::Internal(format!(
                "data chunk {} loaded {} cells, cost tree counted {}",
                header.id,
                cells.len(),
                header.real_num_cells
            )));
        }
        Self::from_cells(header.clone(), cells)
    }

    /// Entry of the cell at `coords`, `None` if empty or outside.
    pub fn entry_at(&self, coords: &[i32]) -> Option<&DataEntry> {
        let offset = calc_cell_offset(coords, &self.header.ranges)?;
        self.bitmap
            .compressed_index(offset)
            .map(|index| &self.entries[index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_id::ChunkId;
    use crate::schema::{CubeInfo, Dimension};

    fn create_test_cube() -> CubeInfo {
        CubeInfo::new(
            "chunks",
            vec![Dimension::balanced("a", &[1, 2]), Dimension::balanced("b", &[1, 2])],
            vec!["m".to_string()],
        )
    }

    #[test]
    fn test_dir_entry_empty() {
        assert!(DirEntry::EMPTY.is_empty());
        assert!(DirEntry::default().is_empty());
        assert!(!DirEntry::new(BucketId(3), 0).is_empty());
    }

    #[test]
    fn test_dir_chunk_set_entry() {
        let cube = create_test_cube();
        let header = ChunkHeader::for_chunk(ChunkId::root(), &cube).unwrap();
        let mut dir = DirChunk::new(header);
        dir.set_entry(&[0, 0], DirEntry::new(BucketId(2), 1)).unwrap();
        assert_eq!(dir.entry_at(&[0, 0]), Some(DirEntry::new(BucketId(2), 1)));
        assert_eq!(dir.populated(), 1);

        let again = dir.set_entry(&[0, 0], DirEntry::new(BucketId(3), 0));
        assert!(matches!(again, Err(CubeError::Internal(_))));
        let outside = dir.set_entry(&[1, 0], DirEntry::new(BucketId(3), 0));
        assert!(matches!(outside, Err(CubeError::Internal(_))));
    }

    #[test]
    fn test_data_chunk_load() {
        let cube = create_test_cube();
        let facts = FactFile::from_text(
            "VALUES_START\n0|0.0|1 1.5\n0|0.1|0 2.5\n0|0.1|1 3.5\nVALUES_END\n",
            &cube,
        );
        let mut header = ChunkHeader::for_chunk("0|0".parse().unwrap(), &cube).unwrap();
        header.set_real_cells(3);
        let chunk = DataChunk::load(&header, &facts).unwrap();

        assert_eq!(chunk.bitmap.iter_ones().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(chunk.entry_at(&[0, 0]).is_none());
        assert_eq!(chunk.entry_at(&[1, 0]).unwrap().measures, vec![2.5]);
    }

    #[test]
    fn test_data_chunk_load_count_mismatch() {
        let cube = create_test_cube();
        let facts = FactFile::from_text("VALUES_START\n0|0.0|1 1.5\nVALUES_END\n", &cube);
        let mut header = ChunkHeader::for_chunk("0|0".parse().unwrap(), &cube).unwrap();
        header.set_real_cells(2);
        assert!(matches!(
            DataChunk::load(&header, &facts),
            Err(CubeError::Internal(_))
        ));
    }

    #[test]
    fn test_from_cells_rejects_duplicates() {
        let cube = create_test_cube();
        let header = ChunkHeader::for_chunk("0|0".parse().unwrap(), &cube).unwrap();
        let result = DataChunk::from_cells(header, vec![(1, vec![1.0]), (1, vec![2.0])]);
        assert!(matches!(result, Err(CubeError::DuplicateCell(_))));
    }
}
