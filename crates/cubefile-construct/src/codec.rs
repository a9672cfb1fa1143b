//! Byte encoding of chunks and zero-copy views over encoded chunks.
//!
//! Layout (little-endian):
//!
//! ```text
//! +------+------+-------+-------+------+---------+----------+-----+------+----------+
//! | kind | next | depth | local | dims | domains | measures | tot | real | reserved |
//! |  u8  |  u8  |  u16  |  i16  | u16  |   u16   |   u16    | u32 | u32  |    4     |
//! +------+------+-------+-------+------+---------+----------+-----+------+----------+
//! | id domains:  domains x dims x i32                                               |
//! | ranges:      dims x (i32 left, i32 right)                                       |
//! | artificial directories only, per dim: u32 count, count x (i32, i32, i32)        |
//! | directory:   tot x (u32 bucket, u16 slot, u16 pad)                              |
//! | data:        ceil(tot / 32) x u32 bitmap words, real x measures x f64           |
//! +---------------------------------------------------------------------------------+
//! ```

use crate::bitmap::{rank_in_words, Bitmap};
use crate::chunk::{DataChunk, DataEntry, DirChunk, DirEntry};
use crate::chunk_id::ChunkId;
use crate::constants::{
    ARTIFICIAL_COUNT_SIZE, ARTIFICIAL_ENTRY_SIZE, BITMAP_WORD_BITS, BITMAP_WORD_SIZE,
    CHUNK_FIXED_HEADER_SIZE, DIR_ENTRY_SIZE, KIND_DATA, KIND_DIRECTORY, KIND_ROOT,
    LEVEL_RANGE_SIZE, MEASURE_SIZE, ORDER_CODE_SIZE,
};
use crate::coords::{calc_cell_offset, LevelRange};
use crate::header::{bitmap_words, ArtificialHierarchy, ChunkHeader, ChunkKind};
use bytes::{Buf, BufMut};
use cubefile_common::{BucketId, CubeError, Result};

fn narrow<T: TryFrom<usize>>(value: usize, what: &str, id: &ChunkId) -> Result<T> {
    T::try_from(value).map_err(|_| {
        CubeError::Capacity(format!("{} {} of chunk {} does not fit the chunk header", what, value, id))
    })
}

fn kind_tag(kind: ChunkKind) -> u8 {
    match kind {
        ChunkKind::Root => KIND_ROOT,
        ChunkKind::Directory => KIND_DIRECTORY,
        ChunkKind::Data => KIND_DATA,
    }
}

fn put_prefix(buf: &mut Vec<u8>, header: &ChunkHeader) -> Result<()> {
    let id = &header.id;
    if id.depth() != header.num_domains() {
        return Err(CubeError::Internal(format!(
            "chunk {} has {} domains, header expects {}",
            id,
            id.depth(),
            header.num_domains()
        )));
    }
    if header.ranges.len() != header.num_dims || id.num_dims().is_some_and(|n| n != header.num_dims) {
        return Err(CubeError::Internal(format!(
            "chunk {} dimensionality disagrees with its header",
            id
        )));
    }

    buf.put_u8(kind_tag(header.kind));
    buf.put_u8(header.next_local_depth as u8);
    buf.put_u16_le(narrow(header.depth, "depth", id)?);
    buf.put_i16_le(header.local_depth);
    buf.put_u16_le(narrow(header.num_dims, "dimensionality", id)?);
    buf.put_u16_le(narrow(header.num_domains(), "domain count", id)?);
    buf.put_u16_le(narrow(header.num_measures, "measure count", id)?);
    buf.put_u32_le(narrow(header.tot_num_cells, "cell count", id)?);
    buf.put_u32_le(narrow(header.real_num_cells, "non-empty cell count", id)?);
    buf.put_u32_le(0);

    for domain in id.domains() {
        for code in domain {
            buf.put_i32_le(*code);
        }
    }
    for range in &header.ranges {
        buf.put_i32_le(range.left);
        buf.put_i32_le(range.right);
    }
    Ok(())
}

fn check_length(buf: &[u8], header: &ChunkHeader) -> Result<()> {
    if buf.len() != header.size {
        return Err(CubeError::Internal(format!(
            "chunk {} encoded to {} bytes, header size is {}",
            header.id,
            buf.len(),
            header.size
        )));
    }
    Ok(())
}

/// Encodes a directory chunk.
pub fn encode_dir_chunk(chunk: &DirChunk) -> Result<Vec<u8>> {
    let header = &chunk.header;
    if !header.is_directory() {
        return Err(CubeError::Internal(format!("chunk {} is not a directory", header.id)));
    }
    if chunk.entries.len() != header.tot_num_cells {
        return Err(CubeError::Internal(format!(
            "directory {} has {} entries for {} cells",
            header.id,
            chunk.entries.len(),
            header.tot_num_cells
        )));
    }
    if header.next_local_depth != header.artificial.is_some() {
        return Err(CubeError::Internal(format!(
            "directory {} continuation flag disagrees with its artificial table",
            header.id
        )));
    }

    let mut buf = Vec::with_capacity(header.size);
    put_prefix(&mut buf, header)?;
    if let Some(table) = &header.artificial {
        if table.num_dims() != header.num_dims {
            return Err(CubeError::Internal(format!(
                "artificial table of {} has {} dimensions",
                header.id,
                table.num_dims()
            )));
        }
        for dim in 0..table.num_dims() {
            let count = table.entries(dim).count();
            buf.put_u32_le(narrow(count, "artificial entry count", &header.id)?);
            for (code, range) in table.entries(dim) {
                buf.put_i32_le(code);
                buf.put_i32_le(range.left);
                buf.put_i32_le(range.right);
            }
        }
    }
    for entry in &chunk.entries {
        buf.put_u32_le(entry.bucket_id.0);
        buf.put_u16_le(entry.chunk_slot);
        buf.put_u16_le(0);
    }
    check_length(&buf, header)?;
    Ok(buf)
}

/// Encodes a data chunk.
pub fn encode_data_chunk(chunk: &DataChunk) -> Result<Vec<u8>> {
    let header = &chunk.header;
    if !header.is_data() {
        return Err(CubeError::Internal(format!("chunk {} is not a data chunk", header.id)));
    }
    if chunk.bitmap.len() != header.tot_num_cells
        || chunk.bitmap.count_ones() != header.real_num_cells
        || chunk.entries.len() != header.real_num_cells
    {
        return Err(CubeError::Internal(format!(
            "data chunk {} bitmap or entries disagree with its header",
            header.id
        )));
    }

    let mut buf = Vec::with_capacity(header.size);
    put_prefix(&mut buf, header)?;
    for word in chunk.bitmap.words() {
        buf.put_u32_le(*word);
    }
    for entry in &chunk.entries {
        if entry.measures.len() != header.num_measures {
            return Err(CubeError::Internal(format!(
                "data chunk {} entry has {} measures, expected {}",
                header.id,
                entry.measures.len(),
                header.num_measures
            )));
        }
        for value in &entry.measures {
            buf.put_f64_le(*value);
        }
    }
    check_length(&buf, header)?;
    Ok(buf)
}

/// Counts from the fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FixedHeader {
    kind: ChunkKind,
    next_local_depth: bool,
    depth: usize,
    local_depth: i16,
    num_dims: usize,
    num_domains: usize,
    num_measures: usize,
    tot_num_cells: usize,
    real_num_cells: usize,
}

impl FixedHeader {
    fn read(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < CHUNK_FIXED_HEADER_SIZE {
            return Err(CubeError::Decode(format!(
                "chunk of {} bytes is shorter than its fixed header",
                bytes.len()
            )));
        }
        let mut buf = &bytes[..CHUNK_FIXED_HEADER_SIZE];
        let kind = match buf.get_u8() {
            KIND_ROOT => ChunkKind::Root,
            KIND_DIRECTORY => ChunkKind::Directory,
            KIND_DATA => ChunkKind::Data,
            other => return Err(CubeError::Decode(format!("unknown chunk kind {}", other))),
        };
        Ok(Self {
            kind,
            next_local_depth: buf.get_u8() != 0,
            depth: buf.get_u16_le() as usize,
            local_depth: buf.get_i16_le(),
            num_dims: buf.get_u16_le() as usize,
            num_domains: buf.get_u16_le() as usize,
            num_measures: buf.get_u16_le() as usize,
            tot_num_cells: buf.get_u32_le() as usize,
            real_num_cells: buf.get_u32_le() as usize,
        })
    }

    fn ranges_at(&self) -> usize {
        CHUNK_FIXED_HEADER_SIZE + self.num_domains * self.num_dims * ORDER_CODE_SIZE
    }

    fn body_at(&self) -> usize {
        self.ranges_at() + self.num_dims * LEVEL_RANGE_SIZE
    }
}

fn need(bytes: &[u8], end: usize, section: &str) -> Result<()> {
    if bytes.len() < end {
        return Err(CubeError::Decode(format!(
            "chunk truncated in {}: need {} bytes, have {}",
            section,
            end,
            bytes.len()
        )));
    }
    Ok(())
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    (&bytes[at..at + 4]).get_u32_le()
}

fn read_id(bytes: &[u8], fixed: &FixedHeader) -> Result<ChunkId> {
    let mut buf = &bytes[CHUNK_FIXED_HEADER_SIZE..fixed.ranges_at()];
    let domains = (0..fixed.num_domains)
        .map(|_| (0..fixed.num_dims).map(|_| buf.get_i32_le()).collect())
        .collect();
    ChunkId::from_domains(domains)
}

fn read_ranges(bytes: &[u8], fixed: &FixedHeader) -> Vec<LevelRange> {
    let mut buf = &bytes[fixed.ranges_at()..fixed.body_at()];
    (0..fixed.num_dims)
        .map(|_| LevelRange::new(buf.get_i32_le(), buf.get_i32_le()))
        .collect()
}

fn build_header(
    bytes: &[u8],
    fixed: &FixedHeader,
    artificial: Option<ArtificialHierarchy>,
) -> Result<ChunkHeader> {
    Ok(ChunkHeader {
        id: read_id(bytes, fixed)?,
        kind: fixed.kind,
        depth: fixed.depth,
        local_depth: fixed.local_depth,
        next_local_depth: fixed.next_local_depth,
        num_dims: fixed.num_dims,
        ranges: read_ranges(bytes, fixed),
        tot_num_cells: fixed.tot_num_cells,
        real_num_cells: fixed.real_num_cells,
        num_measures: fixed.num_measures,
        artificial,
        size: bytes.len(),
    })
}

/// Decoded chunk of either kind.
#[derive(Debug, Clone, Copy)]
pub enum ChunkView<'a> {
    Directory(DirChunkView<'a>),
    Data(DataChunkView<'a>),
}

impl<'a> ChunkView<'a> {
    /// Kind of the chunk.
    pub fn kind(&self) -> ChunkKind {
        match self {
            ChunkView::Directory(view) => view.fixed.kind,
            ChunkView::Data(_) => ChunkKind::Data,
        }
    }
}

/// Decodes the chunk in `bytes`, validating section lengths.
pub fn decode_chunk(bytes: &[u8]) -> Result<ChunkView<'_>> {
    let fixed = FixedHeader::read(bytes)?;
    if fixed.kind.is_directory() {
        DirChunkView::new(bytes, fixed).map(ChunkView::Directory)
    } else {
        DataChunkView::new(bytes, fixed).map(ChunkView::Data)
    }
}

/// Borrowed view of an encoded directory chunk.
#[derive(Debug, Clone, Copy)]
pub struct DirChunkView<'a> {
    bytes: &'a [u8],
    fixed: FixedHeader,
    entries_at: usize,
}

impl<'a> DirChunkView<'a> {
    /// Decodes a directory chunk.
    pub fn decode(bytes: &'a [u8]) -> Result<Self> {
        match decode_chunk(bytes)? {
            ChunkView::Directory(view) => Ok(view),
            ChunkView::Data(_) => Err(CubeError::Decode("expected a directory chunk".to_string())),
        }
    }

    fn new(bytes: &'a [u8], fixed: FixedHeader) -> Result<Self> {
        let mut at = fixed.body_at();
        need(bytes, at, "id and ranges")?;
        if fixed.next_local_depth {
            for _ in 0..fixed.num_dims {
                need(bytes, at + ARTIFICIAL_COUNT_SIZE, "artificial table")?;
                let count = read_u32(bytes, at) as usize;
                at += ARTIFICIAL_COUNT_SIZE + count * ARTIFICIAL_ENTRY_SIZE;
            }
        }
        let end = at + fixed.tot_num_cells * DIR_ENTRY_SIZE;
        need(bytes, end, "directory entries")?;
        if bytes.len() != end {
            return Err(CubeError::Decode(format!(
                "directory chunk has {} trailing bytes",
                bytes.len() - end
            )));
        }
        Ok(Self {
            bytes,
            fixed,
            entries_at: at,
        })
    }

    /// Chunk kind, root or directory.
    pub fn kind(&self) -> ChunkKind {
        self.fixed.kind
    }

    /// Chunk id.
    pub fn id(&self) -> Result<ChunkId> {
        read_id(self.bytes, &self.fixed)
    }

    /// Cell ranges.
    pub fn ranges(&self) -> Vec<LevelRange> {
        read_ranges(self.bytes, &self.fixed)
    }

    /// Returns true for a directory created by large-chunk resolution.
    pub fn is_artificial(&self) -> bool {
        self.fixed.next_local_depth
    }

    /// Number of entries.
    pub fn num_entries(&self) -> usize {
        self.fixed.tot_num_cells
    }

    /// Entry at row-major `index`.
    pub fn entry(&self, index: usize) -> Option<DirEntry> {
        if index >= self.num_entries() {
            return None;
        }
        let mut buf = &self.bytes[self.entries_at + index * DIR_ENTRY_SIZE..];
        let bucket_id = BucketId(buf.get_u32_le());
        let chunk_slot = buf.get_u16_le();
        Some(DirEntry::new(bucket_id, chunk_slot))
    }

    /// Entry of the cell at `coords`.
    pub fn entry_at(&self, coords: &[i32]) -> Option<DirEntry> {
        calc_cell_offset(coords, &self.ranges()).and_then(|offset| self.entry(offset))
    }

    /// All entries in row-major order.
    pub fn entries(&self) -> impl Iterator<Item = DirEntry> + '_ {
        (0..self.num_entries()).filter_map(move |i| self.entry(i))
    }

    fn artificial(&self) -> Option<ArtificialHierarchy> {
        if !self.fixed.next_local_depth {
            return None;
        }
        let mut table = ArtificialHierarchy::new(self.fixed.num_dims);
        let mut buf = &self.bytes[self.fixed.body_at()..self.entries_at];
        for dim in 0..self.fixed.num_dims {
            let count = buf.get_u32_le();
            for _ in 0..count {
                let code = buf.get_i32_le();
                let left = buf.get_i32_le();
                let right = buf.get_i32_le();
                table.insert(dim, code, LevelRange::new(left, right));
            }
        }
        Some(table)
    }

    /// Owned header.
    pub fn header(&self) -> Result<ChunkHeader> {
        build_header(self.bytes, &self.fixed, self.artificial())
    }

    /// Copies the chunk out of the buffer.
    pub fn to_dir_chunk(&self) -> Result<DirChunk> {
        Ok(DirChunk {
            header: self.header()?,
            entries: self.entries().collect(),
        })
    }
}

/// Borrowed view of an encoded data chunk.
#[derive(Debug, Clone, Copy)]
pub struct DataChunkView<'a> {
    bytes: &'a [u8],
    fixed: FixedHeader,
    values_at: usize,
}

impl<'a> DataChunkView<'a> {
    /// Decodes a data chunk.
    pub fn decode(bytes: &'a [u8]) -> Result<Self> {
        match decode_chunk(bytes)? {
            ChunkView::Data(view) => Ok(view),
            ChunkView::Directory(_) => Err(CubeError::Decode("expected a data chunk".to_string())),
        }
    }

    fn new(bytes: &'a [u8], fixed: FixedHeader) -> Result<Self> {
        let values_at = fixed.body_at() + bitmap_words(fixed.tot_num_cells) * BITMAP_WORD_SIZE;
        let end = values_at + fixed.real_num_cells * fixed.num_measures * MEASURE_SIZE;
        need(bytes, end, "data chunk body")?;
        if bytes.len() != end {
            return Err(CubeError::Decode(format!(
                "data chunk has {} trailing bytes",
                bytes.len() - end
            )));
        }
        let view = Self {
            bytes,
            fixed,
            values_at,
        };
        if view.bitmap()?.count_ones() != fixed.real_num_cells {
            return Err(CubeError::Decode(
                "bitmap population disagrees with the cell count".to_string(),
            ));
        }
        Ok(view)
    }

    fn word(&self, index: usize) -> u32 {
        read_u32(self.bytes, self.fixed.body_at() + index * BITMAP_WORD_SIZE)
    }

    fn words(&self) -> Vec<u32> {
        (0..bitmap_words(self.fixed.tot_num_cells))
            .map(|i| self.word(i))
            .collect()
    }

    /// Chunk id.
    pub fn id(&self) -> Result<ChunkId> {
        read_id(self.bytes, &self.fixed)
    }

    /// Cell ranges.
    pub fn ranges(&self) -> Vec<LevelRange> {
        read_ranges(self.bytes, &self.fixed)
    }

    /// Number of cells in the chunk.
    pub fn num_cells(&self) -> usize {
        self.fixed.tot_num_cells
    }

    /// Number of stored entries.
    pub fn num_entries(&self) -> usize {
        self.fixed.real_num_cells
    }

    /// Measures per entry.
    pub fn num_measures(&self) -> usize {
        self.fixed.num_measures
    }

    /// Returns true if cell `offset` holds data.
    pub fn is_set(&self, offset: usize) -> bool {
        offset < self.fixed.tot_num_cells
            && self.word(offset / BITMAP_WORD_BITS) & (1 << (offset % BITMAP_WORD_BITS)) != 0
    }

    /// Number of set cells before `offset`.
    pub fn rank(&self, offset: usize) -> usize {
        rank_in_words(&self.words(), offset.min(self.fixed.tot_num_cells))
    }

    /// Measure `measure` of entry `entry`.
    pub fn measure(&self, entry: usize, measure: usize) -> Option<f64> {
        if entry >= self.num_entries() || measure >= self.num_measures() {
            return None;
        }
        let at = self.values_at + (entry * self.num_measures() + measure) * MEASURE_SIZE;
        Some((&self.bytes[at..at + MEASURE_SIZE]).get_f64_le())
    }

    /// Measures of entry `entry`.
    pub fn entry(&self, entry: usize) -> Option<Vec<f64>> {
        (0..self.num_measures())
            .map(|m| self.measure(entry, m))
            .collect()
    }

    /// Measures of cell `offset`, `None` if the cell is empty.
    pub fn cell(&self, offset: usize) -> Option<Vec<f64>> {
        if !self.is_set(offset) {
            return None;
        }
        self.entry(self.rank(offset))
    }

    /// Measures of the cell at `coords`.
    pub fn cell_at(&self, coords: &[i32]) -> Option<Vec<f64>> {
        calc_cell_offset(coords, &self.ranges()).and_then(|offset| self.cell(offset))
    }

    /// Compression bitmap.
    pub fn bitmap(&self) -> Result<Bitmap> {
        Bitmap::from_words(self.words(), self.fixed.tot_num_cells)
    }

    /// Owned header.
    pub fn header(&self) -> Result<ChunkHeader> {
        build_header(self.bytes, &self.fixed, None)
    }

    /// Copies the chunk out of the buffer.
    pub fn to_data_chunk(&self) -> Result<DataChunk> {
        let entries = (0..self.num_entries())
            .map(|i| {
                self.entry(i)
                    .map(|measures| DataEntry { measures })
                    .ok_or_else(|| CubeError::Decode(format!("missing entry {}", i)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(DataChunk {
            header: self.header()?,
            bitmap: self.bitmap()?,
            entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{ChunkKind, MIN_DEPTH};
    use crate::schema::{CubeInfo, Dimension};
    use rand::Rng;

    fn create_test_cube() -> CubeInfo {
        CubeInfo::new(
            "codec",
            vec![Dimension::balanced("a", &[2, 3]), Dimension::balanced("b", &[1, 4])],
            vec!["m1".to_string(), "m2".to_string()],
        )
    }

    fn create_test_dir() -> DirChunk {
        let cube = create_test_cube();
        let mut header = ChunkHeader::for_chunk(ChunkId::root(), &cube).unwrap();
        header.set_real_cells(2);
        let mut dir = DirChunk::new(header);
        dir.set_entry(&[0, 0], DirEntry::new(BucketId(4), 0)).unwrap();
        dir.set_entry(&[1, 0], DirEntry::new(BucketId(1), 7)).unwrap();
        dir
    }

    fn create_test_data() -> DataChunk {
        let cube = create_test_cube();
        let mut header = ChunkHeader::for_chunk("1|0".parse().unwrap(), &cube).unwrap();
        header.set_real_cells(3);
        DataChunk::from_cells(
            header,
            vec![(11, vec![1.0, -1.0]), (0, vec![2.5, 0.0]), (5, vec![3.0, 9.75])],
        )
        .unwrap()
    }

    #[test]
    fn test_dir_chunk_round_trip() {
        let dir = create_test_dir();
        let bytes = encode_dir_chunk(&dir).unwrap();
        assert_eq!(bytes.len(), dir.header.size);

        let view = DirChunkView::decode(&bytes).unwrap();
        assert_eq!(view.kind(), ChunkKind::Root);
        assert_eq!(view.entry_at(&[1, 0]), Some(DirEntry::new(BucketId(1), 7)));
        assert_eq!(view.to_dir_chunk().unwrap(), dir);
    }

    #[test]
    fn test_artificial_dir_round_trip() {
        let cube = create_test_cube();
        let mut header = ChunkHeader::for_chunk("1|0".parse().unwrap(), &cube).unwrap();
        let mut table = ArtificialHierarchy::new(2);
        table.insert(0, 0, LevelRange::new(3, 4));
        table.insert(0, 1, LevelRange::new(5, 5));
        table.insert(1, 0, LevelRange::new(0, 1));
        table.insert(1, 1, LevelRange::new(2, 3));
        header.kind = ChunkKind::Directory;
        header.num_measures = 0;
        header.local_depth = MIN_DEPTH;
        header.next_local_depth = true;
        header.ranges = vec![LevelRange::new(0, 1), LevelRange::new(0, 1)];
        header.tot_num_cells = 4;
        header.artificial = Some(table);
        header.set_real_cells(1);

        let mut dir = DirChunk::new(header);
        dir.set_entry(&[1, 1], DirEntry::new(BucketId(9), 2)).unwrap();
        let bytes = encode_dir_chunk(&dir).unwrap();
        assert_eq!(bytes.len(), dir.header.size);

        let view = DirChunkView::decode(&bytes).unwrap();
        assert!(view.is_artificial());
        assert_eq!(view.to_dir_chunk().unwrap(), dir);
    }

    #[test]
    fn test_data_chunk_round_trip() {
        let data = create_test_data();
        let bytes = encode_data_chunk(&data).unwrap();
        assert_eq!(bytes.len(), data.header.size);

        let view = DataChunkView::decode(&bytes).unwrap();
        assert_eq!(view.num_cells(), 12);
        assert_eq!(view.num_entries(), 3);
        assert_eq!(view.cell(5), Some(vec![3.0, 9.75]));
        assert_eq!(view.cell(6), None);
        assert_eq!(view.rank(11), 2);
        assert_eq!(view.measure(2, 1), Some(-1.0));
        assert_eq!(view.cell_at(&[3, 0]), Some(vec![2.5, 0.0]));
        assert_eq!(view.to_data_chunk().unwrap(), data);
    }

    #[test]
    fn test_random_data_chunks_round_trip() {
        let cube = create_test_cube();
        let mut rng = rand::thread_rng();

        for density in [0.05, 0.3, 0.7, 1.0] {
            for _ in 0..25 {
                let mut header = ChunkHeader::for_chunk("1|0".parse().unwrap(), &cube).unwrap();
                let mut expected: Vec<Option<Vec<f64>>> = (0..header.tot_num_cells)
                    .map(|_| {
                        rng.gen_bool(density)
                            .then(|| vec![rng.gen_range(-1e6..1e6), rng.gen_range(0.0..1.0)])
                    })
                    .collect();
                if expected.iter().all(Option::is_none) {
                    let len = expected.len();
                    expected[rng.gen_range(0..len)] = Some(vec![1.0, 2.0]);
                }
                let cells: Vec<(usize, Vec<f64>)> = expected
                    .iter()
                    .enumerate()
                    .filter_map(|(offset, cell)| cell.clone().map(|m| (offset, m)))
                    .collect();
                header.set_real_cells(cells.len());
                let data = DataChunk::from_cells(header, cells).unwrap();

                let bytes = encode_data_chunk(&data).unwrap();
                assert_eq!(bytes.len(), data.header.size);
                let view = match decode_chunk(&bytes).unwrap() {
                    ChunkView::Data(view) => view,
                    ChunkView::Directory(_) => panic!("decoded a directory"),
                };
                assert_eq!(view.num_entries(), data.entries.len());

                let mut rank = 0;
                for (offset, cell) in expected.iter().enumerate() {
                    assert_eq!(view.is_set(offset), cell.is_some());
                    assert_eq!(view.rank(offset), rank);
                    assert_eq!(view.cell(offset).as_ref(), cell.as_ref());
                    if cell.is_some() {
                        rank += 1;
                    }
                }
                assert_eq!(view.to_data_chunk().unwrap(), data);
            }
        }
    }

    #[test]
    fn test_random_artificial_dirs_round_trip() {
        let cube = create_test_cube();
        let mut rng = rand::thread_rng();

        for _ in 0..50 {
            let grid = [rng.gen_range(1..=3), rng.gen_range(1..=4)];
            let mut header = ChunkHeader::for_chunk("1|0".parse().unwrap(), &cube).unwrap();
            let mut table = ArtificialHierarchy::new(2);
            for (dim, &members) in grid.iter().enumerate() {
                for code in 0..members {
                    let left = rng.gen_range(0..100);
                    table.insert(dim, code, LevelRange::new(left, left + rng.gen_range(0..5)));
                }
            }
            header.kind = ChunkKind::Directory;
            header.num_measures = 0;
            header.local_depth = MIN_DEPTH;
            header.next_local_depth = true;
            header.ranges = vec![LevelRange::new(0, grid[0] - 1), LevelRange::new(0, grid[1] - 1)];
            header.tot_num_cells = (grid[0] * grid[1]) as usize;
            header.artificial = Some(table.clone());

            let mut populated = Vec::new();
            for x in 0..grid[0] {
                for y in 0..grid[1] {
                    if populated.is_empty() || rng.gen_bool(0.5) {
                        let entry = DirEntry::new(BucketId(rng.gen_range(1..1000)), rng.gen_range(0..16));
                        populated.push(([x, y], entry));
                    }
                }
            }
            header.set_real_cells(populated.len());
            let mut dir = DirChunk::new(header);
            for (coords, entry) in &populated {
                dir.set_entry(coords, *entry).unwrap();
            }

            let bytes = encode_dir_chunk(&dir).unwrap();
            assert_eq!(bytes.len(), dir.header.size);
            let view = match decode_chunk(&bytes).unwrap() {
                ChunkView::Directory(view) => view,
                ChunkView::Data(_) => panic!("decoded a data chunk"),
            };
            assert!(view.is_artificial());
            assert_eq!(view.num_entries(), dir.entries.len());
            assert_eq!(view.entries().collect::<Vec<_>>(), dir.entries);
            assert_eq!(view.header().unwrap().artificial, Some(table));
            for (coords, entry) in &populated {
                assert_eq!(view.entry_at(coords), Some(*entry));
            }
            assert_eq!(view.entries().filter(|e| !e.is_empty()).count(), populated.len());
        }
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        let bytes = encode_data_chunk(&create_test_data()).unwrap();
        assert!(matches!(decode_chunk(&bytes[..10]), Err(CubeError::Decode(_))));
        assert!(matches!(
            decode_chunk(&bytes[..bytes.len() - 1]),
            Err(CubeError::Decode(_))
        ));

        let mut bad_kind = bytes.clone();
        bad_kind[0] = 9;
        assert!(matches!(decode_chunk(&bad_kind), Err(CubeError::Decode(_))));

        assert!(DirChunkView::decode(&bytes).is_err());
    }

    #[test]
    fn test_encode_checks_header() {
        let mut dir = create_test_dir();
        dir.entries.pop();
        assert!(matches!(encode_dir_chunk(&dir), Err(CubeError::Internal(_))));

        let mut data = create_test_data();
        data.header.real_num_cells = 2;
        assert!(matches!(encode_data_chunk(&data), Err(CubeError::Internal(_))));
    }
}
