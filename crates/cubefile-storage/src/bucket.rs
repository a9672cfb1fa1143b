//! Disk bucket implementation using a slotted body.
//!
//! A bucket is written as one storage record: the header travels as the
//! record header and the body as the record body.
//!
//! Body layout:
//! ```text
//! +------------------+
//! | Chunk 0          |  <- Chunks grow forward
//! | Chunk 1          |
//! | ...              |
//! +------------------+
//! |                  |
//! | Free Space       |
//! |                  |
//! +------------------+
//! | Slot n-1 ... 0   |  <- Slot directory grows backward
//! | (8 bytes/slot)   |
//! +------------------+
//! ```

use crate::constants::{
    BUCKET_FIXED_HEADER_SIZE, BUCKET_HEADER_SIZE, CHUNK_SLOT_SIZE, SUBTREE_ENTRY_SIZE,
};
use cubefile_common::{BucketId, CubeError, Result, MAX_SUBTREES_PER_BUCKET};

/// A slot in the body's slot directory pointing to one encoded chunk.
///
/// Layout (8 bytes):
/// - offset: 4 bytes (offset from body start to chunk data)
/// - length: 4 bytes (length of the chunk encoding)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkSlot {
    /// Offset from body start to chunk data.
    pub offset: u32,
    /// Length of the chunk data.
    pub length: u32,
}

impl ChunkSlot {
    /// Size of a slot entry in bytes.
    pub const SIZE: usize = CHUNK_SLOT_SIZE;

    /// Creates a new slot.
    pub fn new(offset: u32, length: u32) -> Self {
        Self { offset, length }
    }

    /// Serializes the slot to bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.offset.to_le_bytes());
        buf[4..8].copy_from_slice(&self.length.to_le_bytes());
        buf
    }

    /// Deserializes a slot from bytes.
    pub fn from_bytes(buf: &[u8]) -> Self {
        Self {
            offset: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            length: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }
}

/// Bucket header.
///
/// Layout (88 bytes):
/// - bucket_id: 4 bytes
/// - prev: 4 bytes (previous bucket of an overflow chain)
/// - next: 4 bytes (next bucket of an overflow chain)
/// - chunk_count: 2 bytes
/// - subtree_count: 2 bytes
/// - free_space: 4 bytes
/// - checksum: 4 bytes (CRC32 of the body)
/// - subtree directory: 2 bytes per subtree (first chunk slot)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketHeader {
    /// Id of this bucket.
    pub bucket_id: BucketId,
    /// Previous bucket in an overflow chain.
    pub prev: BucketId,
    /// Next bucket in an overflow chain.
    pub next: BucketId,
    /// Number of chunks stored in the body.
    pub chunk_count: u16,
    /// Number of independent subtrees stored in the body.
    pub subtree_count: u16,
    /// Unused body bytes.
    pub free_space: u32,
    /// CRC32 of the body.
    pub checksum: u32,
    /// First chunk slot of every subtree.
    pub subtree_dir: [u16; MAX_SUBTREES_PER_BUCKET],
}

impl BucketHeader {
    /// Size of the bucket header in bytes.
    pub const SIZE: usize = BUCKET_HEADER_SIZE;

    /// Creates a header for an empty bucket with the given body size.
    pub fn new(bucket_id: BucketId, body_size: usize) -> Self {
        Self {
            bucket_id,
            prev: BucketId::NULL,
            next: BucketId::NULL,
            chunk_count: 0,
            subtree_count: 0,
            free_space: body_size as u32,
            checksum: 0,
            subtree_dir: [0; MAX_SUBTREES_PER_BUCKET],
        }
    }

    /// Serializes the header to bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.bucket_id.0.to_le_bytes());
        buf[4..8].copy_from_slice(&self.prev.0.to_le_bytes());
        buf[8..12].copy_from_slice(&self.next.0.to_le_bytes());
        buf[12..14].copy_from_slice(&self.chunk_count.to_le_bytes());
        buf[14..16].copy_from_slice(&self.subtree_count.to_le_bytes());
        buf[16..20].copy_from_slice(&self.free_space.to_le_bytes());
        buf[20..24].copy_from_slice(&self.checksum.to_le_bytes());
        for (i, first) in self.subtree_dir.iter().enumerate() {
            let at = BUCKET_FIXED_HEADER_SIZE + i * SUBTREE_ENTRY_SIZE;
            buf[at..at + SUBTREE_ENTRY_SIZE].copy_from_slice(&first.to_le_bytes());
        }
        buf
    }

    /// Deserializes the header from bytes.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(CubeError::RecordCorrupted {
                record_id: 0,
                reason: format!("bucket header too short: {} bytes", buf.len()),
            });
        }
        let u32_at = |at: usize| u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
        let u16_at = |at: usize| u16::from_le_bytes([buf[at], buf[at + 1]]);

        let mut subtree_dir = [0u16; MAX_SUBTREES_PER_BUCKET];
        for (i, first) in subtree_dir.iter_mut().enumerate() {
            *first = u16_at(BUCKET_FIXED_HEADER_SIZE + i * SUBTREE_ENTRY_SIZE);
        }

        Ok(Self {
            bucket_id: BucketId(u32_at(0)),
            prev: BucketId(u32_at(4)),
            next: BucketId(u32_at(8)),
            chunk_count: u16_at(12),
            subtree_count: u16_at(14),
            free_space: u32_at(16),
            checksum: u32_at(20),
            subtree_dir,
        })
    }
}

/// One physical bucket: header plus a slotted body of encoded chunks.
#[derive(Debug, Clone)]
pub struct DiskBucket {
    header: BucketHeader,
    body: Vec<u8>,
    /// End of the chunk data area.
    data_end: usize,
}

impl DiskBucket {
    /// Creates a new empty bucket.
    pub fn new(bucket_id: BucketId, body_size: usize) -> Self {
        Self {
            header: BucketHeader::new(bucket_id, body_size),
            body: vec![0u8; body_size],
            data_end: 0,
        }
    }

    /// Rebuilds a bucket from a stored record, verifying the body checksum.
    pub fn from_record(header: &[u8], body: Vec<u8>) -> Result<Self> {
        let header = BucketHeader::from_bytes(header)?;
        let computed = crc32fast::hash(&body);
        if computed != header.checksum {
            return Err(CubeError::RecordCorrupted {
                record_id: header.bucket_id.0,
                reason: format!(
                    "checksum mismatch: stored={}, computed={}",
                    header.checksum, computed
                ),
            });
        }

        let mut bucket = Self {
            header,
            body,
            data_end: 0,
        };
        let slot_area = bucket.header.chunk_count as usize * ChunkSlot::SIZE;
        if slot_area > bucket.body.len() {
            return Err(CubeError::RecordCorrupted {
                record_id: bucket.header.bucket_id.0,
                reason: "slot directory exceeds body".to_string(),
            });
        }
        for slot in 0..bucket.header.chunk_count {
            let s = bucket.read_slot(slot);
            let end = s.offset as usize + s.length as usize;
            if end > bucket.body.len() - slot_area {
                return Err(CubeError::RecordCorrupted {
                    record_id: bucket.header.bucket_id.0,
                    reason: format!("slot {} points outside the data area", slot),
                });
            }
            bucket.data_end = bucket.data_end.max(end);
        }
        Ok(bucket)
    }

    /// Returns the bucket id.
    pub fn id(&self) -> BucketId {
        self.header.bucket_id
    }

    /// Returns the header.
    pub fn header(&self) -> &BucketHeader {
        &self.header
    }

    /// Returns the body size in bytes.
    pub fn body_size(&self) -> usize {
        self.body.len()
    }

    /// Returns the number of chunks stored.
    pub fn chunk_count(&self) -> u16 {
        self.header.chunk_count
    }

    /// Returns the amount of free body space.
    pub fn free_space(&self) -> usize {
        self.body.len() - self.data_end - self.header.chunk_count as usize * ChunkSlot::SIZE
    }

    /// Returns true if a chunk of `len` bytes plus its slot fits.
    pub fn can_fit(&self, len: usize) -> bool {
        self.free_space() >= len + ChunkSlot::SIZE
    }

    /// Body offset of the slot entry for `slot`.
    fn slot_offset(&self, slot: u16) -> usize {
        self.body.len() - (slot as usize + 1) * ChunkSlot::SIZE
    }

    fn read_slot(&self, slot: u16) -> ChunkSlot {
        let at = self.slot_offset(slot);
        ChunkSlot::from_bytes(&self.body[at..at + ChunkSlot::SIZE])
    }

    /// Reads the slot entry for a chunk.
    pub fn get_slot(&self, slot: u16) -> Option<ChunkSlot> {
        if slot >= self.header.chunk_count {
            return None;
        }
        Some(self.read_slot(slot))
    }

    /// Marks the start of a new independent subtree at the next chunk slot.
    pub fn begin_subtree(&mut self) -> Result<()> {
        let index = self.header.subtree_count as usize;
        if index >= MAX_SUBTREES_PER_BUCKET {
            return Err(CubeError::Internal(format!(
                "{} already holds {} subtrees",
                self.header.bucket_id, MAX_SUBTREES_PER_BUCKET
            )));
        }
        self.header.subtree_dir[index] = self.header.chunk_count;
        self.header.subtree_count += 1;
        Ok(())
    }

    /// Appends an encoded chunk and returns its slot.
    pub fn add_chunk(&mut self, chunk: &[u8]) -> Result<u16> {
        if !self.can_fit(chunk.len()) {
            return Err(CubeError::BucketFull {
                needed: chunk.len() + ChunkSlot::SIZE,
                available: self.free_space(),
            });
        }
        if self.header.chunk_count == u16::MAX - 1 {
            return Err(CubeError::BucketFull {
                needed: chunk.len() + ChunkSlot::SIZE,
                available: 0,
            });
        }

        let offset = self.data_end;
        self.body[offset..offset + chunk.len()].copy_from_slice(chunk);
        self.data_end += chunk.len();

        let slot = self.header.chunk_count;
        let at = self.slot_offset(slot);
        let entry = ChunkSlot::new(offset as u32, chunk.len() as u32);
        self.body[at..at + ChunkSlot::SIZE].copy_from_slice(&entry.to_bytes());
        self.header.chunk_count += 1;
        self.header.free_space = self.free_space() as u32;

        Ok(slot)
    }

    /// Returns the encoded bytes of the chunk in `slot`.
    pub fn chunk(&self, slot: u16) -> Option<&[u8]> {
        let s = self.get_slot(slot)?;
        let start = s.offset as usize;
        Some(&self.body[start..start + s.length as usize])
    }

    /// Returns the first chunk slot of every stored subtree.
    pub fn subtree_first_slots(&self) -> &[u16] {
        &self.header.subtree_dir[..self.header.subtree_count as usize]
    }

    /// Iterates over all chunks in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &[u8])> + '_ {
        (0..self.header.chunk_count).filter_map(move |slot| self.chunk(slot).map(|c| (slot, c)))
    }

    /// Produces the record header and body, with the checksum filled in.
    pub fn to_record(&self) -> ([u8; BucketHeader::SIZE], &[u8]) {
        let mut header = self.header.clone();
        header.free_space = self.free_space() as u32;
        header.checksum = crc32fast::hash(&self.body);
        (header.to_bytes(), &self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_bucket() -> DiskBucket {
        DiskBucket::new(BucketId(7), 1024)
    }

    #[test]
    fn test_chunk_slot_roundtrip() {
        let slot = ChunkSlot::new(1234, 56);
        assert_eq!(ChunkSlot::from_bytes(&slot.to_bytes()), slot);
    }

    #[test]
    fn test_bucket_header_size() {
        assert_eq!(BucketHeader::SIZE, 24 + 2 * MAX_SUBTREES_PER_BUCKET);
    }

    #[test]
    fn test_bucket_header_roundtrip() {
        let mut header = BucketHeader::new(BucketId(3), 4000);
        header.next = BucketId(9);
        header.chunk_count = 5;
        header.subtree_count = 2;
        header.subtree_dir[0] = 0;
        header.subtree_dir[1] = 3;
        header.checksum = 0xDEADBEEF;

        let decoded = BucketHeader::from_bytes(&header.to_bytes()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_bucket_new() {
        let bucket = create_test_bucket();
        assert_eq!(bucket.id(), BucketId(7));
        assert_eq!(bucket.chunk_count(), 0);
        assert_eq!(bucket.free_space(), 1024);
        assert!(bucket.subtree_first_slots().is_empty());
    }

    #[test]
    fn test_bucket_add_and_get_chunks() {
        let mut bucket = create_test_bucket();
        let s0 = bucket.add_chunk(b"first chunk").unwrap();
        let s1 = bucket.add_chunk(b"second").unwrap();

        assert_eq!(s0, 0);
        assert_eq!(s1, 1);
        assert_eq!(bucket.chunk(0).unwrap(), b"first chunk");
        assert_eq!(bucket.chunk(1).unwrap(), b"second");
        assert!(bucket.chunk(2).is_none());
        assert_eq!(bucket.free_space(), 1024 - 11 - 6 - 2 * ChunkSlot::SIZE);
    }

    #[test]
    fn test_bucket_full() {
        let mut bucket = create_test_bucket();
        let chunk = vec![1u8; 1024 - ChunkSlot::SIZE];
        assert!(bucket.can_fit(chunk.len()));
        bucket.add_chunk(&chunk).unwrap();
        assert_eq!(bucket.free_space(), 0);

        let result = bucket.add_chunk(b"x");
        assert!(matches!(result, Err(CubeError::BucketFull { .. })));
    }

    #[test]
    fn test_bucket_subtree_directory() {
        let mut bucket = create_test_bucket();
        bucket.begin_subtree().unwrap();
        bucket.add_chunk(b"a").unwrap();
        bucket.add_chunk(b"b").unwrap();
        bucket.begin_subtree().unwrap();
        bucket.add_chunk(b"c").unwrap();

        assert_eq!(bucket.subtree_first_slots(), &[0, 2]);
    }

    #[test]
    fn test_bucket_subtree_limit() {
        let mut bucket = create_test_bucket();
        for _ in 0..MAX_SUBTREES_PER_BUCKET {
            bucket.begin_subtree().unwrap();
        }
        assert!(matches!(
            bucket.begin_subtree(),
            Err(CubeError::Internal(_))
        ));
    }

    #[test]
    fn test_bucket_record_roundtrip() {
        let mut bucket = create_test_bucket();
        bucket.begin_subtree().unwrap();
        bucket.add_chunk(b"persistent chunk").unwrap();
        bucket.add_chunk(&[9u8; 100]).unwrap();

        let (header, body) = bucket.to_record();
        let recovered = DiskBucket::from_record(&header, body.to_vec()).unwrap();

        assert_eq!(recovered.id(), BucketId(7));
        assert_eq!(recovered.chunk_count(), 2);
        assert_eq!(recovered.chunk(0).unwrap(), b"persistent chunk");
        assert_eq!(recovered.chunk(1).unwrap(), &[9u8; 100][..]);
        assert_eq!(recovered.free_space(), bucket.free_space());
        assert_eq!(recovered.subtree_first_slots(), &[0]);
    }

    #[test]
    fn test_bucket_record_checksum_mismatch() {
        let mut bucket = create_test_bucket();
        bucket.add_chunk(b"data").unwrap();
        let (header, body) = bucket.to_record();
        let mut body = body.to_vec();
        body[0] ^= 0xFF;

        let result = DiskBucket::from_record(&header, body);
        assert!(matches!(result, Err(CubeError::RecordCorrupted { .. })));
    }

    #[test]
    fn test_bucket_iter() {
        let mut bucket = create_test_bucket();
        bucket.add_chunk(b"x").unwrap();
        bucket.add_chunk(b"yy").unwrap();
        let chunks: Vec<_> = bucket.iter().map(|(s, c)| (s, c.len())).collect();
        assert_eq!(chunks, vec![(0, 1), (1, 2)]);
    }
}
