//! Root directory persistence.
//!
//! The root directory is every directory chunk that was too large to be
//! stored in a bucket. It is written as one record under the root bucket id:
//!
//! ```text
//! header: magic "CUBR" | version u16 | reserved u16 | chunk count u32 | body crc32 u32
//! body:   count u32 | count x (offset u32, length u32) | encoded chunks
//! ```
//!
//! Chunk offsets are relative to the start of the encoded chunks.

use crate::chunk::DirChunk;
use crate::codec::{encode_dir_chunk, DirChunkView};
use bytes::{Buf, BufMut};
use cubefile_common::{
    reserve_with_backoff, BucketId, CubeError, FileId, Result, RootDirectoryStrategyKind,
    MIN_RESERVATION,
};
use cubefile_storage::StorageManager;
use tracing::{debug, warn};

/// Magic bytes of a root directory record.
pub const ROOT_DIRECTORY_MAGIC: [u8; 4] = *b"CUBR";

/// Format version of the root directory record.
pub const ROOT_DIRECTORY_VERSION: u16 = 1;

/// Size of the root directory record header.
pub const ROOT_HEADER_SIZE: usize = 16;

const INDEX_COUNT_SIZE: usize = 4;
const INDEX_ENTRY_SIZE: usize = 8;

/// Destination of the root directory record.
pub struct RootDirectoryWriter<'a> {
    pub storage: &'a mut dyn StorageManager,
    pub file_id: FileId,
    pub bucket_id: BucketId,
}

/// Strategy persisting the root directory chunks.
pub trait RootDirectoryStrategy {
    /// Strategy name for logging.
    fn name(&self) -> &'static str;

    /// Persists `chunks`, given in slot order. Returns the bytes written.
    fn store(
        &self,
        chunks: &[DirChunk],
        memory_budget: usize,
        writer: &mut RootDirectoryWriter<'_>,
    ) -> Result<usize>;
}

/// Returns the strategy for `kind`.
pub fn root_directory_strategy(kind: RootDirectoryStrategyKind) -> Box<dyn RootDirectoryStrategy> {
    match kind {
        RootDirectoryStrategyKind::SingleBucketDepthFirst => Box::new(SingleBucketDepthFirst),
        RootDirectoryStrategyKind::BreadthFirst => Box::new(BreadthFirstRootDirectory),
    }
}

/// Smallest possible body for `chunks`: the index plus every chunk without
/// its artificial hierarchy table.
pub fn root_directory_lower_bound(chunks: &[DirChunk]) -> usize {
    INDEX_COUNT_SIZE
        + chunks.len() * INDEX_ENTRY_SIZE
        + chunks
            .iter()
            .map(|c| c.header.size_without_artificial())
            .sum::<usize>()
}

/// All chunks in one record, in depth-first slot order.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleBucketDepthFirst;

impl RootDirectoryStrategy for SingleBucketDepthFirst {
    fn name(&self) -> &'static str {
        "single_bucket_depth_first"
    }

    fn store(
        &self,
        chunks: &[DirChunk],
        memory_budget: usize,
        writer: &mut RootDirectoryWriter<'_>,
    ) -> Result<usize> {
        let lower_bound = root_directory_lower_bound(chunks);
        if lower_bound > memory_budget {
            return Err(CubeError::RootDirectoryTooLarge {
                required: lower_bound,
                budget: memory_budget,
            });
        }
        let count = u32::try_from(chunks.len()).map_err(|_| {
            CubeError::Capacity(format!("{} root directory chunks", chunks.len()))
        })?;

        let mut body = Vec::new();
        let reserved = reserve_with_backoff(&mut body, lower_bound, lower_bound.min(MIN_RESERVATION))?;
        debug!(lower_bound, reserved, chunks = chunks.len(), "Reserved root directory buffer");

        body.put_u32_le(count);
        body.resize(INDEX_COUNT_SIZE + chunks.len() * INDEX_ENTRY_SIZE, 0);
        let data_at = body.len();
        for (slot, chunk) in chunks.iter().enumerate() {
            let bytes = encode_dir_chunk(chunk)?;
            let offset = (body.len() - data_at) as u32;
            let at = INDEX_COUNT_SIZE + slot * INDEX_ENTRY_SIZE;
            body[at..at + 4].copy_from_slice(&offset.to_le_bytes());
            body[at + 4..at + 8].copy_from_slice(&(bytes.len() as u32).to_le_bytes());
            body.extend_from_slice(&bytes);
        }
        if body.len() > memory_budget {
            warn!(
                size = body.len(),
                budget = memory_budget,
                "Root directory exceeds its memory budget once artificial tables are included"
            );
        }

        let mut header = Vec::with_capacity(ROOT_HEADER_SIZE);
        header.put_slice(&ROOT_DIRECTORY_MAGIC);
        header.put_u16_le(ROOT_DIRECTORY_VERSION);
        header.put_u16_le(0);
        header.put_u32_le(count);
        header.put_u32_le(crc32fast::hash(&body));

        writer
            .storage
            .create_record(writer.file_id, writer.bucket_id, &header, &body, body.len())?;
        Ok(body.len())
    }
}

/// Breadth-first root directory layout. Declared so it can be configured;
/// it stores nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct BreadthFirstRootDirectory;

impl RootDirectoryStrategy for BreadthFirstRootDirectory {
    fn name(&self) -> &'static str {
        "breadth_first"
    }

    fn store(
        &self,
        chunks: &[DirChunk],
        _memory_budget: usize,
        _writer: &mut RootDirectoryWriter<'_>,
    ) -> Result<usize> {
        warn!(
            chunks = chunks.len(),
            "Breadth-first root directory storage is not implemented, root directory not stored"
        );
        Ok(0)
    }
}

/// Root directory read back from its record.
#[derive(Debug, Clone)]
pub struct RootDirectory {
    body: Vec<u8>,
    index: Vec<(usize, usize)>,
    data_at: usize,
}

impl RootDirectory {
    /// Parses a root directory record.
    pub fn decode(header: &[u8], body: Vec<u8>) -> Result<Self> {
        if header.len() != ROOT_HEADER_SIZE {
            return Err(CubeError::Decode(format!(
                "root directory header has {} bytes",
                header.len()
            )));
        }
        let mut buf = header;
        let mut magic = [0u8; 4];
        buf.copy_to_slice(&mut magic);
        if magic != ROOT_DIRECTORY_MAGIC {
            return Err(CubeError::Decode("bad root directory magic".to_string()));
        }
        let version = buf.get_u16_le();
        if version != ROOT_DIRECTORY_VERSION {
            return Err(CubeError::Decode(format!("unsupported root directory version {}", version)));
        }
        buf.advance(2);
        let count = buf.get_u32_le() as usize;
        let checksum = buf.get_u32_le();
        if crc32fast::hash(&body) != checksum {
            return Err(CubeError::Decode("root directory checksum mismatch".to_string()));
        }

        let data_at = INDEX_COUNT_SIZE + count * INDEX_ENTRY_SIZE;
        if body.len() < data_at {
            return Err(CubeError::Decode("root directory index truncated".to_string()));
        }
        let mut cursor = &body[..data_at];
        if cursor.get_u32_le() as usize != count {
            return Err(CubeError::Decode("root directory count mismatch".to_string()));
        }
        let mut index = Vec::with_capacity(count);
        for slot in 0..count {
            let offset = cursor.get_u32_le() as usize;
            let len = cursor.get_u32_le() as usize;
            if data_at + offset + len > body.len() {
                return Err(CubeError::Decode(format!("root chunk {} out of bounds", slot)));
            }
            index.push((offset, len));
        }
        Ok(Self {
            body,
            index,
            data_at,
        })
    }

    /// Reads the root directory of `file_id` from `storage`.
    pub fn read(storage: &dyn StorageManager, file_id: FileId, bucket_id: BucketId) -> Result<Self> {
        let record = storage.read_record(file_id, bucket_id)?;
        Self::decode(&record.header, record.body)
    }

    /// Number of chunks.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns true if there are no chunks.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Encoded chunk in `slot`.
    pub fn chunk(&self, slot: usize) -> Option<&[u8]> {
        let (offset, len) = *self.index.get(slot)?;
        let start = self.data_at + offset;
        Some(&self.body[start..start + len])
    }

    /// View of the chunk in `slot`.
    pub fn view(&self, slot: usize) -> Result<DirChunkView<'_>> {
        let bytes = self
            .chunk(slot)
            .ok_or_else(|| CubeError::Decode(format!("root directory has no slot {}", slot)))?;
        DirChunkView::decode(bytes)
    }
}
