//! Read access to a constructed CUBE File.
//!
//! Walks from the root directory through the buckets down to the data
//! chunks. Used to inspect a file after construction.

use crate::chunk::DirEntry;
use crate::chunk_id::ChunkId;
use crate::codec::{decode_chunk, ChunkView};
use crate::coords::cell_coordinates;
use crate::root_dir::RootDirectory;
use crate::schema::CubeInfo;
use cubefile_common::{BucketId, CubeError, FileId, Result, ResultExt};
use cubefile_storage::{DiskBucket, StorageManager};
use std::collections::HashMap;

/// One grain cell read back from the file.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredCell {
    pub id: ChunkId,
    pub measures: Vec<f64>,
}

/// Reader over the buckets of one constructed cube.
pub struct CubeFileReader<'s> {
    storage: &'s dyn StorageManager,
    file_id: FileId,
    root_bucket_id: BucketId,
    root: RootDirectory,
}

impl<'s> CubeFileReader<'s> {
    /// Opens the file recorded in `cube`.
    pub fn open(storage: &'s dyn StorageManager, cube: &CubeInfo) -> Result<Self> {
        let (Some(file_id), Some(root_bucket_id)) = (cube.file_id, cube.root_bucket_id) else {
            return Err(CubeError::InvalidParameter {
                name: "cube".to_string(),
                value: format!("{} has not been constructed", cube.name),
            });
        };
        let root = RootDirectory::read(storage, file_id, root_bucket_id)
            .context(|| format!("reading root directory of {}", cube.name))?;
        Ok(Self {
            storage,
            file_id,
            root_bucket_id,
            root,
        })
    }

    /// The root directory.
    pub fn root_directory(&self) -> &RootDirectory {
        &self.root
    }

    /// Reads one bucket.
    pub fn read_bucket(&self, bucket_id: BucketId) -> Result<DiskBucket> {
        let record = self.storage.read_record(self.file_id, bucket_id)?;
        DiskBucket::from_record(&record.header, record.body)
    }

    /// Calls `visit` for every stored grain cell, in directory order.
    /// Returns the number of cells visited.
    pub fn visit_cells<F>(&self, mut visit: F) -> Result<usize>
    where
        F: FnMut(StoredCell),
    {
        let mut buckets = HashMap::new();
        let mut visited = 0;
        let mut stack = vec![DirEntry::new(self.root_bucket_id, 0)];
        while let Some(entry) = stack.pop() {
            let bytes = self.chunk_bytes(entry, &mut buckets)?;
            match decode_chunk(&bytes)? {
                ChunkView::Directory(dir) => {
                    let children: Vec<DirEntry> = dir.entries().filter(|e| !e.is_empty()).collect();
                    stack.extend(children.into_iter().rev());
                }
                ChunkView::Data(data) => {
                    let logical = data.header()?.logical_id();
                    let ranges = data.ranges();
                    for offset in data.bitmap()?.iter_ones() {
                        let coords = cell_coordinates(offset, &ranges).ok_or_else(|| {
                            CubeError::Decode(format!("cell {} outside chunk {}", offset, logical))
                        })?;
                        let measures = data.cell(offset).ok_or_else(|| {
                            CubeError::Decode(format!("cell {} of {} has no values", offset, logical))
                        })?;
                        visit(StoredCell {
                            id: logical.child(coords.codes()),
                            measures,
                        });
                        visited += 1;
                    }
                }
            }
        }
        Ok(visited)
    }

    /// Every stored grain cell.
    pub fn cells(&self) -> Result<Vec<StoredCell>> {
        let mut cells = Vec::new();
        self.visit_cells(|cell| cells.push(cell))?;
        Ok(cells)
    }

    fn chunk_bytes(&self, entry: DirEntry, buckets: &mut HashMap<BucketId, DiskBucket>) -> Result<Vec<u8>> {
        let slot = entry.chunk_slot;
        let missing = || CubeError::Decode(format!("no chunk at {}", entry));
        if entry.bucket_id == self.root_bucket_id {
            return self.root.chunk(slot as usize).map(<[u8]>::to_vec).ok_or_else(missing);
        }
        if !buckets.contains_key(&entry.bucket_id) {
            let bucket = self.read_bucket(entry.bucket_id)?;
            buckets.insert(entry.bucket_id, bucket);
        }
        buckets
            .get(&entry.bucket_id)
            .and_then(|bucket| bucket.chunk(slot))
            .map(<[u8]>::to_vec)
            .ok_or_else(missing)
    }
}
