//! File-backed record storage.
//!
//! Each file id maps to one append-only record file. Records are framed
//! and padded to a multiple of the configured page size:
//!
//! ```text
//! +--------------------------------------------------------------+
//! | total_len (4) | id (4) | header_len (4) | body_len (4) | crc (4) |
//! +--------------------------------------------------------------+
//! | header bytes | body bytes | zero padding up to total_len       |
//! +--------------------------------------------------------------+
//! ```

use crate::constants::RECORD_FRAME_SIZE;
use crate::manager::{PendingRecords, Record, StorageManager};
use cubefile_common::{BucketId, CubeError, FileId, RecordId, Result, DEFAULT_BUCKET_SIZE};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Configuration for file storage.
#[derive(Debug, Clone)]
pub struct FileStorageConfig {
    /// Base directory for record files.
    pub data_dir: PathBuf,
    /// Enable fsync on commit.
    pub fsync_enabled: bool,
    /// Records are padded to a multiple of this size.
    pub page_size: usize,
}

impl Default for FileStorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            fsync_enabled: true,
            page_size: DEFAULT_BUCKET_SIZE,
        }
    }
}

/// Location of one record inside its file.
#[derive(Debug, Clone, Copy)]
struct RecordLocation {
    offset: u64,
    header_len: u32,
    body_len: u32,
    checksum: u32,
}

/// Handle for an open record file.
struct FileHandle {
    /// The file handle.
    file: File,
    /// Committed records keyed by record id.
    index: HashMap<u32, RecordLocation>,
    /// End of the last committed record.
    end: u64,
    /// Largest record id seen in the file.
    max_id: u32,
}

/// Records of one file framed into a single buffer for commit.
struct StagedAppend {
    /// File length before the commit.
    start: u64,
    buf: Vec<u8>,
    locations: Vec<(u32, RecordLocation)>,
    max_id: u32,
}

impl StagedAppend {
    fn new(start: u64) -> Self {
        Self {
            start,
            buf: Vec::new(),
            locations: Vec::new(),
            max_id: 0,
        }
    }

    /// Frames `record` and pads it to a multiple of `page_size`.
    fn push(&mut self, page_size: usize, record_id: RecordId, record: &Record) {
        let framed = RECORD_FRAME_SIZE + record.len();
        let total_len = framed.div_ceil(page_size) * page_size;

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&record.header);
        hasher.update(&record.body);
        let checksum = hasher.finalize();

        let offset = self.start + self.buf.len() as u64;
        let frame_at = self.buf.len();
        self.buf.extend_from_slice(&(total_len as u32).to_le_bytes());
        self.buf.extend_from_slice(&record_id.0.to_le_bytes());
        self.buf.extend_from_slice(&(record.header.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(&(record.body.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(&checksum.to_le_bytes());
        self.buf.extend_from_slice(&record.header);
        self.buf.extend_from_slice(&record.body);
        self.buf.resize(frame_at + total_len, 0);

        self.locations.push((
            record_id.0,
            RecordLocation {
                offset,
                header_len: record.header.len() as u32,
                body_len: record.body.len() as u32,
                checksum,
            },
        ));
        self.max_id = self.max_id.max(record_id.0);
    }
}

/// Storage manager writing records to append-only files.
///
/// Records created during a transaction are buffered in memory and only
/// appended to their files on commit.
pub struct FileStorage {
    /// Configuration.
    config: FileStorageConfig,
    /// Open file handles keyed by file id.
    files: Mutex<HashMap<u32, FileHandle>>,
    /// Next record id to hand out per file.
    next_ids: HashMap<FileId, RecordId>,
    /// Records of the open transaction.
    txn: Option<PendingRecords>,
}

impl FileStorage {
    /// Creates a new file storage.
    pub fn new(config: FileStorageConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        Ok(Self {
            config,
            files: Mutex::new(HashMap::new()),
            next_ids: HashMap::new(),
            txn: None,
        })
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Generates the file path for a given file id.
    fn file_path(&self, file_id: FileId) -> PathBuf {
        self.config.data_dir.join(format!("{:08}.cube", file_id.0))
    }

    /// Opens or creates a record file, rebuilding its index.
    fn open_file(&self, file_id: FileId) -> Result<()> {
        let mut files = self.files.lock();

        if files.contains_key(&file_id.0) {
            return Ok(());
        }

        let path = self.file_path(file_id);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let file_size = file.metadata()?.len();
        let mut index = HashMap::new();
        let mut max_id = 0;
        let mut offset = 0u64;
        let mut frame = [0u8; RECORD_FRAME_SIZE];

        while offset + RECORD_FRAME_SIZE as u64 <= file_size {
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut frame)?;
            let field = |i: usize| {
                u32::from_le_bytes([frame[i * 4], frame[i * 4 + 1], frame[i * 4 + 2], frame[i * 4 + 3]])
            };
            let total_len = field(0) as u64;
            let id = field(1);
            if total_len < RECORD_FRAME_SIZE as u64 || offset + total_len > file_size {
                tracing::warn!(
                    path = %path.display(),
                    offset,
                    "truncated record frame, ignoring file tail"
                );
                break;
            }
            index.insert(
                id,
                RecordLocation {
                    offset,
                    header_len: field(2),
                    body_len: field(3),
                    checksum: field(4),
                },
            );
            max_id = max_id.max(id);
            offset += total_len;
        }

        files.insert(
            file_id.0,
            FileHandle {
                file,
                index,
                end: offset,
                max_id,
            },
        );

        Ok(())
    }

    /// Writes every staged buffer at the end of its file. Files touched
    /// before a failure are listed in `written` with their old length.
    fn write_staged(
        files: &mut HashMap<u32, FileHandle>,
        staged: &BTreeMap<u32, StagedAppend>,
        written: &mut Vec<(u32, u64)>,
        fsync: bool,
    ) -> Result<()> {
        for (file_id, stage) in staged {
            let handle = files
                .get_mut(file_id)
                .ok_or_else(|| CubeError::Storage(format!("file:{} not open", file_id)))?;
            written.push((*file_id, stage.start));
            handle.file.seek(SeekFrom::Start(stage.start))?;
            handle.file.write_all(&stage.buf)?;
        }
        if fsync {
            for (file_id, _) in written.iter() {
                if let Some(handle) = files.get(file_id) {
                    handle.file.sync_all()?;
                }
            }
        }
        Ok(())
    }

    /// Truncates every file in `written` back to its pre-commit length.
    fn rollback(files: &mut HashMap<u32, FileHandle>, written: &[(u32, u64)]) {
        for &(file_id, len) in written {
            let Some(handle) = files.get_mut(&file_id) else {
                continue;
            };
            if let Err(e) = handle.file.set_len(len) {
                tracing::warn!(file = file_id, len, error = %e, "failed to truncate record file");
            }
        }
    }

    /// Returns the number of committed records in a file.
    pub fn record_count(&self, file_id: FileId) -> Result<usize> {
        self.open_file(file_id)?;
        let files = self.files.lock();
        Ok(files.get(&file_id.0).map_or(0, |h| h.index.len()))
    }

    /// Flushes all files to disk.
    pub fn flush(&self) -> Result<()> {
        let files = self.files.lock();
        for handle in files.values() {
            handle.file.sync_all()?;
        }
        Ok(())
    }

    /// Closes all open files.
    pub fn close_all(&self) -> Result<()> {
        let mut files = self.files.lock();
        for (_, handle) in files.drain() {
            handle.file.sync_all()?;
        }
        Ok(())
    }

    /// Deletes a record file.
    pub fn delete_file(&mut self, file_id: FileId) -> Result<()> {
        self.files.lock().remove(&file_id.0);
        self.next_ids.remove(&file_id);
        let path = self.file_path(file_id);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

impl StorageManager for FileStorage {
    fn begin_txn(&mut self) -> Result<()> {
        if self.txn.is_some() {
            return Err(CubeError::TransactionActive);
        }
        self.txn = Some(PendingRecords::new());
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        let pending = self.txn.take().ok_or(CubeError::NoActiveTransaction)?;
        let count = pending.len();
        let records = pending.into_records();

        for (file_id, _, _) in &records {
            self.open_file(*file_id)?;
        }

        let mut files = self.files.lock();
        let mut staged: BTreeMap<u32, StagedAppend> = BTreeMap::new();
        for (file_id, record_id, record) in &records {
            let handle = files.get(&file_id.0).ok_or_else(|| {
                CubeError::Storage(format!("{} not open", file_id))
            })?;
            staged
                .entry(file_id.0)
                .or_insert_with(|| StagedAppend::new(handle.end))
                .push(self.config.page_size, *record_id, record);
        }

        let mut written = Vec::with_capacity(staged.len());
        if let Err(e) = Self::write_staged(&mut files, &staged, &mut written, self.config.fsync_enabled) {
            Self::rollback(&mut files, &written);
            tracing::warn!(records = count, error = %e, "storage commit failed, files truncated");
            return Err(e);
        }

        for (file_id, stage) in staged {
            if let Some(handle) = files.get_mut(&file_id) {
                handle.end = stage.start + stage.buf.len() as u64;
                handle.max_id = handle.max_id.max(stage.max_id);
                handle.index.extend(stage.locations);
            }
        }

        tracing::debug!(records = count, "storage transaction committed");
        Ok(())
    }

    fn abort(&mut self) -> Result<()> {
        let pending = self.txn.take().ok_or(CubeError::NoActiveTransaction)?;
        tracing::debug!(records = pending.len(), "storage transaction aborted");
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.txn.is_some()
    }

    fn allocate_record_id(&mut self, file_id: FileId) -> Result<RecordId> {
        if !self.next_ids.contains_key(&file_id) {
            self.open_file(file_id)?;
            let max_id = self.files.lock().get(&file_id.0).map_or(0, |h| h.max_id);
            self.next_ids.insert(file_id, BucketId(max_id).next());
        }
        let next = self
            .next_ids
            .get_mut(&file_id)
            .ok_or_else(|| CubeError::Internal(format!("no id allocator for {}", file_id)))?;
        let id = *next;
        *next = id.next();
        Ok(id)
    }

    fn create_record(
        &mut self,
        file_id: FileId,
        record_id: RecordId,
        header: &[u8],
        body: &[u8],
        size_hint: usize,
    ) -> Result<RecordId> {
        let allocated = self
            .next_ids
            .get(&file_id)
            .is_some_and(|next| record_id.is_valid() && record_id < *next);
        if !allocated {
            return Err(CubeError::Storage(format!(
                "record {} was never allocated in {}",
                record_id.0, file_id
            )));
        }
        let exists = self
            .files
            .lock()
            .get(&file_id.0)
            .is_some_and(|h| h.index.contains_key(&record_id.0));
        if exists {
            return Err(CubeError::Storage(format!(
                "record {} already exists in {}",
                record_id.0, file_id
            )));
        }

        let txn = self.txn.as_mut().ok_or(CubeError::NoActiveTransaction)?;
        let mut record_body = Vec::with_capacity(size_hint.max(body.len()));
        record_body.extend_from_slice(body);
        txn.push(
            file_id,
            record_id,
            Record {
                header: header.to_vec(),
                body: record_body,
            },
        )?;
        Ok(record_id)
    }

    fn read_record(&self, file_id: FileId, record_id: RecordId) -> Result<Record> {
        self.open_file(file_id)?;

        let mut files = self.files.lock();
        let handle = files
            .get_mut(&file_id.0)
            .ok_or_else(|| CubeError::Storage(format!("{} not open", file_id)))?;
        let location = *handle
            .index
            .get(&record_id.0)
            .ok_or_else(|| CubeError::RecordNotFound {
                file_id: file_id.0,
                record_id: record_id.0,
            })?;

        handle
            .file
            .seek(SeekFrom::Start(location.offset + RECORD_FRAME_SIZE as u64))?;
        let mut header = vec![0u8; location.header_len as usize];
        handle.file.read_exact(&mut header)?;
        let mut body = vec![0u8; location.body_len as usize];
        handle.file.read_exact(&mut body)?;

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&header);
        hasher.update(&body);
        let computed = hasher.finalize();
        if computed != location.checksum {
            return Err(CubeError::RecordCorrupted {
                record_id: record_id.0,
                reason: format!(
                    "checksum mismatch: stored={}, computed={}",
                    location.checksum, computed
                ),
            });
        }

        Ok(Record { header, body })
    }
}

impl Drop for FileStorage {
    fn drop(&mut self) {
        let _ = self.close_all();
    }
}
