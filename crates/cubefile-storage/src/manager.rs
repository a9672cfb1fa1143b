//! Transactional record interface consumed by CUBE File construction.

use cubefile_common::{CubeError, FileId, RecordId, Result};
use std::collections::HashSet;

/// One stored record: an opaque header and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub header: Vec<u8>,
    pub body: Vec<u8>,
}

impl Record {
    /// Total size of header and body in bytes.
    pub fn len(&self) -> usize {
        self.header.len() + self.body.len()
    }

    /// Returns true if both header and body are empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Storage manager used by construction.
///
/// Construction runs inside one transaction: it begins before the first
/// record is created, commits after the root directory is stored and
/// aborts on any error. Records created inside the transaction are not
/// readable until commit.
pub trait StorageManager {
    /// Starts a transaction.
    fn begin_txn(&mut self) -> Result<()>;

    /// Makes every record created since `begin_txn` durable and visible.
    fn commit(&mut self) -> Result<()>;

    /// Discards every record created since `begin_txn`.
    fn abort(&mut self) -> Result<()>;

    /// Returns true while a transaction is open.
    fn in_transaction(&self) -> bool;

    /// Hands out a fresh record id in `file_id`. Ids are never reused.
    fn allocate_record_id(&mut self, file_id: FileId) -> Result<RecordId>;

    /// Creates the record `record_id`, which must come from
    /// `allocate_record_id` and must not have been created before.
    fn create_record(
        &mut self,
        file_id: FileId,
        record_id: RecordId,
        header: &[u8],
        body: &[u8],
        size_hint: usize,
    ) -> Result<RecordId>;

    /// Reads a committed record.
    fn read_record(&self, file_id: FileId, record_id: RecordId) -> Result<Record>;
}

/// Records created by the open transaction, in creation order.
#[derive(Debug, Default)]
pub struct PendingRecords {
    records: Vec<(FileId, RecordId, Record)>,
    seen: HashSet<(FileId, RecordId)>,
}

impl PendingRecords {
    /// Creates an empty pending set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a record, rejecting a second record with the same id.
    pub fn push(&mut self, file_id: FileId, record_id: RecordId, record: Record) -> Result<()> {
        if !self.seen.insert((file_id, record_id)) {
            return Err(CubeError::Storage(format!(
                "record {} created twice in {}",
                record_id.0, file_id
            )));
        }
        self.records.push((file_id, record_id, record));
        Ok(())
    }

    /// Returns true if `record_id` was created in this transaction.
    pub fn contains(&self, file_id: FileId, record_id: RecordId) -> bool {
        self.seen.contains(&(file_id, record_id))
    }

    /// Number of pending records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Consumes the set, yielding records in creation order.
    pub fn into_records(self) -> Vec<(FileId, RecordId, Record)> {
        self.records
    }
}
