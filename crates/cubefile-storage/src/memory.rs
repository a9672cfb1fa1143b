//! In-memory record store.

use crate::manager::{PendingRecords, Record, StorageManager};
use cubefile_common::{CubeError, FileId, RecordId, Result};
use std::collections::HashMap;

/// Storage manager keeping every committed record in memory.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    records: HashMap<(FileId, RecordId), Record>,
    next_ids: HashMap<FileId, RecordId>,
    txn: Option<PendingRecords>,
}

impl MemoryStorage {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed records in `file_id`.
    pub fn record_count(&self, file_id: FileId) -> usize {
        self.records.keys().filter(|(f, _)| *f == file_id).count()
    }

    /// Committed record ids of `file_id`, ascending.
    pub fn record_ids(&self, file_id: FileId) -> Vec<RecordId> {
        let mut ids: Vec<_> = self
            .records
            .keys()
            .filter(|(f, _)| *f == file_id)
            .map(|(_, id)| *id)
            .collect();
        ids.sort();
        ids
    }
}

impl StorageManager for MemoryStorage {
    fn begin_txn(&mut self) -> Result<()> {
        if self.txn.is_some() {
            return Err(CubeError::TransactionActive);
        }
        self.txn = Some(PendingRecords::new());
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        let pending = self.txn.take().ok_or(CubeError::NoActiveTransaction)?;
        for (file_id, record_id, record) in pending.into_records() {
            self.records.insert((file_id, record_id), record);
        }
        Ok(())
    }

    fn abort(&mut self) -> Result<()> {
        self.txn.take().ok_or(CubeError::NoActiveTransaction)?;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.txn.is_some()
    }

    fn allocate_record_id(&mut self, file_id: FileId) -> Result<RecordId> {
        let next = self.next_ids.entry(file_id).or_insert(RecordId::FIRST);
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
        _size_hint: usize,
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
        if self.records.contains_key(&(file_id, record_id)) {
            return Err(CubeError::Storage(format!(
                "record {} already exists in {}",
                record_id.0, file_id
            )));
        }

        let txn = self.txn.as_mut().ok_or(CubeError::NoActiveTransaction)?;
        txn.push(
            file_id,
            record_id,
            Record {
                header: header.to_vec(),
                body: body.to_vec(),
            },
        )?;
        Ok(record_id)
    }

    fn read_record(&self, file_id: FileId, record_id: RecordId) -> Result<Record> {
        self.records
            .get(&(file_id, record_id))
            .cloned()
            .ok_or_else(|| CubeError::RecordNotFound {
                file_id: file_id.0,
                record_id: record_id.0,
            })
    }
}
