//! Storage layer for CUBE File.
//!
//! This crate provides:
//! - DiskBucket: slotted bucket format holding one or more encoded chunks
//! - StorageManager: transactional record interface consumed by construction
//! - FileStorage: append-only record files managed per file id
//! - MemoryStorage: in-memory record store

pub mod bucket;
pub mod constants;
mod disk;
mod manager;
mod memory;

pub use bucket::{BucketHeader, ChunkSlot, DiskBucket};
pub use disk::{FileStorage, FileStorageConfig};
pub use manager::{PendingRecords, Record, StorageManager};
pub use memory::MemoryStorage;
