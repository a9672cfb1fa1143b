//! Persistent identifiers and size constants for CUBE File storage.

use serde::{Deserialize, Serialize};

/// Default bucket size in bytes (8 KB).
pub const DEFAULT_BUCKET_SIZE: usize = 8 * 1024;

/// Maximum number of independent subtrees a single bucket can hold.
///
/// The bucket header reserves one subtree-directory entry per subtree.
pub const MAX_SUBTREES_PER_BUCKET: usize = 32;

/// Identifier of a storage file (one CUBE File per file id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(pub u32);

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "file:{}", self.0)
    }
}

/// Identifier of a bucket.
///
/// Bucket ids are storage record ids: the storage manager hands them out
/// and every bucket is written as exactly one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BucketId(pub u32);

/// Storage record identifier.
pub type RecordId = BucketId;

impl BucketId {
    /// Bucket not yet allocated.
    pub const NULL: BucketId = BucketId(0);

    /// First id handed out by a record allocator.
    pub const FIRST: BucketId = BucketId(1);

    /// Returns true if this id refers to an allocated bucket.
    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }

    /// Returns the id following this one.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl Default for BucketId {
    fn default() -> Self {
        Self::NULL
    }
}

impl std::fmt::Display for BucketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "bucket:{}", self.0)
        } else {
            write!(f, "bucket:null")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_id_null() {
        assert!(!BucketId::NULL.is_valid());
        assert!(BucketId::FIRST.is_valid());
        assert_eq!(BucketId::default(), BucketId::NULL);
    }

    #[test]
    fn test_bucket_id_next() {
        assert_eq!(BucketId(41).next(), BucketId(42));
        assert_eq!(BucketId::NULL.next(), BucketId::FIRST);
    }

    #[test]
    fn test_display() {
        assert_eq!(BucketId(7).to_string(), "bucket:7");
        assert_eq!(BucketId::NULL.to_string(), "bucket:null");
        assert_eq!(FileId(3).to_string(), "file:3");
    }

    #[test]
    fn test_bucket_id_serde_roundtrip() {
        let original = BucketId(500);
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: BucketId = serde_json::from_str(&serialized).unwrap();
        assert_eq!(original, deserialized);
    }
}
