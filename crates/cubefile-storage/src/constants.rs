//! Bucket and record layout constants.

use cubefile_common::MAX_SUBTREES_PER_BUCKET;

/// Size of the fixed part of the bucket header in bytes.
pub const BUCKET_FIXED_HEADER_SIZE: usize = 24;

/// Size of one subtree directory entry (first chunk slot, u16).
pub const SUBTREE_ENTRY_SIZE: usize = 2;

/// Total bucket header size including the subtree directory.
pub const BUCKET_HEADER_SIZE: usize =
    BUCKET_FIXED_HEADER_SIZE + MAX_SUBTREES_PER_BUCKET * SUBTREE_ENTRY_SIZE;

/// Size of a chunk slot entry in the body's slot directory.
pub const CHUNK_SLOT_SIZE: usize = 8;

/// Size of the frame preceding every record in a record file.
pub const RECORD_FRAME_SIZE: usize = 20;
