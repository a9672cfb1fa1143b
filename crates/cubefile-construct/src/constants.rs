//! On-disk chunk layout constants.
//!
//! Every size here feeds both the closed-form chunk size formula used by
//! the cost tree and the chunk codec, so an encoded chunk is always exactly
//! as long as its header claims.

/// Size of the fixed chunk header in bytes.
pub const CHUNK_FIXED_HEADER_SIZE: usize = 24;

/// Size of one order code in a chunk id domain.
pub const ORDER_CODE_SIZE: usize = 4;

/// Size of one level range (left and right order codes).
pub const LEVEL_RANGE_SIZE: usize = 8;

/// Size of the per-dimension entry count of an artificial hierarchy table.
pub const ARTIFICIAL_COUNT_SIZE: usize = 4;

/// Size of one artificial hierarchy entry (synthetic code, left, right).
pub const ARTIFICIAL_ENTRY_SIZE: usize = 12;

/// Size of one directory entry (bucket id, chunk slot, padding).
pub const DIR_ENTRY_SIZE: usize = 8;

/// Bits per compression bitmap word.
pub const BITMAP_WORD_BITS: usize = 32;

/// Size of one compression bitmap word.
pub const BITMAP_WORD_SIZE: usize = 4;

/// Size of one measure value.
pub const MEASURE_SIZE: usize = 8;

/// Chunk kind tags stored in the fixed header.
pub const KIND_ROOT: u8 = 0;
pub const KIND_DIRECTORY: u8 = 1;
pub const KIND_DATA: u8 = 2;
