//! Compression bitmap of data chunks.
//!
//! Bit `i` is set when cell offset `i` holds data. Only set cells are stored,
//! so the entry of a set cell is found at its rank: the number of set bits
//! before it.

use crate::constants::BITMAP_WORD_BITS;
use crate::header::bitmap_words;
use cubefile_common::{CubeError, Result};

/// Fixed-length bitmap stored as 32-bit words, least significant bit first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    words: Vec<u32>,
    len: usize,
}

impl Bitmap {
    /// Creates an all-clear bitmap of `len` bits.
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; bitmap_words(len)],
            len,
        }
    }

    /// Wraps existing words. Bits past `len` must be clear.
    pub fn from_words(words: Vec<u32>, len: usize) -> Result<Self> {
        if words.len() != bitmap_words(len) {
            return Err(CubeError::Decode(format!(
                "bitmap of {} bits needs {} words, got {}",
                len,
                bitmap_words(len),
                words.len()
            )));
        }
        let bitmap = Self { words, len };
        let tail = len % BITMAP_WORD_BITS;
        if tail != 0 {
            if let Some(last) = bitmap.words.last() {
                if last >> tail != 0 {
                    return Err(CubeError::Decode("bits set past bitmap end".to_string()));
                }
            }
        }
        Ok(bitmap)
    }

    /// Number of bits.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true for a zero-length bitmap.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Backing words.
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Sets bit `index`.
    pub fn set(&mut self, index: usize) {
        assert!(index < self.len, "bit {} out of range {}", index, self.len);
        self.words[index / BITMAP_WORD_BITS] |= 1 << (index % BITMAP_WORD_BITS);
    }

    /// Returns bit `index`; out-of-range bits read as clear.
    pub fn get(&self, index: usize) -> bool {
        index < self.len && self.words[index / BITMAP_WORD_BITS] & (1 << (index % BITMAP_WORD_BITS)) != 0
    }

    /// Number of set bits.
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Number of set bits before `index`.
    pub fn rank(&self, index: usize) -> usize {
        rank_in_words(&self.words, index.min(self.len))
    }

    /// Entry index of a set bit, `None` if the bit is clear.
    pub fn compressed_index(&self, index: usize) -> Option<usize> {
        self.get(index).then(|| self.rank(index))
    }

    /// Offsets of the set bits, ascending.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter(move |&i| self.get(i))
    }
}

/// Number of set bits before `index` in `words`.
pub(crate) fn rank_in_words(words: &[u32], index: usize) -> usize {
    let full = index / BITMAP_WORD_BITS;
    let mut rank: usize = words[..full].iter().map(|w| w.count_ones() as usize).sum();
    let rest = index % BITMAP_WORD_BITS;
    if rest != 0 {
        rank += (words[full] & ((1u32 << rest) - 1)).count_ones() as usize;
    }
    rank
}
