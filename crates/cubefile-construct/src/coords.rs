//! Level ranges, cell coordinates and row-major cell offsets.

use crate::chunk_id::PSEUDO_ORDER_CODE;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Inclusive range of order codes covered by a chunk along one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LevelRange {
    pub left: i32,
    pub right: i32,
}

impl LevelRange {
    /// Range of a pseudo dimension.
    pub const NULL: LevelRange = LevelRange {
        left: PSEUDO_ORDER_CODE,
        right: PSEUDO_ORDER_CODE,
    };

    /// Creates a range `[left, right]`.
    pub fn new(left: i32, right: i32) -> Self {
        Self { left, right }
    }

    /// Returns true for the pseudo range.
    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }

    /// Number of order codes covered; a pseudo range counts as one.
    pub fn width(&self) -> usize {
        if self.is_null() || self.right < self.left {
            1
        } else {
            (self.right - self.left) as usize + 1
        }
    }

    /// Returns true if `code` lies in the range. The only code in a pseudo
    /// range is the pseudo order code.
    pub fn contains(&self, code: i32) -> bool {
        if self.is_null() {
            code == PSEUDO_ORDER_CODE
        } else {
            code >= self.left && code <= self.right
        }
    }

    /// First code of the range.
    fn first(&self) -> i32 {
        if self.is_null() {
            PSEUDO_ORDER_CODE
        } else {
            self.left
        }
    }
}

impl fmt::Display for LevelRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("[P]")
        } else {
            write!(f, "[{}..{}]", self.left, self.right)
        }
    }
}

/// Number of cells spanned by `ranges`.
pub fn total_cells(ranges: &[LevelRange]) -> usize {
    ranges.iter().map(LevelRange::width).product()
}

/// Row-major offset of `coords` within `ranges`. The first dimension varies
/// slowest and pseudo dimensions contribute nothing.
///
/// Returns `None` if the arity differs or any code lies outside its range.
pub fn calc_cell_offset(coords: &[i32], ranges: &[LevelRange]) -> Option<usize> {
    if coords.len() != ranges.len() {
        return None;
    }
    let mut offset = 0usize;
    for (code, range) in coords.iter().zip(ranges) {
        if !range.contains(*code) {
            return None;
        }
        if !range.is_null() {
            offset = offset * range.width() + (code - range.left) as usize;
        }
    }
    Some(offset)
}

/// Inverse of [`calc_cell_offset`].
pub fn cell_coordinates(offset: usize, ranges: &[LevelRange]) -> Option<Coordinates> {
    if offset >= total_cells(ranges) {
        return None;
    }
    let mut codes = vec![PSEUDO_ORDER_CODE; ranges.len()];
    let mut rest = offset;
    for (code, range) in codes.iter_mut().zip(ranges).rev() {
        if !range.is_null() {
            let width = range.width();
            *code = range.left + (rest % width) as i32;
            rest /= width;
        }
    }
    Some(Coordinates { codes })
}

/// Coordinates of a cell inside a chunk: one order code per dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Coordinates {
    codes: Vec<i32>,
}

impl Coordinates {
    /// Wraps explicit codes.
    pub fn new(codes: Vec<i32>) -> Self {
        Self { codes }
    }

    /// The first cell of `ranges` in row-major order.
    pub fn first_cell(ranges: &[LevelRange]) -> Self {
        Self {
            codes: ranges.iter().map(LevelRange::first).collect(),
        }
    }

    /// Codes, one per dimension.
    pub fn codes(&self) -> &[i32] {
        &self.codes
    }

    /// Consumes the coordinates, returning the codes.
    pub fn into_codes(self) -> Vec<i32> {
        self.codes
    }

    /// Advances to the next cell in row-major order. After the last cell
    /// the walk wraps around to the first cell and `true` is returned.
    pub fn become_next_cell(&mut self, ranges: &[LevelRange]) -> bool {
        for (code, range) in self.codes.iter_mut().zip(ranges).rev() {
            if range.is_null() {
                continue;
            }
            if *code < range.right {
                *code += 1;
                return false;
            }
            *code = range.left;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_ranges() -> Vec<LevelRange> {
        vec![LevelRange::new(2, 4), LevelRange::NULL, LevelRange::new(0, 1)]
    }

    #[test]
    fn test_level_range_width() {
        assert_eq!(LevelRange::new(3, 7).width(), 5);
        assert_eq!(LevelRange::NULL.width(), 1);
        assert!(LevelRange::NULL.contains(PSEUDO_ORDER_CODE));
        assert!(!LevelRange::new(0, 3).contains(4));
    }

    #[test]
    fn test_total_cells() {
        assert_eq!(total_cells(&create_test_ranges()), 6);
        assert_eq!(total_cells(&[]), 1);
    }

    #[test]
    fn test_calc_cell_offset_row_major() {
        let ranges = create_test_ranges();
        assert_eq!(calc_cell_offset(&[2, -1, 0], &ranges), Some(0));
        assert_eq!(calc_cell_offset(&[2, -1, 1], &ranges), Some(1));
        assert_eq!(calc_cell_offset(&[3, -1, 0], &ranges), Some(2));
        assert_eq!(calc_cell_offset(&[4, -1, 1], &ranges), Some(5));
        assert_eq!(calc_cell_offset(&[5, -1, 0], &ranges), None);
        assert_eq!(calc_cell_offset(&[2, 0, 0], &ranges), None);
        assert_eq!(calc_cell_offset(&[2, -1], &ranges), None);
    }

    #[test]
    fn test_offset_bijection() {
        let ranges = vec![LevelRange::new(1, 3), LevelRange::new(0, 4), LevelRange::NULL];
        let total = total_cells(&ranges);
        let mut seen = vec![false; total];
        for offset in 0..total {
            let coords = cell_coordinates(offset, &ranges).unwrap();
            let back = calc_cell_offset(coords.codes(), &ranges).unwrap();
            assert_eq!(back, offset);
            assert!(!seen[back]);
            seen[back] = true;
        }
        assert!(cell_coordinates(total, &ranges).is_none());
    }

    #[test]
    fn test_become_next_cell_walks_in_offset_order() {
        let ranges = create_test_ranges();
        let mut cell = Coordinates::first_cell(&ranges);
        for expected in 0..total_cells(&ranges) {
            assert_eq!(calc_cell_offset(cell.codes(), &ranges), Some(expected));
            let wrapped = cell.become_next_cell(&ranges);
            assert_eq!(wrapped, expected + 1 == total_cells(&ranges));
        }
        assert_eq!(cell, Coordinates::first_cell(&ranges));
    }
}
