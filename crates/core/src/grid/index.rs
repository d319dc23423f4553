//! Dense cell indexing and grid identity.

use crate::core_types::CellPos;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a host grid (a map, level, deck...).
///
/// `slot` is the small integer the host uses to address the grid and drives
/// the registry's direct-mapped cache. `generation` changes whenever the host
/// reloads or replaces the grid in that slot, which invalidates cached
/// lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridId {
    pub slot: u16,
    pub generation: u32,
}

impl GridId {
    pub const fn new(slot: u16, generation: u32) -> Self {
        Self { slot, generation }
    }
}

impl fmt::Display for GridId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.slot, self.generation)
    }
}

/// Row-major mapping between [`CellPos`] and a dense integer index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridIndex {
    pub width: u32,
    pub height: u32,
}

impl GridIndex {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    #[inline]
    pub fn cell_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    #[inline]
    pub fn in_bounds(&self, cell: CellPos) -> bool {
        cell.x >= 0 && cell.y >= 0 && (cell.x as u32) < self.width && (cell.y as u32) < self.height
    }

    /// Dense index of `cell`, or `None` outside the grid.
    #[inline]
    pub fn cell_to_index(&self, cell: CellPos) -> Option<usize> {
        if self.in_bounds(cell) {
            Some(cell.y as usize * self.width as usize + cell.x as usize)
        } else {
            None
        }
    }

    /// Inverse of [`cell_to_index`](Self::cell_to_index).
    pub fn index_to_cell(&self, index: usize) -> Option<CellPos> {
        if index >= self.cell_count() {
            return None;
        }
        let width = self.width as usize;
        Some(CellPos::new((index % width) as i32, (index / width) as i32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_round_trip_and_bounds() {
        let index = GridIndex::new(4, 3);
        assert_eq!(index.cell_count(), 12);
        assert_eq!(index.cell_to_index(CellPos::new(3, 2)), Some(11));
        assert_eq!(index.index_to_cell(11), Some(CellPos::new(3, 2)));
        assert_eq!(index.cell_to_index(CellPos::new(4, 0)), None);
        assert_eq!(index.cell_to_index(CellPos::new(-1, 0)), None);
        assert_eq!(index.index_to_cell(12), None);
    }
}
