//! In-memory [`CellEnvironment`] for headless runs and tests.

use super::{CellEnvironment, GridIndex};
use crate::core_types::CellPos;
use crate::error::HostQueryError;

/// Door state of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Door {
    #[default]
    None,
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, Default)]
struct CellFlags {
    filled: bool,
    door: Door,
    powered_vent: bool,
    roofed: bool,
}

/// Flat grid of occupancy flags.
///
/// Doors and vents are modelled as filling their cell, as in most hosts: a
/// closed door seals, an open door lets the substance through.
#[derive(Debug, Clone)]
pub struct CellMap {
    index: GridIndex,
    cells: Vec<CellFlags>,
    ready: bool,
}

impl CellMap {
    /// Open, unroofed map.
    pub fn new(index: GridIndex) -> Self {
        Self {
            index,
            cells: vec![CellFlags::default(); index.cell_count()],
            ready: true,
        }
    }

    pub fn index(&self) -> GridIndex {
        self.index
    }

    fn flags_mut(&mut self, cell: CellPos) -> Option<&mut CellFlags> {
        let index = self.index.cell_to_index(cell)?;
        self.cells.get_mut(index)
    }

    fn flags(&self, cell: CellPos) -> Result<CellFlags, HostQueryError> {
        if !self.ready {
            return Err(HostQueryError::new(cell, "grid not ready"));
        }
        self.index
            .cell_to_index(cell)
            .and_then(|index| self.cells.get(index).copied())
            .ok_or_else(|| HostQueryError::new(cell, "outside grid"))
    }

    pub fn set_filled(&mut self, cell: CellPos, filled: bool) {
        if let Some(flags) = self.flags_mut(cell) {
            flags.filled = filled;
        }
    }

    pub fn set_roofed(&mut self, cell: CellPos, roofed: bool) {
        if let Some(flags) = self.flags_mut(cell) {
            flags.roofed = roofed;
        }
    }

    pub fn set_door(&mut self, cell: CellPos, door: Door) {
        if let Some(flags) = self.flags_mut(cell) {
            flags.door = door;
            flags.filled = door != Door::None;
        }
    }

    pub fn set_vent(&mut self, cell: CellPos, powered: bool) {
        if let Some(flags) = self.flags_mut(cell) {
            flags.powered_vent = powered;
            flags.filled = true;
        }
    }

    /// Toggle whether passability queries succeed.
    pub fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    /// Fill every cell, then carve out the rectangle `[min, max]` (inclusive).
    pub fn sealed_room(index: GridIndex, min: CellPos, max: CellPos, roofed: bool) -> Self {
        let mut map = Self::new(index);
        for flags in &mut map.cells {
            flags.filled = true;
            flags.roofed = roofed;
        }
        for y in min.y..=max.y {
            for x in min.x..=max.x {
                map.set_filled(CellPos::new(x, y), false);
            }
        }
        map
    }
}

impl CellEnvironment for CellMap {
    fn is_cell_filled(&self, cell: CellPos) -> Result<bool, HostQueryError> {
        Ok(self.flags(cell)?.filled)
    }

    fn has_open_door(&self, cell: CellPos) -> Result<bool, HostQueryError> {
        Ok(self.flags(cell)?.door == Door::Open)
    }

    fn has_powered_vent(&self, cell: CellPos) -> Result<bool, HostQueryError> {
        Ok(self.flags(cell)?.powered_vent)
    }

    fn is_roofed(&self, cell: CellPos) -> bool {
        self.flags(cell).is_ok_and(|flags| flags.roofed)
    }
}
