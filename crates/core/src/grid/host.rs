//! Queries the engine makes against the host grid.

use crate::core_types::CellPos;
use crate::error::HostQueryError;

/// Occupancy queries answered by the host world.
///
/// The passability queries may fail transiently (for example while the grid
/// is still being loaded); the engine treats a failure as "cannot diffuse
/// here this tick". Implementations are only called with in-bounds cells.
pub trait CellEnvironment {
    /// A wall, rock or other solid fills the cell.
    fn is_cell_filled(&self, cell: CellPos) -> Result<bool, HostQueryError>;

    /// The cell holds a door that is currently open.
    fn has_open_door(&self, cell: CellPos) -> Result<bool, HostQueryError>;

    /// The cell holds a vent that is switched on.
    fn has_powered_vent(&self, cell: CellPos) -> Result<bool, HostQueryError>;

    /// The cell is sheltered from outdoor wind and weather.
    fn is_roofed(&self, cell: CellPos) -> bool;
}
