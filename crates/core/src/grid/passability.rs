//! Per-cell "can the substance enter this cell" cache.
//!
//! The occupancy query behind passability may be expensive, and many
//! particles probe the same neighbour in one tick. Results are memoized per
//! cell index against the tick number, so each cell costs at most one host
//! query per tick and every probe within a tick sees the same answer.

use super::{CellEnvironment, GridIndex};
use crate::core_types::CellPos;
use crate::error::HostQueryError;
use tracing::debug;

/// Tick-stamped passability memo sized to the full grid.
#[derive(Debug, Clone)]
pub struct PassabilityCache {
    index: GridIndex,
    stamps: Vec<Option<u64>>,
    passable: Vec<bool>,
}

impl PassabilityCache {
    pub fn new(index: GridIndex) -> Self {
        let cells = index.cell_count();
        Self {
            index,
            stamps: vec![None; cells],
            passable: vec![false; cells],
        }
    }

    /// Whether the substance may occupy `cell` during `tick`.
    ///
    /// A cell is diffusable if it is not filled, or has an open door, or has
    /// a powered vent. Out-of-bounds cells are never diffusable.
    pub fn can_diffuse_to(&mut self, cell: CellPos, tick: u64, env: &dyn CellEnvironment) -> bool {
        let Some(index) = self.index.cell_to_index(cell) else {
            return false;
        };
        if self.stamps[index] == Some(tick) {
            return self.passable[index];
        }

        let passable = match query_passable(cell, env) {
            Ok(passable) => passable,
            Err(err) => {
                debug!("Treating {} as sealed this tick: {}", cell, err);
                false
            }
        };
        self.stamps[index] = Some(tick);
        self.passable[index] = passable;
        passable
    }

    /// Drop every memoized answer.
    pub fn invalidate(&mut self) {
        self.stamps.fill(None);
    }
}

fn query_passable(
    cell: CellPos,
    env: &dyn CellEnvironment,
) -> Result<bool, HostQueryError> {
    Ok(!env.is_cell_filled(cell)? || env.has_open_door(cell)? || env.has_powered_vent(cell)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    /// Environment whose answer flips on every query and counts calls.
    struct Flipping {
        filled: Cell<bool>,
        calls: Cell<u32>,
    }

    impl CellEnvironment for Flipping {
        fn is_cell_filled(&self, _cell: CellPos) -> Result<bool, HostQueryError> {
            self.calls.set(self.calls.get() + 1);
            let filled = self.filled.get();
            self.filled.set(!filled);
            Ok(filled)
        }
        fn has_open_door(&self, _cell: CellPos) -> Result<bool, HostQueryError> {
            Ok(false)
        }
        fn has_powered_vent(&self, _cell: CellPos) -> Result<bool, HostQueryError> {
            Ok(false)
        }
        fn is_roofed(&self, _cell: CellPos) -> bool {
            false
        }
    }

    struct NotReady;

    impl CellEnvironment for NotReady {
        fn is_cell_filled(&self, cell: CellPos) -> Result<bool, HostQueryError> {
            Err(HostQueryError::new(cell, "grid not ready"))
        }
        fn has_open_door(&self, _cell: CellPos) -> Result<bool, HostQueryError> {
            Ok(true)
        }
        fn has_powered_vent(&self, _cell: CellPos) -> Result<bool, HostQueryError> {
            Ok(true)
        }
        fn is_roofed(&self, _cell: CellPos) -> bool {
            false
        }
    }

    #[test]
    fn test_same_tick_answers_are_isolated() {
        let env = Flipping {
            filled: Cell::new(false),
            calls: Cell::new(0),
        };
        let mut cache = PassabilityCache::new(GridIndex::new(3, 3));
        let cell = CellPos::new(1, 1);

        let first = cache.can_diffuse_to(cell, 7, &env);
        let second = cache.can_diffuse_to(cell, 7, &env);
        assert!(first);
        assert_eq!(first, second);
        assert_eq!(env.calls.get(), 1);

        // Next tick re-queries and sees the flipped answer
        assert!(!cache.can_diffuse_to(cell, 8, &env));
        assert_eq!(env.calls.get(), 2);
    }

    #[test]
    fn test_tick_zero_is_not_a_stale_hit() {
        let env = Flipping {
            filled: Cell::new(false),
            calls: Cell::new(0),
        };
        let mut cache = PassabilityCache::new(GridIndex::new(2, 2));
        assert!(cache.can_diffuse_to(CellPos::new(0, 0), 0, &env));
        assert_eq!(env.calls.get(), 1);
    }

    #[test]
    fn test_invalidate_forces_requery() {
        let env = Flipping {
            filled: Cell::new(false),
            calls: Cell::new(0),
        };
        let mut cache = PassabilityCache::new(GridIndex::new(2, 2));
        let cell = CellPos::new(1, 0);
        assert!(cache.can_diffuse_to(cell, 3, &env));
        cache.invalidate();
        assert!(!cache.can_diffuse_to(cell, 3, &env));
        assert_eq!(env.calls.get(), 2);
    }

    #[test]
    fn test_query_failure_degrades_to_sealed() {
        let mut cache = PassabilityCache::new(GridIndex::new(2, 2));
        assert!(!cache.can_diffuse_to(CellPos::new(0, 1), 1, &NotReady));
    }

    #[test]
    fn test_out_of_bounds_is_sealed() {
        let env = Flipping {
            filled: Cell::new(false),
            calls: Cell::new(0),
        };
        let mut cache = PassabilityCache::new(GridIndex::new(2, 2));
        assert!(!cache.can_diffuse_to(CellPos::new(2, 0), 1, &env));
        assert_eq!(env.calls.get(), 0);
    }
}
