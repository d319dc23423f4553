//! Grid-facing modules: indexing, host queries and per-cell caches

pub mod cell_map;
pub mod host;
pub mod index;
pub mod passability;

// Re-export main types
pub use cell_map::{CellMap, Door};
pub use host::CellEnvironment;
pub use index::{GridId, GridIndex};
pub use passability::PassabilityCache;
