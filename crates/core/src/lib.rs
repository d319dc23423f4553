//! Gas Simulation Core Library
//!
//! A tick-amortized cellular diffusion engine for gas and smoke-like
//! substances on a discrete 2D grid. Substances spread toward passable
//! neighbours (biased downwind outdoors), decay faster indoors, and notify
//! the host about occupants standing in them.
//!
//! ## Structure
//!
//! - [`grid`]: cell indexing, host occupancy queries, per-tick passability cache
//! - [`weather`]: wind source contract and direction-weighted diffusion weights
//! - [`engine`]: the bucketed [`DiffusionEngine`] for one substance on one grid
//! - [`simulation`]: shared configuration and the multi-grid [`EngineRegistry`]
//!
//! ## Example
//!
//! ```
//! use gas_sim_core::{
//!     CellMap, CellPos, EngineRegistry, GridId, GridIndex, NullEffects, SimConfig,
//!     SubstanceCatalog, SubstanceDef, SubstanceId, UniformWind,
//! };
//!
//! let (catalog, _rejected) = SubstanceCatalog::from_definitions([SubstanceDef::smoke()]);
//! let mut registry = EngineRegistry::new(catalog, SimConfig::default())?;
//!
//! let grid = GridId::new(0, 0);
//! let map = CellMap::new(GridIndex::new(32, 32));
//! registry.register_grid(grid, map.index());
//!
//! let smoke = SubstanceId::new("smoke");
//! registry.inject(grid, &smoke, CellPos::new(16, 16), 5000.0, 0, &map)?;
//!
//! let wind = UniformWind::from_heading(90.0, 3.0);
//! for tick in 0..60 {
//!     registry.tick_grid(grid, tick, &map, &wind, &mut NullEffects)?;
//! }
//! assert!(registry.engine(grid, &smoke).is_some_and(|engine| engine.len() > 1));
//! # Ok::<(), gas_sim_core::SimError>(())
//! ```

// Core types and utilities
pub mod core_types;
pub mod error;

pub mod engine;
pub mod grid;
pub mod simulation;
pub mod weather;

// Re-export core types
pub use core_types::{
    CellPos, EffectId, MagnitudeCurve, OccupantEffectRule, Particle, Rgba, StorageKind,
    SubstanceCatalog, SubstanceDef, SubstanceId, Vec2,
};
pub use error::{ConfigError, HostQueryError, SimError, SimResult};

// Re-export engine and host-facing types
pub use engine::{
    DiffusionEngine, EffectSink, EngineSnapshot, InjectOutcome, NullEffects, TickContext,
    TickReport, VisualHandle, VisualRequest, BUCKET_COUNT,
};
pub use grid::{CellEnvironment, CellMap, Door, GridId, GridIndex, PassabilityCache};
pub use simulation::{
    EngineFault, EngineRegistry, GridSnapshot, GridTickReport, RegistryStats, SimConfig,
};
pub use weather::{UniformWind, WindSource, WindWeights};
