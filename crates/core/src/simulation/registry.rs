//! Engine registry: one diffusion engine per (grid, substance) pair
//!
//! Hosts address grids by a small slot number. Repeated lookups go through a
//! direct-mapped cache indexed by that slot; a miss falls back to a hash map.
//! Every cached entry carries the full [`GridId`], so a grid reloaded into
//! the same slot (new generation) never resolves to the stale engines.
//!
//! Ticking is fault-isolated per engine. An engine whose tick returns an
//! error is reported and keeps running; an engine whose tick panics is
//! reported and frozen, and its siblings tick normally. Hosts call
//! [`EngineRegistry::tick_all`] once per world tick, or [`EngineRegistry::tick_grid`]
//! for grids they drive separately. Frozen engines stay frozen across a
//! snapshot and restore.

use super::SimConfig;
use crate::core_types::{CellPos, SubstanceCatalog, SubstanceId};
use crate::engine::{
    DiffusionEngine, EffectSink, EngineSnapshot, InjectOutcome, TickContext, TickReport,
};
use crate::error::{ConfigError, SimError, SimResult};
use crate::grid::{CellEnvironment, GridId, GridIndex};
use crate::weather::WindSource;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::cell::Cell;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// One engine plus its fault state.
struct EngineSlot {
    engine: DiffusionEngine,
    frozen: bool,
}

/// Engines of one grid, in catalog order.
struct GridEngines {
    id: GridId,
    index: GridIndex,
    engines: Vec<EngineSlot>,
}

/// A fault contained at one engine's tick boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineFault {
    pub substance: SubstanceId,
    pub error: SimError,
}

/// Outcome of ticking every engine of one grid.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GridTickReport {
    pub tick: u64,
    /// Summed over engines; the `bucket` field is not meaningful here.
    pub totals: TickReport,
    pub engines_ticked: usize,
    pub frozen_skipped: usize,
    pub faults: Vec<EngineFault>,
}

/// Registry-wide counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub grids: usize,
    pub engines: usize,
    pub frozen: usize,
    pub particles: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

/// Saved state of every engine on one grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSnapshot {
    pub grid: GridId,
    pub index: GridIndex,
    pub engines: Vec<EngineSnapshot>,
    /// Substances whose engine was frozen when the snapshot was taken.
    #[serde(default)]
    pub frozen: Vec<SubstanceId>,
}

impl GridSnapshot {
    pub fn to_json(&self) -> SimResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| SimError::Serialize(e.to_string()))
    }

    pub fn from_json(json: &str) -> SimResult<Self> {
        serde_json::from_str(json).map_err(|e| SimError::InvalidSnapshot(e.to_string()))
    }

    /// Write the snapshot to a JSON file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> SimResult<()> {
        let contents = self.to_json()?;
        fs::write(path, contents).map_err(|e| SimError::Io(e.to_string()))
    }

    /// Read a snapshot from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> SimResult<Self> {
        let contents = fs::read_to_string(path).map_err(|e| SimError::Io(e.to_string()))?;
        Self::from_json(&contents)
    }
}

/// Owns every engine and resolves `(grid, substance)` lookups.
pub struct EngineRegistry {
    catalog: SubstanceCatalog,
    config: SimConfig,

    // Grids by position; removed grids leave a hole that is reused
    grids: Vec<Option<GridEngines>>,
    positions: FxHashMap<GridId, usize>,

    // Direct-mapped cache: `slot % len` -> (grid, position)
    slot_cache: Vec<Cell<Option<(GridId, usize)>>>,
    cache_hits: Cell<u64>,
    cache_misses: Cell<u64>,
}

impl EngineRegistry {
    /// Build an empty registry.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidSetting`] when `config` fails validation; no
    /// engine is ever built from an invalid config.
    pub fn new(catalog: SubstanceCatalog, config: SimConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let slots = config.registry_slots;
        info!(
            "Engine registry: {} substance(s), {} cache slot(s)",
            catalog.len(),
            slots
        );
        Ok(Self {
            catalog,
            config,
            grids: Vec::new(),
            positions: FxHashMap::default(),
            slot_cache: (0..slots).map(|_| Cell::new(None)).collect(),
            cache_hits: Cell::new(0),
            cache_misses: Cell::new(0),
        })
    }

    pub fn catalog(&self) -> &SubstanceCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Substances simulated on every grid, in catalog order.
    pub fn substances(&self) -> impl Iterator<Item = &SubstanceId> {
        self.catalog.iter().map(|def| &def.id)
    }

    pub fn grids(&self) -> impl Iterator<Item = GridId> + '_ {
        self.grids.iter().flatten().map(|grid| grid.id)
    }

    /// Create engines for a grid.
    ///
    /// Registering an id that is already present does nothing. A different
    /// generation in the same slot is a reloaded grid: the old engines are
    /// dropped.
    pub fn register_grid(&mut self, id: GridId, index: GridIndex) {
        if self.lookup(id).is_some() {
            debug!("Grid {} already registered", id);
            return;
        }
        self.drop_slot(id.slot);

        let engines = self
            .catalog
            .iter()
            .enumerate()
            .map(|(i, def)| EngineSlot {
                engine: DiffusionEngine::with_valid_config(
                    Arc::clone(def),
                    index,
                    self.engine_config(i),
                ),
                frozen: false,
            })
            .collect();
        self.insert_grid(GridEngines { id, index, engines });
        info!(
            "Registered grid {} ({}x{}) with {} engine(s)",
            id,
            index.width,
            index.height,
            self.catalog.len()
        );
    }

    /// Drop a grid and its engines. Returns whether it was registered.
    pub fn remove_grid(&mut self, id: GridId) -> bool {
        let Some(position) = self.positions.remove(&id) else {
            return false;
        };
        if let Some(entry) = self.grids.get_mut(position) {
            *entry = None;
        }
        let slot = self.cache_slot(id);
        if slot.get().is_some_and(|(cached, _)| cached == id) {
            slot.set(None);
        }
        info!("Removed grid {}", id);
        true
    }

    pub fn engine(&self, grid: GridId, substance: &SubstanceId) -> Option<&DiffusionEngine> {
        let engine_index = self.catalog.position(substance)?;
        let position = self.lookup(grid)?;
        let entry = self.grids.get(position)?.as_ref()?;
        entry.engines.get(engine_index).map(|slot| &slot.engine)
    }

    pub fn engine_mut(
        &mut self,
        grid: GridId,
        substance: &SubstanceId,
    ) -> Option<&mut DiffusionEngine> {
        let engine_index = self.catalog.position(substance)?;
        let position = self.lookup(grid)?;
        let entry = self.grids.get_mut(position)?.as_mut()?;
        entry.engines.get_mut(engine_index).map(|slot| &mut slot.engine)
    }

    /// Whether the engine was frozen after a panic.
    pub fn is_frozen(&self, grid: GridId, substance: &SubstanceId) -> bool {
        let Some(engine_index) = self.catalog.position(substance) else {
            return false;
        };
        self.lookup(grid)
            .and_then(|position| self.grids.get(position)?.as_ref())
            .and_then(|entry| entry.engines.get(engine_index))
            .is_some_and(|slot| slot.frozen)
    }

    /// Inject density through the registry.
    pub fn inject(
        &mut self,
        grid: GridId,
        substance: &SubstanceId,
        cell: CellPos,
        density: f32,
        tick: u64,
        cells: &dyn CellEnvironment,
    ) -> SimResult<InjectOutcome> {
        if self.catalog.position(substance).is_none() {
            return Err(SimError::UnknownSubstance(substance.to_string()));
        }
        self.engine_mut(grid, substance)
            .ok_or_else(|| SimError::UnknownGrid(grid.to_string()))?
            .inject(cell, density, tick, cells)
    }

    /// Tick every engine of one grid.
    ///
    /// Per-engine faults are logged and collected in the report; they never
    /// stop sibling engines.
    ///
    /// # Errors
    ///
    /// [`SimError::UnknownGrid`] when the grid is not registered.
    pub fn tick_grid(
        &mut self,
        grid: GridId,
        tick: u64,
        cells: &dyn CellEnvironment,
        wind: &dyn WindSource,
        effects: &mut dyn EffectSink,
    ) -> SimResult<GridTickReport> {
        let entry = self
            .lookup(grid)
            .and_then(|position| self.grids.get_mut(position)?.as_mut())
            .ok_or_else(|| SimError::UnknownGrid(grid.to_string()))?;

        let mut report = GridTickReport {
            tick,
            ..GridTickReport::default()
        };

        for slot in &mut entry.engines {
            if slot.frozen {
                report.frozen_skipped += 1;
                continue;
            }
            let substance = slot.engine.substance().clone();

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                let mut ctx = TickContext {
                    tick,
                    cells,
                    wind,
                    effects: &mut *effects,
                };
                slot.engine.tick(&mut ctx)
            }));

            match outcome {
                Ok(Ok(engine_report)) => {
                    report.totals.merge(&engine_report);
                    report.engines_ticked += 1;
                }
                Ok(Err(err)) => {
                    error!(substance = %substance, grid = %grid, tick, "Engine fault: {}", err);
                    report.engines_ticked += 1;
                    report.faults.push(EngineFault {
                        substance,
                        error: err,
                    });
                }
                Err(payload) => {
                    let message = panic_message(&*payload);
                    error!(
                        substance = %substance,
                        grid = %grid,
                        tick,
                        "Engine panicked, freezing it: {}",
                        message
                    );
                    slot.frozen = true;
                    report.faults.push(EngineFault {
                        substance,
                        error: SimError::Panicked(message),
                    });
                }
            }
        }
        Ok(report)
    }

    /// Tick every registered grid once.
    ///
    /// `cells_for` supplies each grid's environment; grids it has none for
    /// are skipped this tick. Engine faults are isolated exactly as in
    /// [`tick_grid`](Self::tick_grid) and reported per grid.
    pub fn tick_all<'c, F>(
        &mut self,
        tick: u64,
        mut cells_for: F,
        wind: &dyn WindSource,
        effects: &mut dyn EffectSink,
    ) -> Vec<(GridId, GridTickReport)>
    where
        F: FnMut(GridId) -> Option<&'c dyn CellEnvironment>,
    {
        let ids: Vec<GridId> = self.grids().collect();
        let mut reports = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(cells) = cells_for(id) else {
                debug!("Grid {} has no environment at tick {}, skipping", id, tick);
                continue;
            };
            match self.tick_grid(id, tick, cells, wind, &mut *effects) {
                Ok(report) => reports.push((id, report)),
                Err(err) => warn!("Grid {} not ticked: {}", id, err),
            }
        }
        reports
    }

    /// Capture every engine of a grid, including which ones are frozen.
    pub fn snapshot_grid(&self, grid: GridId) -> SimResult<GridSnapshot> {
        let entry = self
            .lookup(grid)
            .and_then(|position| self.grids.get(position)?.as_ref())
            .ok_or_else(|| SimError::UnknownGrid(grid.to_string()))?;
        Ok(GridSnapshot {
            grid: entry.id,
            index: entry.index,
            engines: entry
                .engines
                .iter()
                .map(|slot| slot.engine.snapshot())
                .collect(),
            frozen: entry
                .engines
                .iter()
                .filter(|slot| slot.frozen)
                .map(|slot| slot.engine.substance().clone())
                .collect(),
        })
    }

    /// Rebuild a grid's engines from a snapshot, registering it as `grid`.
    ///
    /// Substances missing from the snapshot start empty; snapshot entries for
    /// substances no longer in the catalog are skipped with a warning. On
    /// error the registry is left unchanged.
    pub fn restore_grid(&mut self, grid: GridId, snapshot: GridSnapshot) -> SimResult<()> {
        let mut saved: FxHashMap<SubstanceId, EngineSnapshot> = FxHashMap::default();
        for engine in snapshot.engines {
            if self.catalog.get(&engine.substance).is_none() {
                warn!(
                    "Snapshot of grid {} holds unknown substance '{}', skipping it",
                    snapshot.grid, engine.substance
                );
                continue;
            }
            if let Some(duplicate) = saved.insert(engine.substance.clone(), engine) {
                return Err(SimError::InvalidSnapshot(format!(
                    "substance '{}' saved twice",
                    duplicate.substance
                )));
            }
        }

        let mut engines = Vec::with_capacity(self.catalog.len());
        for (i, def) in self.catalog.iter().enumerate() {
            let config = self.engine_config(i);
            let engine = match saved.remove(&def.id) {
                Some(engine_snapshot) => {
                    DiffusionEngine::restore(Arc::clone(def), snapshot.index, config, engine_snapshot)?
                }
                None => DiffusionEngine::with_valid_config(Arc::clone(def), snapshot.index, config),
            };
            let frozen = snapshot.frozen.contains(&def.id);
            if frozen {
                warn!("Restoring grid {}: '{}' engine stays frozen", grid, def.id);
            }
            engines.push(EngineSlot { engine, frozen });
        }

        self.drop_slot(grid.slot);
        self.insert_grid(GridEngines {
            id: grid,
            index: snapshot.index,
            engines,
        });
        info!("Restored grid {} from snapshot of {}", grid, snapshot.grid);
        Ok(())
    }

    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats {
            cache_hits: self.cache_hits.get(),
            cache_misses: self.cache_misses.get(),
            ..RegistryStats::default()
        };
        for entry in self.grids.iter().flatten() {
            stats.grids += 1;
            for slot in &entry.engines {
                stats.engines += 1;
                stats.particles += slot.engine.len();
                if slot.frozen {
                    stats.frozen += 1;
                }
            }
        }
        stats
    }

    // ========================================================================
    // Lookup internals
    // ========================================================================

    fn cache_slot(&self, id: GridId) -> &Cell<Option<(GridId, usize)>> {
        &self.slot_cache[usize::from(id.slot) % self.slot_cache.len()]
    }

    fn lookup(&self, id: GridId) -> Option<usize> {
        let slot = self.cache_slot(id);
        if let Some((cached, position)) = slot.get() {
            let live = self
                .grids
                .get(position)
                .and_then(Option::as_ref)
                .is_some_and(|entry| entry.id == id);
            if cached == id && live {
                self.cache_hits.set(self.cache_hits.get() + 1);
                return Some(position);
            }
        }
        self.cache_misses.set(self.cache_misses.get() + 1);
        let position = *self.positions.get(&id)?;
        slot.set(Some((id, position)));
        Some(position)
    }

    fn insert_grid(&mut self, entry: GridEngines) {
        let id = entry.id;
        let position = match self.grids.iter().position(Option::is_none) {
            Some(hole) => {
                self.grids[hole] = Some(entry);
                hole
            }
            None => {
                self.grids.push(Some(entry));
                self.grids.len() - 1
            }
        };
        self.positions.insert(id, position);
        self.cache_slot(id).set(Some((id, position)));
    }

    /// Remove any grid occupying `slot`, whatever its generation.
    fn drop_slot(&mut self, slot: u16) {
        let stale: Vec<GridId> = self
            .positions
            .keys()
            .filter(|id| id.slot == slot)
            .copied()
            .collect();
        for id in stale {
            info!("Grid slot {} reloaded, dropping generation {}", slot, id.generation);
            self.remove_grid(id);
        }
    }

    /// Per-engine config; the cosmetic seed differs per substance.
    fn engine_config(&self, engine_index: usize) -> SimConfig {
        let seed = self.config.seed.wrapping_add(engine_index as u64);
        self.config.clone().with_seed(seed)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::{EffectId, MagnitudeCurve, OccupantEffectRule, SubstanceDef};
    use crate::engine::NullEffects;
    use crate::grid::CellMap;
    use crate::weather::UniformWind;
    use approx::assert_relative_eq;

    fn catalog() -> SubstanceCatalog {
        let (catalog, errors) = SubstanceCatalog::from_definitions([
            SubstanceDef::smoke(),
            SubstanceDef::new("steam", 400.0),
        ]);
        assert!(errors.is_empty());
        catalog
    }

    fn smoke() -> SubstanceId {
        SubstanceId::new("smoke")
    }

    #[test]
    fn test_lookup_is_idempotent() {
        let mut registry = EngineRegistry::new(catalog(), SimConfig::default()).unwrap();
        let grid = GridId::new(0, 1);
        registry.register_grid(grid, GridIndex::new(8, 8));
        let misses = registry.stats().cache_misses;

        let first = registry.engine(grid, &smoke()).unwrap() as *const DiffusionEngine;
        let second = registry.engine(grid, &smoke()).unwrap() as *const DiffusionEngine;
        assert!(std::ptr::eq(first, second));

        let stats = registry.stats();
        assert_eq!(stats.grids, 1);
        assert_eq!(stats.engines, 2);
        // Both lookups served from the slot cache
        assert_eq!(stats.cache_misses, misses);
        assert_eq!(stats.cache_hits, 2);
    }

    #[test]
    fn test_register_twice_keeps_state() {
        let mut registry = EngineRegistry::new(catalog(), SimConfig::default()).unwrap();
        let grid = GridId::new(3, 0);
        let map = CellMap::new(GridIndex::new(8, 8));
        registry.register_grid(grid, map.index());
        registry
            .inject(grid, &smoke(), CellPos::new(2, 2), 500.0, 0, &map)
            .unwrap();

        registry.register_grid(grid, map.index());
        assert_eq!(registry.engine(grid, &smoke()).unwrap().len(), 1);
    }

    #[test]
    fn test_reloaded_grid_replaces_stale_generation() {
        let mut registry = EngineRegistry::new(catalog(), SimConfig::default()).unwrap();
        let old = GridId::new(2, 1);
        let new = GridId::new(2, 2);
        let map = CellMap::new(GridIndex::new(8, 8));

        registry.register_grid(old, map.index());
        registry
            .inject(old, &smoke(), CellPos::new(1, 1), 500.0, 0, &map)
            .unwrap();
        registry.register_grid(new, map.index());

        assert!(registry.engine(old, &smoke()).is_none());
        assert!(registry.engine(new, &smoke()).unwrap().is_empty());
        assert_eq!(registry.grids().collect::<Vec<_>>(), vec![new]);
    }

    #[test]
    fn test_colliding_slots_resolve_correctly() {
        let config = SimConfig::default().with_registry_slots(2);
        let mut registry = EngineRegistry::new(catalog(), config).unwrap();
        let map = CellMap::new(GridIndex::new(4, 4));
        let grids = [GridId::new(0, 0), GridId::new(2, 0), GridId::new(4, 0)];
        for (i, &grid) in grids.iter().enumerate() {
            registry.register_grid(grid, map.index());
            registry
                .inject(grid, &smoke(), CellPos::new(i as i32, 0), 100.0, 0, &map)
                .unwrap();
        }

        for (i, &grid) in grids.iter().enumerate() {
            let engine = registry.engine(grid, &smoke()).unwrap();
            assert_eq!(engine.density_at(CellPos::new(i as i32, 0)), 100.0);
            assert_eq!(engine.len(), 1);
        }
        assert!(registry.stats().cache_misses > 0);
    }

    #[test]
    fn test_remove_grid() {
        let mut registry = EngineRegistry::new(catalog(), SimConfig::default()).unwrap();
        let grid = GridId::new(1, 0);
        registry.register_grid(grid, GridIndex::new(4, 4));
        assert!(registry.remove_grid(grid));
        assert!(!registry.remove_grid(grid));
        assert!(registry.engine(grid, &smoke()).is_none());
        assert!(matches!(
            registry.tick_grid(grid, 0, &CellMap::new(GridIndex::new(4, 4)), &UniformWind::calm(), &mut NullEffects),
            Err(SimError::UnknownGrid(_))
        ));
    }

    #[test]
    fn test_unknown_substance_inject() {
        let mut registry = EngineRegistry::new(catalog(), SimConfig::default()).unwrap();
        let grid = GridId::new(0, 0);
        let map = CellMap::new(GridIndex::new(4, 4));
        registry.register_grid(grid, map.index());
        let err = registry
            .inject(grid, &SubstanceId::new("mustard"), CellPos::new(0, 0), 10.0, 0, &map)
            .unwrap_err();
        assert!(matches!(err, SimError::UnknownSubstance(_)));
    }

    /// Sink that panics for one substance.
    struct Tripwire;

    impl EffectSink for Tripwire {
        fn apply_occupant_effect(
            &mut self,
            _cell: CellPos,
            substance: &SubstanceId,
            _density: f32,
            _effect: &EffectId,
            _magnitude: f32,
        ) {
            assert!(substance.as_str() != "volatile", "sink rejected volatile");
        }
    }

    /// "volatile" always has an effect to dispatch, so `Tripwire` panics on it.
    fn volatile_catalog() -> SubstanceCatalog {
        let volatile = SubstanceDef {
            occupant_effects: vec![OccupantEffectRule {
                effect: EffectId("burn".to_string()),
                curve: MagnitudeCurve::Constant { magnitude: 1.0 },
            }],
            min_effective_density: 0.0,
            ..SubstanceDef::new("volatile", 1000.0)
        };
        let (catalog, _) =
            SubstanceCatalog::from_definitions([volatile, SubstanceDef::new("steam", 1000.0)]);
        catalog
    }

    #[test]
    fn test_panicking_engine_is_frozen_and_isolated() {
        let mut registry = EngineRegistry::new(volatile_catalog(), SimConfig::default()).unwrap();
        let grid = GridId::new(0, 0);
        let map = CellMap::new(GridIndex::new(6, 6));
        registry.register_grid(grid, map.index());
        for name in ["volatile", "steam"] {
            registry
                .inject(grid, &SubstanceId::new(name), CellPos::new(3, 3), 600.0, 0, &map)
                .unwrap();
        }

        let wind = UniformWind::calm();
        let report = registry
            .tick_grid(grid, 0, &map, &wind, &mut Tripwire)
            .unwrap();
        assert_eq!(report.faults.len(), 1);
        assert_eq!(report.faults[0].substance, SubstanceId::new("volatile"));
        assert!(matches!(report.faults[0].error, SimError::Panicked(_)));
        assert_eq!(report.engines_ticked, 1);
        assert!(registry.is_frozen(grid, &SubstanceId::new("volatile")));

        // Steam diffused into all 8 neighbours despite its sibling failing
        assert_eq!(registry.engine(grid, &SubstanceId::new("steam")).unwrap().len(), 9);

        let report = registry
            .tick_grid(grid, 1, &map, &wind, &mut Tripwire)
            .unwrap();
        assert_eq!(report.frozen_skipped, 1);
        assert!(report.faults.is_empty());
        assert_eq!(registry.stats().frozen, 1);
    }

    #[test]
    fn test_engine_error_is_reported_not_frozen() {
        let mut registry = EngineRegistry::new(catalog(), SimConfig::default()).unwrap();
        let grid = GridId::new(0, 0);
        let map = CellMap::new(GridIndex::new(6, 6));
        registry.register_grid(grid, map.index());
        registry
            .inject(grid, &smoke(), CellPos::new(5, 5), 500.0, 0, &map)
            .unwrap();
        // Second registration into the same cell is an invariant violation
        registry
            .engine_mut(grid, &smoke())
            .unwrap()
            .register(CellPos::new(5, 5), 50.0);

        let report = registry
            .tick_grid(grid, 0, &map, &UniformWind::calm(), &mut NullEffects)
            .unwrap();
        assert_eq!(report.faults.len(), 1);
        assert!(matches!(
            report.faults[0].error,
            SimError::CellOccupied { .. }
        ));
        assert!(!registry.is_frozen(grid, &smoke()));
    }

    #[test]
    fn test_snapshot_and_restore_grid() {
        let mut registry = EngineRegistry::new(catalog(), SimConfig::default()).unwrap();
        let grid = GridId::new(5, 1);
        let map = CellMap::new(GridIndex::new(10, 10));
        registry.register_grid(grid, map.index());
        registry
            .inject(grid, &smoke(), CellPos::new(4, 4), 3000.0, 0, &map)
            .unwrap();
        for tick in 0..3 {
            registry
                .tick_grid(grid, tick, &map, &UniformWind::calm(), &mut NullEffects)
                .unwrap();
        }
        let before = registry.engine(grid, &smoke()).unwrap().snapshot();

        let json = registry.snapshot_grid(grid).unwrap().to_json().unwrap();
        let reloaded = GridId::new(5, 2);
        registry
            .restore_grid(reloaded, GridSnapshot::from_json(&json).unwrap())
            .unwrap();

        assert!(registry.engine(grid, &smoke()).is_none());
        let after = registry.engine(reloaded, &smoke()).unwrap();
        assert_eq!(after.snapshot(), before);
        after.check_invariants().unwrap();
    }

    #[test]
    fn test_restore_skips_unknown_substances() {
        let mut registry = EngineRegistry::new(catalog(), SimConfig::default()).unwrap();
        let snapshot = GridSnapshot {
            grid: GridId::new(0, 0),
            index: GridIndex::new(4, 4),
            engines: vec![EngineSnapshot {
                substance: SubstanceId::new("retired"),
                grid: GridIndex::new(4, 4),
                next_id: 0,
                current_bucket: 0,
                particles: Vec::new(),
            }],
            frozen: Vec::new(),
        };
        registry.restore_grid(GridId::new(0, 0), snapshot).unwrap();
        assert_eq!(registry.stats().engines, 2);
    }

    #[test]
    fn test_frozen_engine_snapshot_keeps_every_particle() {
        let mut registry = EngineRegistry::new(volatile_catalog(), SimConfig::default()).unwrap();
        let volatile = SubstanceId::new("volatile");
        let grid = GridId::new(0, 0);
        let map = CellMap::new(GridIndex::new(6, 6));
        registry.register_grid(grid, map.index());
        registry
            .inject(grid, &volatile, CellPos::new(3, 3), 600.0, 0, &map)
            .unwrap();

        // Panics after seeding the neighbours, with the source's bucket taken out
        registry
            .tick_grid(grid, 0, &map, &UniformWind::calm(), &mut Tripwire)
            .unwrap();
        assert!(registry.is_frozen(grid, &volatile));
        let engine = registry.engine(grid, &volatile).unwrap();
        let (live, mass) = (engine.len(), engine.total_density());
        assert_eq!(live, 9);

        let snapshot = registry.snapshot_grid(grid).unwrap();
        assert_eq!(snapshot.frozen, vec![volatile.clone()]);
        assert_eq!(snapshot.engines[0].particles.len(), live);

        let reloaded = GridId::new(0, 1);
        let json = snapshot.to_json().unwrap();
        registry
            .restore_grid(reloaded, GridSnapshot::from_json(&json).unwrap())
            .unwrap();

        assert!(registry.is_frozen(reloaded, &volatile));
        assert!(!registry.is_frozen(reloaded, &SubstanceId::new("steam")));
        let after = registry.engine(reloaded, &volatile).unwrap();
        assert_eq!(after.len(), live);
        assert_relative_eq!(after.total_density(), mass, max_relative = 1e-5);
        after.check_invariants().unwrap();
    }

    #[test]
    fn test_invalid_config_builds_no_registry() {
        let err = EngineRegistry::new(catalog(), SimConfig::default().with_ticks_per_second(0.0))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            ConfigError::InvalidSetting {
                field: "ticks_per_second",
                ..
            }
        ));
        assert!(EngineRegistry::new(catalog(), SimConfig::default().with_registry_slots(0)).is_err());
    }

    #[test]
    fn test_tick_all_covers_every_grid() {
        let mut registry = EngineRegistry::new(volatile_catalog(), SimConfig::default()).unwrap();
        let (volatile, steam) = (SubstanceId::new("volatile"), SubstanceId::new("steam"));
        let (a, b, unmapped) = (GridId::new(0, 0), GridId::new(1, 0), GridId::new(2, 0));
        let small = CellMap::new(GridIndex::new(6, 6));
        let large = CellMap::new(GridIndex::new(12, 12));
        registry.register_grid(a, small.index());
        registry.register_grid(b, large.index());
        registry.register_grid(unmapped, small.index());
        for (grid, map) in [(a, &small), (b, &large), (unmapped, &small)] {
            registry
                .inject(grid, &steam, CellPos::new(3, 3), 600.0, 0, map)
                .unwrap();
        }
        registry
            .inject(a, &volatile, CellPos::new(2, 2), 600.0, 0, &small)
            .unwrap();

        let maps = [(a, &small), (b, &large)];
        let reports = registry.tick_all(
            0,
            |id| {
                maps.iter()
                    .find(|(grid, _)| *grid == id)
                    .map(|&(_, map)| map as &dyn CellEnvironment)
            },
            &UniformWind::calm(),
            &mut Tripwire,
        );

        assert_eq!(
            reports.iter().map(|(grid, _)| *grid).collect::<Vec<_>>(),
            vec![a, b]
        );
        // Grid a's volatile engine panicked; its steam and grid b still ran
        assert_eq!(reports[0].1.faults.len(), 1);
        assert!(reports[1].1.faults.is_empty());
        assert!(registry.is_frozen(a, &volatile));
        assert_eq!(registry.engine(a, &steam).unwrap().len(), 9);
        assert_eq!(registry.engine(b, &steam).unwrap().len(), 9);
        assert_eq!(registry.engine(unmapped, &steam).unwrap().len(), 1);
    }

}
