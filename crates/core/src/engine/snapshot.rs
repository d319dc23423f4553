//! Engine persistence
//!
//! Only authoritative state is saved: the id counter, the bucket cursor and
//! the live particles. Buckets and the passability cache are derived and are
//! rebuilt on restore. Visual throttling stamps are cosmetic and not saved.
//! Particles are listed bucket by bucket in processing order. Particles a
//! panicked tick left outside every bucket follow, ordered by bucket and id.

use super::{bucket_of, DiffusionEngine, BUCKET_COUNT};
use crate::core_types::{Particle, SubstanceDef, SubstanceId};
use crate::error::{SimError, SimResult};
use crate::grid::GridIndex;
use crate::simulation::SimConfig;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Saved state of one engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub substance: SubstanceId,
    pub grid: GridIndex,
    pub next_id: u64,
    pub current_bucket: usize,
    pub particles: Vec<Particle>,
}

impl EngineSnapshot {
    /// Serialize to a JSON string.
    pub fn to_json(&self) -> SimResult<String> {
        serde_json::to_string(self).map_err(|e| SimError::Serialize(e.to_string()))
    }

    /// Parse from a JSON string. The content is validated on restore.
    pub fn from_json(json: &str) -> SimResult<Self> {
        serde_json::from_str(json).map_err(|e| SimError::InvalidSnapshot(e.to_string()))
    }
}

impl DiffusionEngine {
    /// Capture the engine state.
    ///
    /// Queued registrations are not part of the snapshot; take snapshots at
    /// tick boundaries.
    pub fn snapshot(&self) -> EngineSnapshot {
        if !self.pending.is_empty() {
            warn!(
                "{}: snapshot taken with {} queued removal(s) and {} addition(s), they are not saved",
                self.def.id,
                self.pending.pending_removals().len(),
                self.pending.pending_additions().len()
            );
        }
        let saved = |p: &Particle| Particle {
            last_effect_tick: None,
            ..p.clone()
        };

        // Bucket order is processing order; keep it so a restored engine
        // evolves exactly like the original
        let mut listed = FxHashSet::default();
        let mut particles: Vec<Particle> = self
            .buckets
            .iter()
            .flatten()
            .filter(|&&cell_index| listed.insert(cell_index))
            .filter_map(|&cell_index| self.storage.get(cell_index))
            .map(saved)
            .collect();

        let mut unlisted: Vec<&Particle> = self
            .storage
            .iter()
            .filter(|p| !listed.contains(&p.cell_index))
            .collect();
        if !unlisted.is_empty() {
            warn!(
                "{}: {} live particle(s) outside every bucket, saving them with their buckets restored",
                self.def.id,
                unlisted.len()
            );
            unlisted.sort_by_key(|p| (bucket_of(p.id), p.id));
            particles.extend(unlisted.into_iter().map(saved));
        }
        EngineSnapshot {
            substance: self.def.id.clone(),
            grid: self.index,
            next_id: self.next_id,
            current_bucket: self.current_bucket,
            particles,
        }
    }

    /// Rebuild an engine from a snapshot.
    ///
    /// Buckets are reassigned from particle ids and the passability cache
    /// starts cold.
    ///
    /// # Errors
    ///
    /// [`SimError::InvalidSnapshot`] when the snapshot belongs to another
    /// substance or grid size, or lists inconsistent particles.
    pub fn restore(
        def: Arc<SubstanceDef>,
        index: GridIndex,
        config: SimConfig,
        snapshot: EngineSnapshot,
    ) -> SimResult<Self> {
        if snapshot.substance != def.id {
            return Err(SimError::InvalidSnapshot(format!(
                "snapshot is for '{}', not '{}'",
                snapshot.substance, def.id
            )));
        }
        if snapshot.grid != index {
            return Err(SimError::InvalidSnapshot(format!(
                "snapshot grid is {}x{}, expected {}x{}",
                snapshot.grid.width, snapshot.grid.height, index.width, index.height
            )));
        }
        if snapshot.current_bucket >= BUCKET_COUNT {
            return Err(SimError::InvalidSnapshot(format!(
                "bucket cursor {} out of range",
                snapshot.current_bucket
            )));
        }

        let mut engine = Self::new(def, index, config)?;
        engine.next_id = snapshot.next_id;
        engine.current_bucket = snapshot.current_bucket;

        for mut particle in snapshot.particles {
            if index.cell_to_index(particle.position) != Some(particle.cell_index) {
                return Err(SimError::InvalidSnapshot(format!(
                    "particle {} at {} has cell index {}",
                    particle.id, particle.position, particle.cell_index
                )));
            }
            if particle.id >= engine.next_id {
                return Err(SimError::InvalidSnapshot(format!(
                    "particle id {} not below counter {}",
                    particle.id, engine.next_id
                )));
            }
            if !particle.density.is_finite() {
                return Err(SimError::InvalidSnapshot(format!(
                    "particle {} has density {}",
                    particle.id, particle.density
                )));
            }
            particle.density = particle.density.clamp(0.0, engine.def.max_density);
            particle.last_effect_tick = None;

            let (id, cell_index) = (particle.id, particle.cell_index);
            engine.storage.insert(particle).map_err(|p| {
                SimError::InvalidSnapshot(format!("cell {} listed twice", p.position))
            })?;
            engine.buckets[bucket_of(id)].push(cell_index);
        }
        Ok(engine)
    }
}
