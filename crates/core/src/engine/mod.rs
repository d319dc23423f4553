//! Diffusion engine: one substance over one grid
//!
//! The engine owns every live particle of its substance and advances them in
//! round-robin buckets. Particle `id % BUCKET_COUNT` picks its bucket, and
//! each host tick processes exactly one bucket, so a population of N costs
//! about N / 30 particle updates per tick instead of N.
//!
//! # Tick passes
//!
//! 1. Expiry: particles in sealed cells or at the near-zero floor are removed
//!    (or, with a grace period, linger and count down).
//! 2. Decay: roofed or unroofed rate, accelerated outdoors by strong wind.
//! 3. Diffusion: exchange with occupied neighbours, seed empty ones.
//! 4. Effects: occupant rules and throttled visuals for processed cells.
//! 5. Deferred registrations are applied, removals first.
//!
//! Transfers out of a particle are computed from its density at the start of
//! its own processing. Two particles exchanging in the same tick therefore
//! see slightly different mid-tick states; that approximation is accepted.

pub mod diffusion;
pub mod effects;
pub mod pending;
pub mod snapshot;
pub mod storage;

pub use effects::{EffectSink, NullEffects, VisualHandle, VisualRequest};
pub use pending::{Deregistration, PendingChanges, Registration};
pub use snapshot::EngineSnapshot;
pub use storage::{create_particle_storage, DenseStorage, ParticleStorage, SparseStorage};

use crate::core_types::{CellPos, Particle, SubstanceDef, SubstanceId, Vec2};
use crate::error::{ConfigError, SimError, SimResult};
use crate::grid::{CellEnvironment, GridIndex, PassabilityCache};
use crate::simulation::SimConfig;
use crate::weather::{WindSource, WindWeights, NEIGHBOR_OFFSETS};
use diffusion::{decay_amount, empty_cell_seed, pair_exchange};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Number of round-robin buckets.
pub const BUCKET_COUNT: usize = 30;

#[inline]
pub(crate) fn bucket_of(id: u64) -> usize {
    (id % BUCKET_COUNT as u64) as usize
}

/// Host collaborators for one engine tick.
pub struct TickContext<'a> {
    /// Host tick number; stamps the passability cache.
    pub tick: u64,
    pub cells: &'a dyn CellEnvironment,
    pub wind: &'a dyn WindSource,
    pub effects: &'a mut dyn EffectSink,
}

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub bucket: usize,
    pub processed: usize,
    pub created: usize,
    pub destroyed: usize,
    pub effects_applied: usize,
    pub visuals_spawned: usize,
}

impl TickReport {
    /// Accumulate counts from another report.
    pub fn merge(&mut self, other: &TickReport) {
        self.processed += other.processed;
        self.created += other.created;
        self.destroyed += other.destroyed;
        self.effects_applied += other.effects_applied;
        self.visuals_spawned += other.visuals_spawned;
    }
}

/// Result of [`DiffusionEngine::inject`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectOutcome {
    /// Density was added to an existing particle.
    Added,
    /// A new particle was created.
    Created,
    /// Nothing changed (sealed, out of bounds, or below the creation floor).
    Ignored,
}

/// Processed particle carried between passes: cell index, roofed, wind strength.
type Visit = (usize, bool, f32);

/// Simulates one substance over one grid.
pub struct DiffusionEngine {
    def: Arc<SubstanceDef>,
    config: SimConfig,
    index: GridIndex,

    storage: Box<dyn ParticleStorage>,
    /// Cell indices per bucket. A cell index is a stable handle until a host
    /// relocation moves the particle; it then rejoins the same bucket under
    /// its new cell index.
    buckets: [Vec<usize>; BUCKET_COUNT],
    current_bucket: usize,
    next_id: u64,

    wind: WindWeights,
    passability: PassabilityCache,
    pending: PendingChanges,
    rng: StdRng,
}

impl DiffusionEngine {
    /// Create an empty engine for `def` over a grid of `index` dimensions.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidSetting`] when `config` fails validation.
    pub fn new(
        def: Arc<SubstanceDef>,
        index: GridIndex,
        config: SimConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::with_valid_config(def, index, config))
    }

    /// Create an engine from a config the caller has already validated.
    pub(crate) fn with_valid_config(
        def: Arc<SubstanceDef>,
        index: GridIndex,
        config: SimConfig,
    ) -> Self {
        let storage = create_particle_storage(def.storage, index.cell_count());
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            def,
            config,
            index,
            storage,
            buckets: std::array::from_fn(|_| Vec::new()),
            current_bucket: 0,
            next_id: 0,
            wind: WindWeights::new(),
            passability: PassabilityCache::new(index),
            pending: PendingChanges::new(),
            rng,
        }
    }

    pub fn def(&self) -> &Arc<SubstanceDef> {
        &self.def
    }

    pub fn substance(&self) -> &SubstanceId {
        &self.def.id
    }

    pub fn grid_index(&self) -> GridIndex {
        self.index
    }

    pub fn current_bucket(&self) -> usize {
        self.current_bucket
    }

    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    pub fn particle_at(&self, cell: CellPos) -> Option<&Particle> {
        self.storage.get(self.index.cell_to_index(cell)?)
    }

    /// Density at `cell`, 0 when empty or out of bounds.
    pub fn density_at(&self, cell: CellPos) -> f32 {
        self.particle_at(cell).map_or(0.0, |p| p.density)
    }

    pub fn particles(&self) -> impl Iterator<Item = &Particle> + '_ {
        self.storage.iter()
    }

    pub fn total_density(&self) -> f32 {
        self.storage.iter().map(|p| p.density).sum()
    }

    /// Cell indices assigned to bucket `bucket`.
    pub fn bucket(&self, bucket: usize) -> &[usize] {
        self.buckets.get(bucket).map_or(&[], Vec::as_slice)
    }

    pub fn bucket_sizes(&self) -> [usize; BUCKET_COUNT] {
        std::array::from_fn(|i| self.buckets[i].len())
    }

    pub fn pending(&self) -> &PendingChanges {
        &self.pending
    }

    /// Memoized passability of `cell` during `tick`.
    pub fn can_diffuse_to(&mut self, cell: CellPos, tick: u64, cells: &dyn CellEnvironment) -> bool {
        self.passability.can_diffuse_to(cell, tick, cells)
    }

    /// Drop memoized passability so a map edit is seen within the current tick.
    pub fn invalidate_passability(&mut self) {
        self.passability.invalidate();
    }

    /// Pump density into a cell.
    ///
    /// An existing particle absorbs the amount (clamped to max density) even
    /// if its cell has since been sealed. An empty cell only receives a new
    /// particle if it is diffusable and `density` clears the creation floor.
    pub fn inject(
        &mut self,
        cell: CellPos,
        density: f32,
        tick: u64,
        cells: &dyn CellEnvironment,
    ) -> SimResult<InjectOutcome> {
        let Some(cell_index) = self.index.cell_to_index(cell) else {
            return Ok(InjectOutcome::Ignored);
        };
        if !density.is_finite() {
            return Ok(InjectOutcome::Ignored);
        }
        if let Some(particle) = self.storage.get_mut(cell_index) {
            particle.adjust_density(density, self.def.max_density);
            return Ok(InjectOutcome::Added);
        }
        if !self.passability.can_diffuse_to(cell, tick, cells) {
            return Ok(InjectOutcome::Ignored);
        }
        Ok(match self.create_at(cell, cell_index, density)? {
            Some(_) => InjectOutcome::Created,
            None => InjectOutcome::Ignored,
        })
    }

    /// Queue a host-spawned cloud for insertion at the end of the next tick.
    pub fn register(&mut self, cell: CellPos, density: f32) {
        self.pending.submit_addition(Registration { cell, density });
    }

    /// Queue removal of the particle at `cell` at the end of the next tick.
    pub fn deregister(&mut self, cell: CellPos) {
        self.pending.submit_removal(Deregistration {
            cell,
            relocate_to: None,
        });
    }

    /// Queue a move of the particle at `from` to `to`, keeping its id and density.
    pub fn notify_position_changed(&mut self, from: CellPos, to: CellPos) {
        self.pending.submit_removal(Deregistration {
            cell: from,
            relocate_to: Some(to),
        });
    }

    /// Advance the current bucket by one tick.
    ///
    /// Faults found along the way (bucket desynchronization, occupied cells
    /// on registration) do not stop the tick; the bucket still advances and
    /// the first fault is returned afterwards.
    pub fn tick(&mut self, ctx: &mut TickContext<'_>) -> SimResult<TickReport> {
        if self
            .wind
            .is_stale(ctx.tick, self.config.wind_update_interval)
        {
            self.wind.recompute(ctx.wind.wind_direction(), ctx.tick);
        }

        let bucket_index = self.current_bucket;
        let mut report = TickReport {
            bucket: bucket_index,
            ..TickReport::default()
        };
        let mut fault = None;

        // New particles created during this tick may land in the bucket being
        // processed; they go into the emptied slot and are merged back below.
        let bucket = std::mem::take(&mut self.buckets[bucket_index]);
        report.processed = bucket.len();

        let (lingering, active) = self.expire(bucket_index, bucket, ctx, &mut report, &mut fault);
        let visits = self.decay(active, ctx, &mut report);
        self.diffuse(&visits, ctx, &mut report, &mut fault);
        self.dispatch_effects(&visits, ctx, &mut report);

        let created_here = std::mem::take(&mut self.buckets[bucket_index]);
        let mut kept = lingering;
        kept.extend(visits.iter().map(|&(cell_index, _, _)| cell_index));
        kept.extend(created_here);
        self.buckets[bucket_index] = kept;

        if let Err(err) = self.apply_pending(&mut report) {
            fault.get_or_insert(err);
        }

        self.current_bucket = (bucket_index + 1) % BUCKET_COUNT;

        debug!(
            "{} tick {}: bucket {} processed={} created={} destroyed={} live={}",
            self.def.id,
            ctx.tick,
            bucket_index,
            report.processed,
            report.created,
            report.destroyed,
            self.storage.len()
        );

        match fault {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    /// Expiry pass. Returns `(lingering, active)` cell indices.
    fn expire(
        &mut self,
        bucket_index: usize,
        bucket: Vec<usize>,
        ctx: &TickContext<'_>,
        report: &mut TickReport,
        fault: &mut Option<SimError>,
    ) -> (Vec<usize>, Vec<usize>) {
        let mut lingering = Vec::new();
        let mut active = Vec::with_capacity(bucket.len());
        let floor = self.def.expiry_density;
        let grace_ticks = self.def.grace_ticks;

        for cell_index in bucket {
            let Some(particle) = self.storage.get(cell_index) else {
                fault.get_or_insert(SimError::BucketDesync(format!(
                    "bucket {bucket_index} lists empty cell index {cell_index}"
                )));
                continue;
            };
            let (position, density, grace_remaining) =
                (particle.position, particle.density, particle.grace_remaining);

            let sealed = !self.passability.can_diffuse_to(position, ctx.tick, ctx.cells);
            let exhausted = density <= floor && (grace_ticks == 0 || grace_remaining == 0);
            if sealed || exhausted {
                self.storage.remove(cell_index);
                report.destroyed += 1;
                continue;
            }

            let Some(particle) = self.storage.get_mut(cell_index) else {
                continue;
            };
            if density <= floor {
                particle.grace_remaining -= 1;
                lingering.push(cell_index);
            } else {
                particle.grace_remaining = grace_ticks;
                active.push(cell_index);
            }
        }
        (lingering, active)
    }

    /// Decay pass. Particles decaying to the floor without a grace period are
    /// destroyed immediately.
    fn decay(&mut self, active: Vec<usize>, ctx: &TickContext<'_>, report: &mut TickReport) -> Vec<Visit> {
        let seconds_per_visit = BUCKET_COUNT as f32 / self.config.ticks_per_second;
        let max = self.def.max_density;
        let mut visits = Vec::with_capacity(active.len());

        for cell_index in active {
            let Some(particle) = self.storage.get_mut(cell_index) else {
                continue;
            };
            let roofed = ctx.cells.is_roofed(particle.position);
            let strength = if roofed {
                0.0
            } else {
                ctx.wind.wind_strength_at(particle.position)
            };
            let amount = decay_amount(
                self.def.decay_rate_roofed,
                self.def.decay_rate_unroofed,
                roofed,
                strength,
                self.config.wind_decay_threshold,
                seconds_per_visit,
            );
            particle.adjust_density(-amount, max);

            if particle.density <= self.def.expiry_density && self.def.grace_ticks == 0 {
                self.storage.remove(cell_index);
                report.destroyed += 1;
                continue;
            }
            visits.push((cell_index, roofed, strength));
        }
        visits
    }

    /// Diffusion pass over the surviving particles.
    fn diffuse(
        &mut self,
        visits: &[Visit],
        ctx: &TickContext<'_>,
        report: &mut TickReport,
        fault: &mut Option<SimError>,
    ) {
        for &(cell_index, roofed, strength) in visits {
            let Some(particle) = self.storage.get(cell_index) else {
                continue;
            };
            let position = particle.position;
            let start = particle.density;
            let affected = self.def.wind_sensitive && !roofed;
            let weights =
                self.wind
                    .weights_at(affected, strength, self.config.wind_diffusion_threshold);

            for (offset, weight) in NEIGHBOR_OFFSETS.iter().zip(weights) {
                let target = position + *offset;
                let Some(target_index) = self.index.cell_to_index(target) else {
                    continue;
                };
                if !self.passability.can_diffuse_to(target, ctx.tick, ctx.cells) {
                    continue;
                }
                let own_now = self.storage.get(cell_index).map_or(0.0, |p| p.density);

                if let Some(other) = self.storage.get(target_index) {
                    let delta = pair_exchange(start, own_now, other.density, weight);
                    self.transfer(cell_index, target_index, delta);
                    continue;
                }

                let amount = empty_cell_seed(start, own_now, weight);
                match self.create_at(target, target_index, amount) {
                    Ok(Some(_)) => {
                        report.created += 1;
                        if let Some(particle) = self.storage.get_mut(cell_index) {
                            particle.adjust_density(-amount, self.def.max_density);
                        }
                    }
                    // Below the creation floor nothing moves
                    Ok(None) => {}
                    Err(err) => {
                        fault.get_or_insert(err);
                    }
                }
            }
        }
    }

    fn transfer(&mut self, from: usize, to: usize, delta: f32) {
        let max = self.def.max_density;
        if let Some(particle) = self.storage.get_mut(from) {
            particle.adjust_density(-delta, max);
        }
        if let Some(particle) = self.storage.get_mut(to) {
            particle.adjust_density(delta, max);
        }
    }

    /// Occupant effects and visuals for every cell processed this tick.
    fn dispatch_effects(&mut self, visits: &[Visit], ctx: &mut TickContext<'_>, report: &mut TickReport) {
        let drift = ctx.wind.wind_direction();
        for &(cell_index, roofed, _) in visits {
            let Some(particle) = self.storage.get(cell_index) else {
                continue;
            };
            let (position, density) = (particle.position, particle.density);

            if density >= self.def.min_effective_density {
                let relative = self.def.relative_density(density);
                for rule in &self.def.occupant_effects {
                    let magnitude = rule.curve.evaluate(relative);
                    if magnitude > 0.0 {
                        ctx.effects.apply_occupant_effect(
                            position,
                            &self.def.id,
                            density,
                            &rule.effect,
                            magnitude,
                        );
                        report.effects_applied += 1;
                    }
                }
            }

            if self.spawn_visual(cell_index, roofed, ctx.tick, drift, &mut *ctx.effects) {
                report.visuals_spawned += 1;
            }
        }
    }

    /// Throttled visual spawn. Returns whether a request was sent.
    fn spawn_visual(
        &mut self,
        cell_index: usize,
        roofed: bool,
        tick: u64,
        drift: Vec2,
        effects: &mut dyn EffectSink,
    ) -> bool {
        let (skip_chance, interval) = if roofed {
            (
                self.config.visual_skip_chance_roofed,
                self.config.visual_interval_roofed,
            )
        } else {
            (
                self.config.visual_skip_chance_unroofed,
                self.config.visual_interval_unroofed,
            )
        };
        if skip_chance > 0.0 && self.rng.random_bool(skip_chance.min(1.0)) {
            return false;
        }

        let Some(particle) = self.storage.get_mut(cell_index) else {
            return false;
        };
        if particle
            .last_effect_tick
            .is_some_and(|last| tick.saturating_sub(last) <= interval)
        {
            return false;
        }
        particle.last_effect_tick = Some(tick);
        let (cell, density) = (particle.position, particle.density);

        let relative = self.def.relative_density(density);
        let (color, opacity) = if roofed {
            (self.def.color_indoors, self.def.opacity_indoors)
        } else {
            (self.def.color_outdoors, self.def.opacity_outdoors)
        };
        let alpha = relative.clamp(0.1, opacity.max(0.1));
        let scale = self.rng.random_range(1.5..2.5)
            * self.rng.random_range(0.6..1.5)
            * relative.clamp(0.5, 2.2)
            + if roofed { 0.5 } else { 1.5 };

        let request = VisualRequest {
            cell,
            substance: &self.def.id,
            density,
            roofed,
            color: color.with_alpha(alpha),
            scale,
            drift,
        };
        // The handle is the host's business
        let _ = effects.spawn_visual(&request);
        true
    }

    /// Create a particle in an empty cell.
    ///
    /// Returns `Ok(None)` when `density` does not clear the creation floor.
    ///
    /// # Errors
    ///
    /// [`SimError::CellOccupied`] if the cell already holds a particle.
    fn create_at(&mut self, cell: CellPos, cell_index: usize, density: f32) -> SimResult<Option<u64>> {
        if density <= self.def.creation_density {
            return Ok(None);
        }
        if self.storage.get(cell_index).is_some() {
            return Err(SimError::CellOccupied { cell, cell_index });
        }

        let id = self.next_id;
        let mut particle = Particle::new(id, density.min(self.def.max_density), cell_index, cell);
        particle.grace_remaining = self.def.grace_ticks;
        self.storage
            .insert(particle)
            .map_err(|p| SimError::CellOccupied {
                cell: p.position,
                cell_index: p.cell_index,
            })?;
        self.buckets[bucket_of(id)].push(cell_index);
        self.next_id += 1;
        Ok(Some(id))
    }

    /// Remove a particle outside of a bucket pass.
    fn remove_particle(&mut self, cell_index: usize) -> Option<Particle> {
        let particle = self.storage.remove(cell_index)?;
        let bucket = &mut self.buckets[bucket_of(particle.id)];
        if let Some(position) = bucket.iter().position(|&c| c == cell_index) {
            bucket.swap_remove(position);
        }
        Some(particle)
    }

    /// Apply queued registrations: removals and relocations first, then additions.
    fn apply_pending(&mut self, report: &mut TickReport) -> SimResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let (removals, additions) = self.pending.take();
        let mut fault = None;
        let mut relocations = Vec::new();

        for request in removals {
            let removed = self
                .index
                .cell_to_index(request.cell)
                .and_then(|cell_index| self.remove_particle(cell_index));
            match (removed, request.relocate_to) {
                (Some(particle), Some(to)) => relocations.push((particle, to)),
                (Some(_), None) => report.destroyed += 1,
                (None, _) => debug!(
                    "{}: nothing to deregister at {}",
                    self.def.id, request.cell
                ),
            }
        }

        for (mut particle, to) in relocations {
            let Some(to_index) = self.index.cell_to_index(to) else {
                warn!(
                    "{}: particle {} moved outside the grid to {}, dropping it",
                    self.def.id, particle.id, to
                );
                report.destroyed += 1;
                continue;
            };
            particle.position = to;
            particle.cell_index = to_index;
            let bucket = bucket_of(particle.id);
            match self.storage.insert(particle) {
                Ok(()) => self.buckets[bucket].push(to_index),
                Err(p) => {
                    fault.get_or_insert(SimError::CellOccupied {
                        cell: p.position,
                        cell_index: p.cell_index,
                    });
                }
            }
        }

        for request in additions {
            let Some(cell_index) = self.index.cell_to_index(request.cell) else {
                warn!(
                    "{}: registration outside the grid at {}",
                    self.def.id, request.cell
                );
                continue;
            };
            match self.create_at(request.cell, cell_index, request.density) {
                Ok(Some(_)) => report.created += 1,
                Ok(None) => debug!(
                    "{}: registration at {} below creation floor",
                    self.def.id, request.cell
                ),
                Err(err) => {
                    fault.get_or_insert(err);
                }
            }
        }

        match fault {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Verify the bucket partition and density bounds.
    ///
    /// Every live particle must appear in exactly one bucket, the one given
    /// by `id % BUCKET_COUNT`, and nothing else may be listed.
    pub fn check_invariants(&self) -> SimResult<()> {
        let mut seen = FxHashSet::default();
        for (bucket_index, bucket) in self.buckets.iter().enumerate() {
            for &cell_index in bucket {
                let particle = self.storage.get(cell_index).ok_or_else(|| {
                    SimError::BucketDesync(format!(
                        "bucket {bucket_index} lists empty cell index {cell_index}"
                    ))
                })?;
                if bucket_of(particle.id) != bucket_index {
                    return Err(SimError::BucketDesync(format!(
                        "particle {} sits in bucket {bucket_index}",
                        particle.id
                    )));
                }
                if !seen.insert(cell_index) {
                    return Err(SimError::BucketDesync(format!(
                        "cell index {cell_index} listed twice"
                    )));
                }
            }
        }
        if seen.len() != self.storage.len() {
            return Err(SimError::BucketDesync(format!(
                "{} particles live but {} bucketed",
                self.storage.len(),
                seen.len()
            )));
        }

        for particle in self.storage.iter() {
            if !(0.0..=self.def.max_density).contains(&particle.density) {
                return Err(SimError::BucketDesync(format!(
                    "particle {} density {} out of range",
                    particle.id, particle.density
                )));
            }
            if self.index.cell_to_index(particle.position) != Some(particle.cell_index) {
                return Err(SimError::BucketDesync(format!(
                    "particle {} position {} does not match index {}",
                    particle.id, particle.position, particle.cell_index
                )));
            }
            if particle.id >= self.next_id {
                return Err(SimError::BucketDesync(format!(
                    "particle id {} not below counter {}",
                    particle.id, self.next_id
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for DiffusionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiffusionEngine")
            .field("substance", &self.def.id)
            .field("grid", &self.index)
            .field("storage", &self.storage.kind())
            .field("particles", &self.storage.len())
            .field("current_bucket", &self.current_bucket)
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}
