//! Particle storage strategies
//!
//! The engine indexes its live particles by cell index. How that index is
//! laid out is chosen per substance: a dense slot array sized to the grid for
//! substances that blanket large areas, or a hash map for substances that
//! only ever occupy a handful of cells on a large grid.

use crate::core_types::{Particle, StorageKind};
use rustc_hash::FxHashMap;

/// Cell-indexed particle set.
///
/// At most one particle occupies a cell; `insert` hands the particle back
/// instead of overwriting an occupant.
pub trait ParticleStorage: Send {
    fn get(&self, cell_index: usize) -> Option<&Particle>;

    fn get_mut(&mut self, cell_index: usize) -> Option<&mut Particle>;

    /// Insert `particle` at its `cell_index`.
    ///
    /// # Errors
    ///
    /// Returns the particle unchanged when the cell is already occupied.
    fn insert(&mut self, particle: Particle) -> Result<(), Particle>;

    fn remove(&mut self, cell_index: usize) -> Option<Particle>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn iter(&self) -> Box<dyn Iterator<Item = &Particle> + '_>;

    fn kind(&self) -> StorageKind;
}

/// Create the storage selected by a substance definition.
pub fn create_particle_storage(kind: StorageKind, cell_count: usize) -> Box<dyn ParticleStorage> {
    match kind {
        StorageKind::Dense => Box::new(DenseStorage::new(cell_count)),
        StorageKind::Sparse => Box::new(SparseStorage::default()),
    }
}

/// One slot per grid cell.
#[derive(Debug, Clone)]
pub struct DenseStorage {
    slots: Vec<Option<Particle>>,
    count: usize,
}

impl DenseStorage {
    pub fn new(cell_count: usize) -> Self {
        Self {
            slots: vec![None; cell_count],
            count: 0,
        }
    }
}

impl ParticleStorage for DenseStorage {
    fn get(&self, cell_index: usize) -> Option<&Particle> {
        self.slots.get(cell_index)?.as_ref()
    }

    fn get_mut(&mut self, cell_index: usize) -> Option<&mut Particle> {
        self.slots.get_mut(cell_index)?.as_mut()
    }

    fn insert(&mut self, particle: Particle) -> Result<(), Particle> {
        let Some(slot) = self.slots.get_mut(particle.cell_index) else {
            return Err(particle);
        };
        if slot.is_some() {
            return Err(particle);
        }
        *slot = Some(particle);
        self.count += 1;
        Ok(())
    }

    fn remove(&mut self, cell_index: usize) -> Option<Particle> {
        let removed = self.slots.get_mut(cell_index)?.take();
        if removed.is_some() {
            self.count -= 1;
        }
        removed
    }

    fn len(&self) -> usize {
        self.count
    }

    fn iter(&self) -> Box<dyn Iterator<Item = &Particle> + '_> {
        Box::new(self.slots.iter().flatten())
    }

    fn kind(&self) -> StorageKind {
        StorageKind::Dense
    }
}

/// Hash map keyed by cell index.
#[derive(Debug, Clone, Default)]
pub struct SparseStorage {
    particles: FxHashMap<usize, Particle>,
}

impl ParticleStorage for SparseStorage {
    fn get(&self, cell_index: usize) -> Option<&Particle> {
        self.particles.get(&cell_index)
    }

    fn get_mut(&mut self, cell_index: usize) -> Option<&mut Particle> {
        self.particles.get_mut(&cell_index)
    }

    fn insert(&mut self, particle: Particle) -> Result<(), Particle> {
        if self.particles.contains_key(&particle.cell_index) {
            return Err(particle);
        }
        self.particles.insert(particle.cell_index, particle);
        Ok(())
    }

    fn remove(&mut self, cell_index: usize) -> Option<Particle> {
        self.particles.remove(&cell_index)
    }

    fn len(&self) -> usize {
        self.particles.len()
    }

    fn iter(&self) -> Box<dyn Iterator<Item = &Particle> + '_> {
        Box::new(self.particles.values())
    }

    fn kind(&self) -> StorageKind {
        StorageKind::Sparse
    }
}
