//! The atomic simulation unit: density bound to one grid cell.

use super::CellPos;
use serde::{Deserialize, Serialize};

/// Density of one substance held by one cell.
///
/// Diffusion never moves a particle. Density flows between them, and a
/// particle is created or destroyed when its cell gains or loses the
/// substance. Only a host relocation changes a particle's cell, and it keeps
/// its id and bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Particle {
    /// Monotonic id within the owning engine; `id % BUCKET_COUNT` is its bucket.
    pub id: u64,
    pub density: f32,
    pub cell_index: usize,
    pub position: CellPos,
    /// Tick of the last visual spawn, used to throttle presentation.
    #[serde(skip)]
    pub last_effect_tick: Option<u64>,
    /// Remaining visits allowed at sub-minimum density.
    #[serde(default)]
    pub grace_remaining: u32,
}

impl Particle {
    pub fn new(id: u64, density: f32, cell_index: usize, position: CellPos) -> Self {
        Self {
            id,
            density,
            cell_index,
            position,
            last_effect_tick: None,
            grace_remaining: 0,
        }
    }

    /// Add `delta` (possibly negative) and clamp into `[0, max_density]`.
    #[inline]
    pub fn adjust_density(&mut self, delta: f32, max_density: f32) {
        self.density = (self.density + delta).clamp(0.0, max_density);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjust_density_clamps() {
        let mut p = Particle::new(0, 50.0, 3, CellPos::new(3, 0));
        p.adjust_density(100.0, 120.0);
        assert_eq!(p.density, 120.0);
        p.adjust_density(-500.0, 120.0);
        assert_eq!(p.density, 0.0);
    }
}
