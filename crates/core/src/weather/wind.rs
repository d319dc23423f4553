//! Wind-driven anisotropic diffusion weights
//!
//! Diffusion toward each of the 8 neighbours is scaled by a per-direction
//! weight. Indoors, for wind-insensitive substances, or in light wind the
//! static [`BASE_WEIGHTS`] apply: full weight along the axes and reduced
//! weight on the diagonals. Outdoors in real wind each direction also gets a
//! downwind component:
//!
//! ```text
//! wind[i]      = max(dot(unit(offset[i]), wind_dir) * 0.25 * base[i], 0)
//! effective[i] = min(base[i] + wind[i] * sqrt(strength / threshold), 1)
//! ```
//!
//! so wind only ever amplifies spread, and only downwind.

use crate::core_types::{CellPos, Vec2};

/// Neighbour offsets, axis and diagonal interleaved as the host expects.
pub const NEIGHBOR_OFFSETS: [CellPos; 8] = [
    CellPos::new(1, 0),
    CellPos::new(0, 1),
    CellPos::new(1, 1),
    CellPos::new(-1, 0),
    CellPos::new(0, -1),
    CellPos::new(-1, -1),
    CellPos::new(1, -1),
    CellPos::new(-1, 1),
];

/// Static per-direction weights (axis 0.96, diagonal 0.66).
pub const BASE_WEIGHTS: [f32; 8] = [0.96, 0.96, 0.66, 0.96, 0.96, 0.66, 0.66, 0.66];

/// Share of the base weight the wind can add per unit of alignment.
const WIND_WEIGHT_FACTOR: f32 = 0.25;

/// Source of wind data, implemented by the host weather system.
pub trait WindSource {
    /// Current prevailing wind direction as a unit vector.
    fn wind_direction(&self) -> Vec2;

    /// Wind strength felt at `cell` (0 = calm).
    fn wind_strength_at(&self, cell: CellPos) -> f32;
}

/// Same wind everywhere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UniformWind {
    pub direction: Vec2,
    pub strength: f32,
}

impl UniformWind {
    pub fn calm() -> Self {
        Self {
            direction: Vec2::new(1.0, 0.0),
            strength: 0.0,
        }
    }

    /// Wind blowing toward `heading_deg` (0 = +y/north, 90 = +x/east).
    pub fn from_heading(heading_deg: f32, strength: f32) -> Self {
        let rad = heading_deg.to_radians();
        Self {
            direction: Vec2::new(rad.sin(), rad.cos()),
            strength,
        }
    }
}

impl WindSource for UniformWind {
    fn wind_direction(&self) -> Vec2 {
        self.direction
    }

    fn wind_strength_at(&self, _cell: CellPos) -> f32 {
        self.strength
    }
}

/// Downwind components, recomputed from the wind direction on a fixed cadence.
#[derive(Debug, Clone, PartialEq)]
pub struct WindWeights {
    wind: [f32; 8],
    last_update: Option<u64>,
}

impl Default for WindWeights {
    fn default() -> Self {
        Self::new()
    }
}

impl WindWeights {
    pub fn new() -> Self {
        Self {
            wind: [0.0; 8],
            last_update: None,
        }
    }

    /// Whether the weights are due for recomputation at `tick`.
    pub fn is_stale(&self, tick: u64, interval: u64) -> bool {
        match self.last_update {
            None => true,
            Some(last) => tick.saturating_sub(last) >= interval.max(1) || tick < last,
        }
    }

    /// Recompute the downwind components for a new wind direction.
    pub fn recompute(&mut self, direction: Vec2, tick: u64) {
        let direction = direction.try_normalize(f32::EPSILON).unwrap_or_else(Vec2::zeros);
        for (i, offset) in NEIGHBOR_OFFSETS.iter().enumerate() {
            let unit = Vec2::new(offset.x as f32, offset.y as f32).normalize();
            self.wind[i] = (unit.dot(&direction) * WIND_WEIGHT_FACTOR * BASE_WEIGHTS[i]).max(0.0);
        }
        self.last_update = Some(tick);
    }

    /// Raw downwind components (zero upwind).
    pub fn wind_components(&self) -> &[f32; 8] {
        &self.wind
    }

    /// Effective weights for a cell.
    ///
    /// `affected` is false for wind-insensitive substances and roofed cells.
    pub fn weights_at(&self, affected: bool, strength: f32, threshold: f32) -> [f32; 8] {
        if !affected || strength < threshold || threshold <= 0.0 {
            return BASE_WEIGHTS;
        }
        let gain = (strength / threshold).sqrt();
        let mut weights = BASE_WEIGHTS;
        for (weight, wind) in weights.iter_mut().zip(self.wind) {
            *weight = (*weight + wind * gain).min(1.0);
        }
        weights
    }
}
