//! Engine-wide tuning shared by every substance.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Tuning for diffusion engines and the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Host ticks per simulated second; converts per-second decay rates.
    pub ticks_per_second: f32,
    /// Ticks between wind weight recomputations (1 = every tick).
    pub wind_update_interval: u64,
    /// Wind strength below which diffusion ignores wind.
    pub wind_diffusion_threshold: f32,
    /// Wind strength above which outdoor decay accelerates.
    pub wind_decay_threshold: f32,
    /// Minimum ticks between visuals for one roofed particle.
    pub visual_interval_roofed: u64,
    /// Minimum ticks between visuals for one unroofed particle.
    pub visual_interval_unroofed: u64,
    /// Probability a due roofed visual is skipped anyway.
    pub visual_skip_chance_roofed: f64,
    /// Probability a due unroofed visual is skipped anyway.
    pub visual_skip_chance_unroofed: f64,
    /// Size of the registry's direct-mapped grid cache.
    pub registry_slots: usize,
    /// Seed for the cosmetic RNG. Simulation math never draws from it.
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            ticks_per_second: 60.0,
            wind_update_interval: 1,
            wind_diffusion_threshold: 1.5,
            wind_decay_threshold: 2.5,
            visual_interval_roofed: 75,
            visual_interval_unroofed: 150,
            visual_skip_chance_roofed: 0.25,
            visual_skip_chance_unroofed: 0.75,
            registry_slots: 20,
            seed: 42,
        }
    }
}

impl SimConfig {
    pub fn with_ticks_per_second(mut self, ticks_per_second: f32) -> Self {
        self.ticks_per_second = ticks_per_second;
        self
    }

    pub fn with_wind_update_interval(mut self, interval: u64) -> Self {
        self.wind_update_interval = interval;
        self
    }

    pub fn with_registry_slots(mut self, slots: usize) -> Self {
        self.registry_slots = slots;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Disable visual throttling randomness (every due visual spawns).
    pub fn without_visual_skips(mut self) -> Self {
        self.visual_skip_chance_roofed = 0.0;
        self.visual_skip_chance_unroofed = 0.0;
        self
    }

    /// Check the settings engines divide by or sample from.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidSetting`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let rate = self.ticks_per_second;
        if !rate.is_finite() || rate <= 0.0 {
            return Err(invalid("ticks_per_second", format!("{rate} is not a positive finite rate")));
        }
        for (field, value) in [
            ("wind_diffusion_threshold", self.wind_diffusion_threshold),
            ("wind_decay_threshold", self.wind_decay_threshold),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(field, format!("{value} must be finite and >= 0")));
            }
        }
        for (field, chance) in [
            ("visual_skip_chance_roofed", self.visual_skip_chance_roofed),
            ("visual_skip_chance_unroofed", self.visual_skip_chance_unroofed),
        ] {
            if !(0.0..=1.0).contains(&chance) {
                return Err(invalid(field, format!("{chance} is not a probability")));
            }
        }
        if self.registry_slots == 0 {
            return Err(invalid("registry_slots", "at least one slot is required".to_string()));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: String) -> ConfigError {
    ConfigError::InvalidSetting { field, reason }
}
