//! Substance definitions and the catalog they are loaded into.
//!
//! A substance definition is immutable configuration shared read-only by every
//! engine simulating that substance. Definitions are loaded from JSON; each
//! entry is validated on its own so one broken entry never takes the whole
//! catalog down with it.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Identifier of a substance type (e.g. `"smoke"`, `"tear_gas"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubstanceId(pub String);

impl SubstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier handed to the host alongside an occupant effect magnitude.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EffectId(pub String);

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Linear RGBA color used for presentation only.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Rgba {
    pub const BLACK: Rgba = Rgba::new(0.0, 0.0, 0.0, 1.0);
    pub const GRAY: Rgba = Rgba::new(0.5, 0.5, 0.5, 1.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Same color with a replaced alpha channel.
    pub fn with_alpha(self, a: f32) -> Self {
        Self { a, ..self }
    }
}

/// How particles of a substance are indexed by cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    /// One slot per grid cell. Best when the substance routinely covers large areas.
    #[default]
    Dense,
    /// Hash map keyed by cell index. Best for small, short-lived clouds on big grids.
    Sparse,
}

/// Magnitude of an occupant effect as a function of relative density `d / max`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MagnitudeCurve {
    Constant { magnitude: f32 },
    Linear { scale: f32 },
    Quadratic { scale: f32 },
    /// Fixed magnitude once relative density reaches `fraction`, zero below.
    Threshold { fraction: f32, magnitude: f32 },
}

impl MagnitudeCurve {
    /// Evaluate the curve for a relative density in `[0, 1]`.
    pub fn evaluate(&self, relative_density: f32) -> f32 {
        let r = relative_density.clamp(0.0, 1.0);
        match *self {
            MagnitudeCurve::Constant { magnitude } => magnitude,
            MagnitudeCurve::Linear { scale } => scale * r,
            MagnitudeCurve::Quadratic { scale } => scale * r * r,
            MagnitudeCurve::Threshold {
                fraction,
                magnitude,
            } => {
                if r >= fraction {
                    magnitude
                } else {
                    0.0
                }
            }
        }
    }
}

/// One rule applied to occupants of a cell holding the substance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccupantEffectRule {
    pub effect: EffectId,
    pub curve: MagnitudeCurve,
}

/// Immutable per-substance configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubstanceDef {
    pub id: SubstanceId,

    // Density limits
    pub max_density: f32,           // upper clamp for every particle
    pub creation_density: f32,      // injections at or below this never create a particle
    pub expiry_density: f32,        // particles at or below this are expired
    pub min_effective_density: f32, // occupant effects fire at or above this

    // Decay (density per second)
    pub decay_rate_roofed: f32,
    pub decay_rate_unroofed: f32,

    pub wind_sensitive: bool,
    /// Visits a sub-minimum particle survives before it is destroyed. 0 destroys at once.
    pub grace_ticks: u32,
    pub storage: StorageKind,

    // Presentation
    pub color_indoors: Rgba,
    pub color_outdoors: Rgba,
    pub opacity_indoors: f32,
    pub opacity_outdoors: f32,
    pub blocks_line_of_sight: bool,
    pub is_harmful: bool,

    pub occupant_effects: Vec<OccupantEffectRule>,
}

impl SubstanceDef {
    /// Definition with the stock defaults and the two required fields.
    pub fn new(id: impl Into<String>, max_density: f32) -> Self {
        Self {
            id: SubstanceId::new(id),
            max_density,
            creation_density: 1.0,
            expiry_density: 1.0,
            min_effective_density: 100.0,
            decay_rate_roofed: 90.0,
            decay_rate_unroofed: 15.0,
            wind_sensitive: false,
            grace_ticks: 0,
            storage: StorageKind::Dense,
            color_indoors: Rgba::BLACK,
            color_outdoors: Rgba::GRAY,
            opacity_indoors: 0.4,
            opacity_outdoors: 1.0,
            blocks_line_of_sight: false,
            is_harmful: false,
            occupant_effects: Vec::new(),
        }
    }

    /// Thick black smoke: wind-driven, harmful, obscures sight.
    pub fn smoke() -> Self {
        Self {
            wind_sensitive: true,
            blocks_line_of_sight: true,
            is_harmful: true,
            occupant_effects: vec![OccupantEffectRule {
                effect: EffectId("smoke_inhalation".to_string()),
                curve: MagnitudeCurve::Quadratic { scale: 0.045 },
            }],
            ..Self::new("smoke", 12800.0)
        }
    }

    /// Check ranges. Called for every definition entering a catalog.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let id = &self.id.0;
        if id.trim().is_empty() {
            return Err(ConfigError::MissingField {
                substance: "<unnamed>".to_string(),
                field: "id",
            });
        }
        if !(self.max_density.is_finite() && self.max_density > 0.0) {
            return Err(ConfigError::NonPositiveMaxDensity {
                substance: id.clone(),
                value: self.max_density,
            });
        }
        let non_negative = [
            ("decay_rate_roofed", self.decay_rate_roofed),
            ("decay_rate_unroofed", self.decay_rate_unroofed),
            ("creation_density", self.creation_density),
            ("expiry_density", self.expiry_density),
            ("min_effective_density", self.min_effective_density),
        ];
        for (field, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::NegativeValue {
                    substance: id.clone(),
                    field,
                    value,
                });
            }
        }
        Ok(())
    }

    /// Relative density used by presentation and effect curves.
    pub fn relative_density(&self, density: f32) -> f32 {
        density / self.max_density
    }
}

/// Serialized form of a definition. Every field is optional so that missing
/// required fields surface as [`ConfigError::MissingField`] instead of a
/// parse failure for the whole file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSubstanceDef {
    id: Option<String>,
    max_density: Option<f32>,
    creation_density: Option<f32>,
    expiry_density: Option<f32>,
    min_effective_density: Option<f32>,
    decay_rate_roofed: Option<f32>,
    decay_rate_unroofed: Option<f32>,
    wind_sensitive: Option<bool>,
    grace_ticks: Option<u32>,
    storage: Option<StorageKind>,
    color_indoors: Option<Rgba>,
    color_outdoors: Option<Rgba>,
    opacity_indoors: Option<f32>,
    opacity_outdoors: Option<f32>,
    blocks_line_of_sight: Option<bool>,
    is_harmful: Option<bool>,
    occupant_effects: Option<Vec<OccupantEffectRule>>,
}

impl RawSubstanceDef {
    fn into_def(self) -> Result<SubstanceDef, ConfigError> {
        let id = self.id.ok_or_else(|| ConfigError::MissingField {
            substance: "<unnamed>".to_string(),
            field: "id",
        })?;
        let max_density = self.max_density.ok_or_else(|| ConfigError::MissingField {
            substance: id.clone(),
            field: "max_density",
        })?;

        let base = SubstanceDef::new(id, max_density);
        let def = SubstanceDef {
            creation_density: self.creation_density.unwrap_or(base.creation_density),
            expiry_density: self.expiry_density.unwrap_or(base.expiry_density),
            min_effective_density: self
                .min_effective_density
                .unwrap_or(base.min_effective_density),
            decay_rate_roofed: self.decay_rate_roofed.unwrap_or(base.decay_rate_roofed),
            decay_rate_unroofed: self.decay_rate_unroofed.unwrap_or(base.decay_rate_unroofed),
            wind_sensitive: self.wind_sensitive.unwrap_or(base.wind_sensitive),
            grace_ticks: self.grace_ticks.unwrap_or(base.grace_ticks),
            storage: self.storage.unwrap_or(base.storage),
            color_indoors: self.color_indoors.unwrap_or(base.color_indoors),
            color_outdoors: self.color_outdoors.unwrap_or(base.color_outdoors),
            opacity_indoors: self.opacity_indoors.unwrap_or(base.opacity_indoors),
            opacity_outdoors: self.opacity_outdoors.unwrap_or(base.opacity_outdoors),
            blocks_line_of_sight: self
                .blocks_line_of_sight
                .unwrap_or(base.blocks_line_of_sight),
            is_harmful: self.is_harmful.unwrap_or(base.is_harmful),
            occupant_effects: self.occupant_effects.unwrap_or_default(),
            ..base
        };
        def.validate()?;
        Ok(def)
    }
}

/// The set of substances known to a registry, in load order.
#[derive(Debug, Clone, Default)]
pub struct SubstanceCatalog {
    defs: Vec<Arc<SubstanceDef>>,
}

impl SubstanceCatalog {
    /// Build a catalog from in-memory definitions.
    ///
    /// Invalid or duplicate definitions are excluded and returned alongside
    /// the catalog.
    pub fn from_definitions(
        defs: impl IntoIterator<Item = SubstanceDef>,
    ) -> (Self, Vec<ConfigError>) {
        let mut catalog = Self::default();
        let mut errors = Vec::new();
        for def in defs {
            if let Err(err) = catalog.insert(def) {
                warn!("Excluding substance: {}", err);
                errors.push(err);
            }
        }
        info!(
            "Loaded {} substance(s), {} rejected",
            catalog.len(),
            errors.len()
        );
        (catalog, errors)
    }

    /// Load a catalog from a JSON array of definitions.
    ///
    /// A document that is not a JSON array is a hard error. Individual
    /// entries that fail to parse or validate are excluded and reported.
    pub fn from_json(json: &str) -> Result<(Self, Vec<ConfigError>), ConfigError> {
        let entries: Vec<serde_json::Value> =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let mut defs = Vec::with_capacity(entries.len());
        let mut errors = Vec::new();
        for (position, entry) in entries.into_iter().enumerate() {
            let parsed = serde_json::from_value::<RawSubstanceDef>(entry)
                .map_err(|e| ConfigError::InvalidEntry {
                    position,
                    reason: e.to_string(),
                })
                .and_then(RawSubstanceDef::into_def);
            match parsed {
                Ok(def) => defs.push(def),
                Err(err) => {
                    warn!("Excluding substance entry {}: {}", position, err);
                    errors.push(err);
                }
            }
        }

        let (catalog, mut rejected) = Self::from_definitions(defs);
        errors.append(&mut rejected);
        Ok((catalog, errors))
    }

    fn insert(&mut self, def: SubstanceDef) -> Result<(), ConfigError> {
        def.validate()?;
        if self.get(&def.id).is_some() {
            return Err(ConfigError::DuplicateSubstance(def.id.0));
        }
        self.defs.push(Arc::new(def));
        Ok(())
    }

    pub fn get(&self, id: &SubstanceId) -> Option<&Arc<SubstanceDef>> {
        self.defs.iter().find(|def| &def.id == id)
    }

    pub fn position(&self, id: &SubstanceId) -> Option<usize> {
        self.defs.iter().position(|def| &def.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<SubstanceDef>> {
        self.defs.iter()
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}
