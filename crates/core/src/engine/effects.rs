//! Notifications the engine sends to the host.
//!
//! Both calls are fire-and-forget: the engine never reads a result back and
//! never waits on the host.

use crate::core_types::{CellPos, EffectId, Rgba, SubstanceId, Vec2};

/// Opaque host handle for a spawned visual.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VisualHandle(pub u64);

/// Everything the host needs to draw one puff of a substance.
#[derive(Debug, Clone, PartialEq)]
pub struct VisualRequest<'a> {
    pub cell: CellPos,
    pub substance: &'a SubstanceId,
    pub density: f32,
    pub roofed: bool,
    pub color: Rgba,
    pub scale: f32,
    /// Prevailing wind direction, for the visual's drift.
    pub drift: Vec2,
}

/// Host-side receiver for occupant effects and visuals.
pub trait EffectSink {
    /// Apply one effect rule to whoever occupies `cell`.
    fn apply_occupant_effect(
        &mut self,
        cell: CellPos,
        substance: &SubstanceId,
        density: f32,
        effect: &EffectId,
        magnitude: f32,
    );

    /// Spawn a cosmetic visual. Hosts without presentation keep the default.
    fn spawn_visual(&mut self, _request: &VisualRequest<'_>) -> Option<VisualHandle> {
        None
    }
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEffects;

impl EffectSink for NullEffects {
    fn apply_occupant_effect(
        &mut self,
        _cell: CellPos,
        _substance: &SubstanceId,
        _density: f32,
        _effect: &EffectId,
        _magnitude: f32,
    ) {
    }
}
