//! Deferred registration queue
//!
//! Host entities may join or leave the simulation at any time (spawned or
//! despawned by unrelated game logic). Those requests are queued here and
//! applied by the engine once its bucket pass has finished, removals first,
//! so the live bucket population only changes at tick boundaries.

use crate::core_types::CellPos;

/// Request to add density as a new particle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Registration {
    pub cell: CellPos,
    pub density: f32,
}

/// Request to remove the particle at `cell`, optionally re-adding it at
/// `relocate_to` with the same id and density.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deregistration {
    pub cell: CellPos,
    pub relocate_to: Option<CellPos>,
}

/// Append-only request lists, drained once per tick.
#[derive(Debug, Default, Clone)]
pub struct PendingChanges {
    removals: Vec<Deregistration>,
    additions: Vec<Registration>,
}

impl PendingChanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit_addition(&mut self, request: Registration) {
        self.additions.push(request);
    }

    pub fn submit_removal(&mut self, request: Deregistration) {
        self.removals.push(request);
    }

    pub fn pending_additions(&self) -> &[Registration] {
        &self.additions
    }

    pub fn pending_removals(&self) -> &[Deregistration] {
        &self.removals
    }

    pub fn is_empty(&self) -> bool {
        self.removals.is_empty() && self.additions.is_empty()
    }

    /// Take all queued requests as `(removals, additions)`.
    pub fn take(&mut self) -> (Vec<Deregistration>, Vec<Registration>) {
        (
            std::mem::take(&mut self.removals),
            std::mem::take(&mut self.additions),
        )
    }
}
