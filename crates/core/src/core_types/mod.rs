//! Core types and utilities

pub mod cell;
pub mod particle;
pub mod substance;
pub mod vec2;

pub use cell::CellPos;
pub use particle::Particle;
pub use substance::*;
pub use vec2::Vec2;
