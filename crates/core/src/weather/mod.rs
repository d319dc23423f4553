//! Wind input and the direction weights derived from it.

pub mod wind;

pub use wind::{UniformWind, WindSource, WindWeights, BASE_WEIGHTS, NEIGHBOR_OFFSETS};
