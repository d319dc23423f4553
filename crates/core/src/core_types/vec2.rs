//! Vector type alias for planar wind directions.

use nalgebra::Vector2;

/// 2D vector type for wind directions and drift.
///
/// This is a simple alias for `nalgebra::Vector2<f32>`. The x axis runs east
/// and the y axis runs north, matching [`CellPos`](super::CellPos).
pub type Vec2 = Vector2<f32>;
