//! Error types for the gas simulation.

use crate::core_types::CellPos;

/// Result alias for simulation operations.
pub type SimResult<T> = Result<T, SimError>;

/// A substance definition or engine setting that cannot be loaded.
///
/// Rejected substances are reported at startup and excluded; the remaining
/// catalog still loads. An invalid [`SimConfig`](crate::SimConfig) refuses to
/// build any engine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("substance '{substance}' is missing required field '{field}'")]
    MissingField {
        substance: String,
        field: &'static str,
    },

    #[error("substance '{substance}' has non-positive max density {value}")]
    NonPositiveMaxDensity { substance: String, value: f32 },

    #[error("substance '{substance}' has invalid {field} {value} (must be finite and >= 0)")]
    NegativeValue {
        substance: String,
        field: &'static str,
        value: f32,
    },

    #[error("substance '{0}' is defined more than once")]
    DuplicateSubstance(String),

    #[error("substance entry {position} is malformed: {reason}")]
    InvalidEntry { position: usize, reason: String },

    #[error("failed to parse substance catalog: {0}")]
    Parse(String),

    #[error("config setting '{field}' is invalid: {reason}")]
    InvalidSetting { field: &'static str, reason: String },
}

/// Faults raised by an engine or the registry.
///
/// `CellOccupied` and `BucketDesync` signal internal desynchronization and are
/// never silently repaired.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimError {
    #[error("cell {cell} (index {cell_index}) already holds a particle")]
    CellOccupied { cell: CellPos, cell_index: usize },

    #[error("bucket state out of sync: {0}")]
    BucketDesync(String),

    #[error("unknown substance '{0}'")]
    UnknownSubstance(String),

    #[error("unknown grid {0}")]
    UnknownGrid(String),

    #[error("snapshot rejected: {0}")]
    InvalidSnapshot(String),

    #[error("failed to serialize snapshot: {0}")]
    Serialize(String),

    #[error("snapshot file error: {0}")]
    Io(String),

    #[error("engine tick panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// A collaborator query that could not be answered this tick (e.g. the grid
/// is still loading). Callers degrade to "cannot diffuse here".
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("host query failed at {cell}: {reason}")]
pub struct HostQueryError {
    pub cell: CellPos,
    pub reason: String,
}

impl HostQueryError {
    pub fn new(cell: CellPos, reason: impl Into<String>) -> Self {
        Self {
            cell,
            reason: reason.into(),
        }
    }
}
