//! Multi-grid orchestration: shared configuration and the engine registry

pub mod config;
pub mod registry;

pub use config::SimConfig;
pub use registry::{EngineFault, EngineRegistry, GridSnapshot, GridTickReport, RegistryStats};
