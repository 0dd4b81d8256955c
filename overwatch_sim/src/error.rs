use overwatch_core::{ConfigError, CoordinatorError};
use thiserror::Error;

/// Errors raised while setting up or running a simulation.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("unknown scenario '{0}' (expected hysteresis, capacity, camera_feed, thrash_compare or all)")]
    UnknownScenario(String),

    #[error("invalid usage: {0}")]
    Usage(String),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),

    #[error("invalid noise model: {0}")]
    Noise(String),

    #[error("export failed: {0}")]
    Export(#[from] std::io::Error),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
