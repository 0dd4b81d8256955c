//! Error types for the Overwatch environment layer.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvError {
    /// The sink was shut down; carries the topic of the rejected envelope
    #[error("sink closed while publishing '{0}'")]
    SinkClosed(String),

    /// Envelope payload could not be encoded or decoded
    #[error("payload serialization failed: {0}")]
    SerializationError(String),
}

impl EnvError {
    pub fn closed(topic: impl std::fmt::Display) -> Self {
        Self::SinkClosed(topic.to_string())
    }
}

impl From<serde_json::Error> for EnvError {
    fn from(e: serde_json::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}
