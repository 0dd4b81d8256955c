//! Common types for the Overwatch environment abstraction.

use serde::{Deserialize, Serialize};

/// Channel a published payload belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    /// Fused global tracks
    Fusion,
    /// Target to agent bindings
    Assignment,
}

impl Topic {
    /// Returns the wire name of the topic.
    pub fn name(&self) -> &'static str {
        match self {
            Topic::Fusion => "fusion",
            Topic::Assignment => "assignment",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Envelope for payloads pushed to external consumers.
///
/// The payload is opaque JSON bytes; consumers deserialize it according to
/// the topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Which output this payload carries
    pub topic: Topic,

    /// Timestamp when the payload was produced (publisher's clock)
    pub timestamp_ms: u64,

    /// The raw JSON bytes
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Creates a new envelope from payload bytes.
    pub fn new(topic: Topic, payload: Vec<u8>, timestamp_ms: u64) -> Self {
        Self {
            topic,
            timestamp_ms,
            payload,
        }
    }

    /// Serializes `value` as JSON into a new envelope.
    pub fn json<T: Serialize>(
        topic: Topic,
        value: &T,
        timestamp_ms: u64,
    ) -> Result<Self, crate::EnvError> {
        Ok(Self::new(topic, serde_json::to_vec(value)?, timestamp_ms))
    }

    /// Decodes the payload as JSON.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, crate::EnvError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Returns the payload size in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}
