//! Overwatch Core - Multi-Camera Person Tracking and Responder Dispatch
//!
//! This library turns detections from fixed or moving cameras into one
//! consistent picture of where people are, then decides which responder goes
//! to whom:
//! 1. **Projection**: pixel bounding boxes → world positions (pinhole model)
//! 2. **Fusion**: one global track per person across every camera
//! 3. **Assignment**: capacity-aware, jitter-resistant agent ↔ target matching
//!
//! The [`coordinator`] module drives all three from an `OverwatchContext`
//! clock and publishes snapshots to an `OutputSink`.

pub mod config;
pub mod coordinator;
pub mod distance;
pub mod last_seen;
pub mod overwatch_assignment;
pub mod overwatch_fusion;
pub mod overwatch_projection;
pub mod overwatch_ranked;
pub mod schemas;
pub mod validation;

// Re-export key types for convenience
pub use config::{Algorithm, AssignmentConfig, CameraDefaults, ConfigError, CoordinatorConfig, FusionConfig};
pub use coordinator::{Coordinator, CoordinatorError, InboundMessage, Snapshot};
pub use distance::{DistanceFn, DistanceMatrix, DistanceProvider, Euclidean};
pub use last_seen::{LastSeenMemory, TrackedPerson};
pub use overwatch_assignment::AssignmentEngine;
pub use overwatch_fusion::{FrameSummary, FusionEngine};
pub use overwatch_projection::{bbox_for, estimate, is_in_view, ProjectionError, DEFAULT_PERSON_HEIGHT_M};
pub use overwatch_ranked::{Plan, RankedPlan, RankedPlanner};
pub use schemas::{
    Agent, AgentId, Assignment, AssignmentOutput, BoundingBox, CameraId, CameraPose, DetectionBatch, FusionOutput,
    GlobalTrack, Observation, PoseUpdate, Target, TargetId, TrackId, WorldEstimate,
};
pub use validation::{GroundTruthEntry, ValidationReport, ValidationSession};
