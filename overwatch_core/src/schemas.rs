//! Shared data model and wire formats.
//!
//! Internal state uses `nalgebra::Point2<f64>` positions; the `*Record` and
//! `*Output` types are the JSON shapes exchanged with detectors, camera pose
//! feeds and downstream consumers.

use crate::config::{Algorithm, CameraDefaults};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub type CameraId = String;
pub type AgentId = String;
/// Fusion-assigned track id. Targets share the same id space.
pub type TrackId = u64;
pub type TargetId = u64;

/// Round to millimetres for published distances.
pub fn round_mm(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

// ============================================================================
// BOUNDING BOX
// ============================================================================

/// Pixel-space box `[x1, y1, x2, y2]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn center_x(&self) -> f64 {
        (self.x1 + self.x2) / 2.0
    }

    pub fn center_y(&self) -> f64 {
        (self.y1 + self.y2) / 2.0
    }

    pub fn width(&self) -> f64 {
        (self.x2 - self.x1).abs()
    }

    pub fn height(&self) -> f64 {
        (self.y2 - self.y1).abs()
    }

    pub fn is_finite(&self) -> bool {
        self.x1.is_finite() && self.y1.is_finite() && self.x2.is_finite() && self.y2.is_finite()
    }

    pub fn as_array(&self) -> [f64; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

impl From<[f64; 4]> for BoundingBox {
    fn from(v: [f64; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(b: BoundingBox) -> Self {
        b.as_array()
    }
}

// ============================================================================
// CAMERA POSE
// ============================================================================

/// Position, heading and intrinsics of one camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraPose {
    pub id: CameraId,
    pub position: Point2<f64>,
    /// Optical axis in degrees, counter-clockwise from +x
    pub heading_deg: f64,
    pub horizontal_fov_deg: f64,
    pub image_width: u32,
    pub image_height: u32,
}

impl CameraPose {
    /// A camera with the default 60° / 640x480 intrinsics.
    pub fn new(id: impl Into<CameraId>, x: f64, y: f64, heading_deg: f64) -> Self {
        Self::from_defaults(id, x, y, heading_deg, &CameraDefaults::default())
    }

    pub fn from_defaults(
        id: impl Into<CameraId>,
        x: f64,
        y: f64,
        heading_deg: f64,
        defaults: &CameraDefaults,
    ) -> Self {
        Self {
            id: id.into(),
            position: Point2::new(x, y),
            heading_deg,
            horizontal_fov_deg: defaults.horizontal_fov_deg,
            image_width: defaults.image_width,
            image_height: defaults.image_height,
        }
    }

    pub fn with_intrinsics(mut self, horizontal_fov_deg: f64, width: u32, height: u32) -> Self {
        self.horizontal_fov_deg = horizontal_fov_deg;
        self.image_width = width;
        self.image_height = height;
        self
    }
}

// ============================================================================
// OBSERVATIONS & ESTIMATES
// ============================================================================

/// One detection from one camera in one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub camera_id: CameraId,
    pub local_track_id: u64,
    pub bbox: BoundingBox,
    pub confidence: f64,
    pub timestamp: f64,
}

/// World-frame position derived from a single bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldEstimate {
    pub x: f64,
    pub y: f64,
    pub distance_m: f64,
    pub uncertainty_m: f64,
    /// Absolute bearing in [0, 360)
    pub bearing_deg: f64,
    /// Offset from the optical axis, positive counter-clockwise
    pub angle_in_fov_deg: f64,
}

impl WorldEstimate {
    pub fn position(&self) -> Point2<f64> {
        Point2::new(self.x, self.y)
    }
}

// ============================================================================
// FUSION STATE
// ============================================================================

/// A person as seen by any number of cameras, in world coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalTrack {
    pub id: TrackId,
    pub position: Point2<f64>,
    pub confidence: f64,
    pub last_seen: f64,
    /// Contributing cameras in first-seen order, without duplicates
    pub source_cameras: Vec<CameraId>,
}

impl GlobalTrack {
    pub fn add_source(&mut self, camera_id: &str) {
        if !self.source_cameras.iter().any(|c| c == camera_id) {
            self.source_cameras.push(camera_id.to_string());
        }
    }

    pub fn to_record(&self) -> GlobalTrackRecord {
        GlobalTrackRecord {
            id: self.id,
            position: [self.position.x, self.position.y],
            confidence: self.confidence,
            last_seen: self.last_seen,
            source_cameras: self.source_cameras.clone(),
        }
    }
}

// ============================================================================
// ASSIGNMENT STATE
// ============================================================================

/// A mobile responder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub position: Point2<f64>,
    /// Highest-priority target this agent serves
    pub current_assignment: Option<TargetId>,
    pub assigned_targets: BTreeSet<TargetId>,
    pub max_assignments: u32,
    pub last_updated: f64,
}

impl Agent {
    pub fn new(id: impl Into<AgentId>, x: f64, y: f64, max_assignments: u32, now: f64) -> Self {
        Self {
            id: id.into(),
            position: Point2::new(x, y),
            current_assignment: None,
            assigned_targets: BTreeSet::new(),
            max_assignments: max_assignments.max(1),
            last_updated: now,
        }
    }
}

/// Something an agent may be sent to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: TargetId,
    pub position: Point2<f64>,
    pub confidence: f64,
    pub last_seen: f64,
}

impl Target {
    pub fn new(id: TargetId, x: f64, y: f64, confidence: f64, last_seen: f64) -> Self {
        Self {
            id,
            position: Point2::new(x, y),
            confidence,
            last_seen,
        }
    }

    /// Active while strictly younger than `stale_ttl`.
    pub fn is_active(&self, now: f64, stale_ttl: f64) -> bool {
        now - self.last_seen < stale_ttl
    }
}

impl From<&GlobalTrack> for Target {
    fn from(track: &GlobalTrack) -> Self {
        Self {
            id: track.id,
            position: track.position,
            confidence: track.confidence,
            last_seen: track.last_seen,
        }
    }
}

/// One target bound to one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub target_id: TargetId,
    pub agent_id: AgentId,
    pub distance: f64,
    pub timestamp: f64,
}

impl Assignment {
    pub fn to_record(&self) -> AssignmentRecord {
        AssignmentRecord {
            target_id: self.target_id,
            agent_id: self.agent_id.clone(),
            distance: round_mm(self.distance),
            timestamp: self.timestamp,
        }
    }
}

/// Summary of one applied matching run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentHistoryRecord {
    pub timestamp: f64,
    pub algorithm: Algorithm,
    pub mapping: BTreeMap<TargetId, AgentId>,
    /// Targets whose agent changed relative to the previous table
    pub reassigned: usize,
}

// ============================================================================
// INBOUND WIRE FORMATS
// ============================================================================

/// One detection inside a `DetectionBatch`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub track_id: u64,
    pub bbox: BoundingBox,
    pub confidence: f64,
}

/// A detector's output for one frame of one camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionBatch {
    pub camera_id: CameraId,
    pub timestamp: f64,
    #[serde(default)]
    pub tracks: Vec<DetectionRecord>,
}

impl DetectionBatch {
    pub fn observations(&self) -> Vec<Observation> {
        self.tracks
            .iter()
            .map(|t| Observation {
                camera_id: self.camera_id.clone(),
                local_track_id: t.track_id,
                bbox: t.bbox,
                confidence: t.confidence,
                timestamp: self.timestamp,
            })
            .collect()
    }
}

/// A camera reporting where it is and where it points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseUpdate {
    pub camera_id: CameraId,
    pub position: [f64; 2],
    pub heading_deg: f64,
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub horizontal_fov_deg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_height: Option<u32>,
}

// ============================================================================
// OUTBOUND WIRE FORMATS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalTrackRecord {
    pub id: TrackId,
    pub position: [f64; 2],
    pub confidence: f64,
    pub last_seen: f64,
    pub source_cameras: Vec<CameraId>,
}

/// Published fusion snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionOutput {
    pub global_tracks: Vec<GlobalTrackRecord>,
    pub timestamp: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentRecord {
    pub target_id: TargetId,
    pub agent_id: AgentId,
    /// Metres, rounded to millimetres
    pub distance: f64,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct XY {
    pub x: f64,
    pub y: f64,
}

impl From<Point2<f64>> for XY {
    fn from(p: Point2<f64>) -> Self {
        Self { x: p.x, y: p.y }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub position: XY,
    pub current_assignment: Option<TargetId>,
}

/// Published assignment snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentOutput {
    pub assignments: Vec<AssignmentRecord>,
    pub agents: BTreeMap<AgentId, AgentRecord>,
    pub unassigned_targets: Vec<TargetId>,
    pub algorithm: Algorithm,
    pub timestamp: f64,
}

/// Debug matrix keyed by target id then agent id; unreachable pairs are `null`.
pub type DistanceMatrixOutput = BTreeMap<String, BTreeMap<AgentId, Option<f64>>>;

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_serializes_as_array() {
        let bbox = BoundingBox::new(1.0, 2.0, 3.0, 6.0);
        assert_eq!(serde_json::to_string(&bbox).unwrap(), "[1.0,2.0,3.0,6.0]");
        assert_eq!(bbox.height(), 4.0);
        assert_eq!(bbox.center_x(), 2.0);
    }

    #[test]
    fn test_detection_batch_from_json() {
        let batch: DetectionBatch = serde_json::from_str(
            r#"{"camera_id": "cam_1", "timestamp": 12.5,
                "tracks": [{"track_id": 7, "bbox": [300, 100, 340, 300], "confidence": 0.9}]}"#,
        )
        .unwrap();

        let observations = batch.observations();
        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].camera_id, "cam_1");
        assert_eq!(observations[0].local_track_id, 7);
        assert_eq!(observations[0].timestamp, 12.5);
        assert_eq!(observations[0].bbox.height(), 200.0);
    }

    #[test]
    fn test_pose_update_optional_intrinsics() {
        let update: PoseUpdate = serde_json::from_str(
            r#"{"camera_id": "cam_2", "position": [10.0, 0.0], "heading_deg": 135.0}"#,
        )
        .unwrap();
        assert_eq!(update.horizontal_fov_deg, None);
        assert_eq!(update.timestamp, 0.0);
    }

    #[test]
    fn test_source_cameras_stay_unique() {
        let mut track = GlobalTrack {
            id: 1,
            position: Point2::new(0.0, 0.0),
            confidence: 0.5,
            last_seen: 0.0,
            source_cameras: vec!["cam_1".into()],
        };
        track.add_source("cam_2");
        track.add_source("cam_1");
        assert_eq!(track.source_cameras, vec!["cam_1", "cam_2"]);
    }

    #[test]
    fn test_assignment_record_rounds_distance() {
        let a = Assignment {
            target_id: 1,
            agent_id: "alice".into(),
            distance: 1.41421356,
            timestamp: 0.0,
        };
        assert_eq!(a.to_record().distance, 1.414);
    }

    #[test]
    fn test_target_activity_is_strict() {
        let t = Target::new(1, 0.0, 0.0, 0.9, 10.0);
        assert!(t.is_active(14.9, 5.0));
        assert!(!t.is_active(15.0, 5.0));
    }
}
