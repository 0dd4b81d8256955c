//! JSON exporter for replaying simulation runs.
//!
//! Exports sampled frames (ground truth, fused tracks, assignments and camera
//! poses) for offline plotting.

use crate::error::SimError;
use crate::oracle::SimCamera;
use overwatch_core::schemas::{AssignmentRecord, GlobalTrackRecord};
use overwatch_core::validation::GroundTruthEntry;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// A single frame of simulation data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimFrame {
    /// Simulation time in seconds
    pub time_sec: f64,

    pub ground_truth: Vec<PersonPosition>,

    pub tracks: Vec<GlobalTrackRecord>,

    pub assignments: Vec<AssignmentRecord>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cameras: Vec<CameraFrame>,

    /// Events (hand-offs, evictions, ...)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<SimEvent>,
}

/// Where one simulated person really is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonPosition {
    pub id: u64,
    pub x: f64,
    pub y: f64,
}

impl From<&GroundTruthEntry> for PersonPosition {
    fn from(entry: &GroundTruthEntry) -> Self {
        Self {
            id: entry.person_id,
            x: entry.position.x,
            y: entry.position.y,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraFrame {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub heading_deg: f64,
    pub fov_deg: f64,
}

impl From<&SimCamera> for CameraFrame {
    fn from(camera: &SimCamera) -> Self {
        Self {
            id: camera.pose.id.clone(),
            x: camera.pose.position.x,
            y: camera.pose.position.y,
            heading_deg: camera.pose.heading_deg,
            fov_deg: camera.pose.horizontal_fov_deg,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimEvent {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

impl SimEvent {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: None,
        }
    }
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    pub scenario: String,
    pub seed: u64,
    pub duration_sec: f64,
    pub frames: Vec<SimFrame>,
    pub passed: bool,

    /// Final tracking RMSE if the scenario measured one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_rmse: Option<f64>,
}

impl SimExport {
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            duration_sec: 0.0,
            frames: Vec::new(),
            passed: false,
            final_rmse: None,
        }
    }

    pub fn add_frame(&mut self, frame: SimFrame) {
        self.duration_sec = frame.time_sec;
        self.frames.push(frame);
    }

    pub fn finalize(&mut self, passed: bool, rmse: Option<f64>) {
        self.passed = passed;
        self.final_rmse = rmse;
    }

    /// Writes pretty-printed JSON to `path`.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), SimError> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_tracks_duration_and_serializes() {
        let mut export = SimExport::new("hysteresis", 42);
        export.add_frame(SimFrame {
            time_sec: 1.5,
            ground_truth: vec![PersonPosition { id: 1, x: 2.0, y: 3.0 }],
            tracks: vec![],
            assignments: vec![],
            cameras: vec![],
            events: vec![SimEvent::info("handoff 102: bob -> diana")],
        });
        export.finalize(true, Some(0.25));

        assert_eq!(export.duration_sec, 1.5);
        let json = serde_json::to_value(&export).unwrap();
        assert_eq!(json["frames"][0]["ground_truth"][0]["x"], 2.0);
        assert!(json["frames"][0].get("cameras").is_none());
        assert_eq!(json["final_rmse"], 0.25);
    }
}
