//! The "FUSION" Engine - Multi-Camera Track Association
//!
//! Keeps one global track per person no matter how many cameras see them.
//!
//! Each frame runs a 4-stage pipeline:
//! 1. Camera Lookup (unknown cameras are dropped, never queued)
//! 2. Projection (pixel box → world estimate, bad boxes skipped)
//! 3. Association (nearest unmatched track strictly inside the match radius)
//! 4. Merge / Spawn, then TTL eviction
//!
//! Tracks live in an ordered map so scans, ties and snapshots are
//! deterministic. Track ids come from a counter and are never reused.

use crate::config::{ConfigError, FusionConfig};
use crate::overwatch_projection::{self, ProjectionError};
use crate::schemas::{
    CameraId, CameraPose, DetectionBatch, FusionOutput, GlobalTrack, Observation, PoseUpdate, TrackId,
};
use nalgebra::Point2;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, trace};

// ============================================================================
// FRAME SUMMARY
// ============================================================================

/// What one call to `process_frame` did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameSummary {
    pub camera_id: CameraId,
    /// False when the camera has no registered pose
    pub accepted: bool,
    pub associated: usize,
    pub spawned: usize,
    /// Observations that could not be projected
    pub skipped: usize,
    /// Final state of each track removed by the TTL sweep
    pub evicted: Vec<GlobalTrack>,
}

/// A projected observation waiting for association.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    position: Point2<f64>,
    confidence: f64,
}

// ============================================================================
// FUSION ENGINE
// ============================================================================

pub struct FusionEngine {
    config: FusionConfig,
    camera_poses: HashMap<CameraId, CameraPose>,
    tracks: BTreeMap<TrackId, GlobalTrack>,
    next_id: TrackId,
}

impl FusionEngine {
    pub fn new(config: FusionConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            camera_poses: HashMap::new(),
            tracks: BTreeMap::new(),
            next_id: 1,
        })
    }

    pub fn with_defaults() -> Self {
        Self {
            config: FusionConfig::default(),
            camera_poses: HashMap::new(),
            tracks: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // Cameras
    // ------------------------------------------------------------------------

    /// Last write wins.
    pub fn update_camera_pose(&mut self, pose: CameraPose) {
        self.camera_poses.insert(pose.id.clone(), pose);
    }

    /// Apply a pose feed message. Known cameras keep their intrinsics unless
    /// the message carries new ones; new cameras start from the configured
    /// defaults.
    pub fn apply_pose_update(&mut self, update: &PoseUpdate) {
        let defaults = &self.config.camera_defaults;
        let pose = self
            .camera_poses
            .entry(update.camera_id.clone())
            .or_insert_with(|| {
                CameraPose::from_defaults(update.camera_id.clone(), 0.0, 0.0, 0.0, defaults)
            });

        pose.position = Point2::new(update.position[0], update.position[1]);
        pose.heading_deg = update.heading_deg;
        if let Some(fov) = update.horizontal_fov_deg {
            pose.horizontal_fov_deg = fov;
        }
        if let Some(width) = update.image_width {
            pose.image_width = width;
        }
        if let Some(height) = update.image_height {
            pose.image_height = height;
        }
    }

    pub fn camera_pose(&self, camera_id: &str) -> Option<&CameraPose> {
        self.camera_poses.get(camera_id)
    }

    pub fn camera_count(&self) -> usize {
        self.camera_poses.len()
    }

    // ------------------------------------------------------------------------
    // Frames
    // ------------------------------------------------------------------------

    pub fn process_batch(&mut self, batch: &DetectionBatch) -> FrameSummary {
        self.process_frame(&batch.camera_id, &batch.observations(), batch.timestamp)
    }

    /// Fold one camera's detections into the global track set.
    pub fn process_frame(
        &mut self,
        camera_id: &str,
        observations: &[Observation],
        timestamp: f64,
    ) -> FrameSummary {
        let mut summary = FrameSummary {
            camera_id: camera_id.to_string(),
            ..Default::default()
        };

        // Stage 1: Camera Lookup
        let Some(camera) = self.camera_poses.get(camera_id).cloned() else {
            debug!(camera_id, "Dropping frame from unknown camera");
            return summary;
        };
        summary.accepted = true;

        // Stage 2: Projection
        let mut candidates = Vec::with_capacity(observations.len());
        for obs in observations {
            match self.project(&camera, obs) {
                Ok(candidate) => candidates.push(candidate),
                Err(e) => {
                    debug!(camera_id, local_track_id = obs.local_track_id, error = %e, "Skipping observation");
                    summary.skipped += 1;
                }
            }
        }

        // Stages 3 + 4: Association, Merge / Spawn
        // Only matched tracks are locked for the frame; a track spawned here
        // can still absorb a later candidate from the same camera.
        let mut used: HashSet<TrackId> = HashSet::new();
        for candidate in candidates {
            match self.associate(&candidate, &used) {
                Some((track_id, distance)) => {
                    trace!(camera_id, track_id, distance, "Associated observation");
                    if let Some(track) = self.tracks.get_mut(&track_id) {
                        merge_observation(track, candidate.position, candidate.confidence, camera_id, timestamp);
                    }
                    used.insert(track_id);
                    summary.associated += 1;
                }
                None => {
                    let track_id = self.spawn_track(&candidate, camera_id, timestamp);
                    trace!(camera_id, track_id, "Spawned track");
                    summary.spawned += 1;
                }
            }
        }

        summary.evicted = self.evict_stale(timestamp);

        debug!(
            camera_id,
            associated = summary.associated,
            spawned = summary.spawned,
            skipped = summary.skipped,
            evicted = summary.evicted.len(),
            tracks = self.tracks.len(),
            "Processed frame"
        );
        summary
    }

    fn project(&self, camera: &CameraPose, obs: &Observation) -> Result<Candidate, ProjectionError> {
        if !obs.confidence.is_finite() {
            return Err(ProjectionError::NonFinite("confidence"));
        }
        let estimate = overwatch_projection::estimate(camera, &obs.bbox, self.config.person_height_m)?;
        Ok(Candidate {
            position: estimate.position(),
            confidence: obs.confidence.clamp(0.0, 1.0),
        })
    }

    /// Closest unmatched track strictly inside the match radius. The ordered
    /// scan plus strict comparison leaves ties on the lower id.
    fn associate(&self, candidate: &Candidate, used: &HashSet<TrackId>) -> Option<(TrackId, f64)> {
        let mut best: Option<(TrackId, f64)> = None;
        for (id, track) in &self.tracks {
            if used.contains(id) {
                continue;
            }
            let d = nalgebra::distance(&track.position, &candidate.position);
            if d >= self.config.match_radius_m {
                continue;
            }
            if best.map_or(true, |(_, best_d)| d < best_d) {
                best = Some((*id, d));
            }
        }
        best
    }

    fn spawn_track(&mut self, candidate: &Candidate, camera_id: &str, timestamp: f64) -> TrackId {
        let id = self.next_id;
        self.next_id += 1;
        self.tracks.insert(
            id,
            GlobalTrack {
                id,
                position: candidate.position,
                confidence: candidate.confidence,
                last_seen: timestamp,
                source_cameras: vec![camera_id.to_string()],
            },
        );
        id
    }

    /// Remove tracks older than the TTL and return them as they were last
    /// seen. A track exactly at the TTL survives.
    pub fn evict_stale(&mut self, now: f64) -> Vec<GlobalTrack> {
        let ttl = self.config.track_ttl_s;
        let (stale, live): (BTreeMap<_, _>, BTreeMap<_, _>) = std::mem::take(&mut self.tracks)
            .into_iter()
            .partition(|(_, t)| now - t.last_seen > ttl);
        self.tracks = live;
        stale.into_values().collect()
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Snapshot of all live tracks ordered by id.
    pub fn global_tracks(&self) -> Vec<GlobalTrack> {
        self.tracks.values().cloned().collect()
    }

    pub fn track(&self, id: TrackId) -> Option<&GlobalTrack> {
        self.tracks.get(&id)
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn output(&self, timestamp: f64) -> FusionOutput {
        FusionOutput {
            global_tracks: self.tracks.values().map(GlobalTrack::to_record).collect(),
            timestamp,
        }
    }
}

/// Confidence-weighted position merge with midpoint confidence.
pub fn merge_observation(
    track: &mut GlobalTrack,
    position: Point2<f64>,
    confidence: f64,
    camera_id: &str,
    timestamp: f64,
) {
    let total = track.confidence + confidence;
    track.position = if total > 0.0 {
        Point2::from((track.position.coords * track.confidence + position.coords * confidence) / total)
    } else {
        nalgebra::center(&track.position, &position)
    };
    track.confidence = ((track.confidence + confidence) / 2.0).min(1.0);
    track.last_seen = timestamp;
    track.add_source(camera_id);
}

// ============================================================================
// TESTS
// ============================================================================
