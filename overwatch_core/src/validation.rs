//! Ground truth validation for fused tracks.
//!
//! Each frame, every ground-truth person is matched to the nearest fused
//! track. Matches inside the association threshold feed the error metrics;
//! persons with no track that close count as missed, and tracks that match
//! no person count as ghosts.
//!
//! Metrics:
//! - Position error (RMSE, mean, max)
//! - Coverage (fraction of persons ever matched)
//! - Miss and ghost rates

use crate::schemas::GlobalTrack;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

// =============================================================================
// GROUND TRUTH
// =============================================================================

/// Where a simulated person really is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundTruthEntry {
    pub person_id: u64,
    pub position: Point2<f64>,
    pub timestamp: f64,
}

// =============================================================================
// METRICS
// =============================================================================

/// Error statistics for one person.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonMetrics {
    pub matched_frames: usize,
    pub missed_frames: usize,
    pub error_sum_squared: f64,
    pub max_error: f64,
}

impl PersonMetrics {
    fn new() -> Self {
        Self {
            matched_frames: 0,
            missed_frames: 0,
            error_sum_squared: 0.0,
            max_error: 0.0,
        }
    }

    pub fn rmse(&self) -> f64 {
        if self.matched_frames > 0 {
            (self.error_sum_squared / self.matched_frames as f64).sqrt()
        } else {
            0.0
        }
    }
}

/// Aggregate statistics across a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalMetrics {
    pub total_frames: usize,
    pub ground_truth_samples: usize,
    pub matched_samples: usize,
    pub missed_samples: usize,
    pub ghost_tracks: usize,
    pub track_samples: usize,
    pub error_sum: f64,
    pub error_sum_squared: f64,
    pub max_error: f64,
}

impl GlobalMetrics {
    pub fn mean_error(&self) -> f64 {
        if self.matched_samples > 0 {
            self.error_sum / self.matched_samples as f64
        } else {
            0.0
        }
    }

    pub fn rmse(&self) -> f64 {
        if self.matched_samples > 0 {
            (self.error_sum_squared / self.matched_samples as f64).sqrt()
        } else {
            0.0
        }
    }

    /// Fraction of ground-truth samples that had a track nearby.
    pub fn detection_rate(&self) -> f64 {
        if self.ground_truth_samples > 0 {
            self.matched_samples as f64 / self.ground_truth_samples as f64
        } else {
            0.0
        }
    }

    /// Fraction of track samples that matched nobody.
    pub fn ghost_rate(&self) -> f64 {
        if self.track_samples > 0 {
            self.ghost_tracks as f64 / self.track_samples as f64
        } else {
            0.0
        }
    }
}

// =============================================================================
// VALIDATION SESSION
// =============================================================================

pub struct ValidationSession {
    per_person: BTreeMap<u64, PersonMetrics>,
    global: GlobalMetrics,
    /// Matches farther than this (metres) count as misses
    association_threshold: f64,
}

impl ValidationSession {
    pub fn new() -> Self {
        Self::with_threshold(2.0)
    }

    pub fn with_threshold(threshold_m: f64) -> Self {
        Self {
            per_person: BTreeMap::new(),
            global: GlobalMetrics::default(),
            association_threshold: threshold_m,
        }
    }

    /// Score one frame of fused tracks against ground truth.
    pub fn record_frame(&mut self, ground_truth: &[GroundTruthEntry], tracks: &[GlobalTrack]) {
        self.global.total_frames += 1;
        self.global.track_samples += tracks.len();

        let mut matched_tracks = HashSet::new();
        for gt in ground_truth {
            self.global.ground_truth_samples += 1;
            let metrics = self.per_person.entry(gt.person_id).or_insert_with(PersonMetrics::new);

            let nearest = tracks
                .iter()
                .map(|t| (t.id, nalgebra::distance(&t.position, &gt.position)))
                .min_by(|a, b| a.1.total_cmp(&b.1));

            match nearest {
                Some((track_id, error)) if error <= self.association_threshold => {
                    matched_tracks.insert(track_id);
                    metrics.matched_frames += 1;
                    metrics.error_sum_squared += error * error;
                    metrics.max_error = metrics.max_error.max(error);

                    self.global.matched_samples += 1;
                    self.global.error_sum += error;
                    self.global.error_sum_squared += error * error;
                    self.global.max_error = self.global.max_error.max(error);
                }
                _ => {
                    metrics.missed_frames += 1;
                    self.global.missed_samples += 1;
                }
            }
        }

        self.global.ghost_tracks += tracks.iter().filter(|t| !matched_tracks.contains(&t.id)).count();
    }

    pub fn report(&self) -> ValidationReport {
        let persons = self.per_person.len();
        let covered = self.per_person.values().filter(|m| m.matched_frames > 0).count();
        ValidationReport {
            global: self.global.clone(),
            per_person: self.per_person.clone(),
            coverage: if persons > 0 { covered as f64 / persons as f64 } else { 0.0 },
            association_threshold: self.association_threshold,
        }
    }
}

impl Default for ValidationSession {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// VALIDATION REPORT
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub global: GlobalMetrics,
    pub per_person: BTreeMap<u64, PersonMetrics>,
    /// Fraction of persons matched at least once
    pub coverage: f64,
    pub association_threshold: f64,
}

impl ValidationReport {
    pub fn passes_criteria(&self, max_rmse: f64, min_detection_rate: f64) -> bool {
        self.global.rmse() <= max_rmse && self.global.detection_rate() >= min_detection_rate
    }
}

// =============================================================================
// TESTS
// =============================================================================
