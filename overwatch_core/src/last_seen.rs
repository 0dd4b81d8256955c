//! Last-seen memory for people fusion has stopped tracking.
//!
//! Fusion hard-deletes a track once it goes quiet. Operators still want to
//! know where that person was last seen, so this layer keeps the final
//! snapshot of every track for `ttl_s` and reports it as not visible.

use crate::schemas::{CameraId, GlobalTrack, TrackId, XY};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// A person as reported to operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedPerson {
    pub track_id: TrackId,
    pub position: XY,
    /// Zero when the person is no longer visible
    pub confidence: f64,
    pub last_seen_time: f64,
    pub source_cameras: Vec<CameraId>,
    pub visible: bool,
}

pub struct LastSeenMemory {
    ttl_s: f64,
    memory: BTreeMap<TrackId, GlobalTrack>,
}

impl LastSeenMemory {
    pub fn new(ttl_s: f64) -> Self {
        Self {
            ttl_s,
            memory: BTreeMap::new(),
        }
    }

    /// Store the final state of tracks fusion just evicted.
    pub fn remember(&mut self, evicted: &[GlobalTrack]) {
        for track in evicted {
            self.memory.insert(track.id, track.clone());
        }
    }

    /// Merge the live tracks with remembered ones, ordered by track id.
    ///
    /// Live tracks refresh the memory; remembered tracks older than the TTL
    /// are forgotten.
    pub fn update(&mut self, live: &[GlobalTrack], now: f64) -> Vec<TrackedPerson> {
        let visible: HashSet<TrackId> = live.iter().map(|t| t.id).collect();
        for track in live {
            self.memory.insert(track.id, track.clone());
        }

        let ttl = self.ttl_s;
        self.memory.retain(|id, t| visible.contains(id) || now - t.last_seen <= ttl);

        self.memory
            .values()
            .map(|t| {
                let is_visible = visible.contains(&t.id);
                TrackedPerson {
                    track_id: t.id,
                    position: t.position.into(),
                    confidence: if is_visible { t.confidence } else { 0.0 },
                    last_seen_time: t.last_seen,
                    source_cameras: t.source_cameras.clone(),
                    visible: is_visible,
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.memory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point2;

    fn track(id: TrackId, last_seen: f64) -> GlobalTrack {
        GlobalTrack {
            id,
            position: Point2::new(id as f64, 0.0),
            confidence: 0.8,
            last_seen,
            source_cameras: vec!["cam_1".into()],
        }
    }

    #[test]
    fn test_evicted_track_is_remembered() {
        let mut memory = LastSeenMemory::new(30.0);
        memory.update(&[track(1, 0.0), track(2, 0.0)], 0.0);

        let people = memory.update(&[track(2, 6.0)], 6.0);

        assert_eq!(people.len(), 2);
        assert!(!people[0].visible);
        assert_eq!(people[0].confidence, 0.0);
        assert_eq!(people[0].last_seen_time, 0.0);
        assert!(people[1].visible);
        assert_eq!(people[1].confidence, 0.8);
    }

    #[test]
    fn test_remembered_track_needs_no_prior_poll() {
        let mut memory = LastSeenMemory::new(30.0);
        memory.remember(&[track(3, 1.0)]);
        assert_eq!(memory.len(), 1);

        let people = memory.update(&[], 2.0);
        assert_eq!(people.len(), 1);
        assert_eq!(people[0].track_id, 3);
        assert!(!people[0].visible);
        assert_eq!(people[0].last_seen_time, 1.0);
    }

    #[test]
    fn test_memory_expires() {
        let mut memory = LastSeenMemory::new(30.0);
        memory.update(&[track(1, 0.0)], 0.0);

        assert_eq!(memory.update(&[], 30.0).len(), 1);
        assert!(memory.update(&[], 30.5).is_empty());
        assert!(memory.is_empty());
    }
}
