//! Coordinator - Wires the engines to the environment context.
//!
//! This module is the integration layer between the pure engines (fusion,
//! assignment, last-seen memory) and the environment abstraction
//! (`OverwatchContext` for time, `OutputSink` for publication).
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Coordinator                           │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │  Context: OverwatchContext                             │  │
//! │  │  • timestamp() → staleness clock for every call        │  │
//! │  │  • sleep()     → push interval                         │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! │                                                              │
//! │   detections ─► ┌─────────┐  snapshot  ┌────────────┐        │
//! │   poses ──────► │ FUSION  │ ─────────► │ ASSIGNMENT │ ◄─ agents
//! │                 └─────────┘            └────────────┘        │
//! │                      │                       │               │
//! │                      └──────► Sink ◄─────────┘               │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each engine sits behind its own mutex and the two are never held
//! together: fusion hands assignment a cloned `Vec<GlobalTrack>`.
//!
//! # Usage
//!
//! ```ignore
//! use overwatch_core::coordinator::Coordinator;
//! use overwatch_core::config::CoordinatorConfig;
//! use overwatch_env::{BroadcastSink, TokioContext};
//!
//! let sink = Arc::new(BroadcastSink::default());
//! let coordinator = Coordinator::new(TokioContext::shared(), sink.clone(), CoordinatorConfig::default())?;
//! coordinator.run_push_loop().await?;
//! ```

use crate::config::{ConfigError, CoordinatorConfig};
use crate::distance::DistanceProvider;
use crate::last_seen::{LastSeenMemory, TrackedPerson};
use crate::overwatch_assignment::AssignmentEngine;
use crate::overwatch_fusion::{FrameSummary, FusionEngine};
use crate::schemas::{
    AgentId, AssignmentOutput, DetectionBatch, DistanceMatrixOutput, FusionOutput, GlobalTrack, PoseUpdate,
    TargetId,
};
use overwatch_env::{EnvError, Envelope, OutputSink, OverwatchContext, Topic};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Malformed message: {0}")]
    Decode(String),

    #[error("Output error: {0}")]
    Env(#[from] EnvError),
}

/// Messages accepted by [`Coordinator::handle_json`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    CameraPose(PoseUpdate),
    Detections(DetectionBatch),
    Agent {
        agent_id: AgentId,
        position: [f64; 2],
        #[serde(default)]
        capacity: Option<u32>,
    },
    Target {
        target_id: TargetId,
        position: [f64; 2],
        confidence: f64,
    },
    RemoveAgent {
        agent_id: AgentId,
    },
    RemoveTarget {
        target_id: TargetId,
    },
}

/// Both published views from one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub fusion: FusionOutput,
    pub assignment: AssignmentOutput,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns the engines and drives them from one clock.
///
/// Generic over the context and sink, so the same code runs in production
/// (tokio) or in the deterministic simulator.
pub struct Coordinator<Ctx, Sink>
where
    Ctx: OverwatchContext,
    Sink: OutputSink,
{
    /// Environment context
    pub context: Arc<Ctx>,

    /// Where snapshots are published
    pub sink: Arc<Sink>,

    config: CoordinatorConfig,
    fusion: Mutex<FusionEngine>,
    assignment: Mutex<AssignmentEngine>,
    last_seen: Mutex<LastSeenMemory>,
    ticks: AtomicU64,
}

impl<Ctx, Sink> Coordinator<Ctx, Sink>
where
    Ctx: OverwatchContext,
    Sink: OutputSink,
{
    pub fn new(context: Arc<Ctx>, sink: Arc<Sink>, config: CoordinatorConfig) -> Result<Self, CoordinatorError> {
        config.validate()?;
        let fusion = FusionEngine::new(config.fusion.clone())?;
        let assignment = AssignmentEngine::new(config.assignment.clone())?;
        let last_seen = LastSeenMemory::new(config.last_seen_ttl_s);

        info!(
            name = %config.name,
            algorithm = %config.assignment.algorithm,
            "Coordinator ready"
        );

        Ok(Self {
            context,
            sink,
            config,
            fusion: Mutex::new(fusion),
            assignment: Mutex::new(assignment),
            last_seen: Mutex::new(last_seen),
            ticks: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn now(&self) -> f64 {
        self.context.timestamp()
    }

    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn set_distance_provider(&self, provider: Box<dyn DistanceProvider>) {
        lock(&self.assignment).set_distance_provider(provider);
    }

    // ------------------------------------------------------------------------
    // Inputs
    // ------------------------------------------------------------------------

    pub fn ingest_pose(&self, update: &PoseUpdate) {
        lock(&self.fusion).apply_pose_update(update);
    }

    /// Fuse one detector frame and refresh the assignment targets.
    pub fn ingest_detections(&self, batch: &DetectionBatch) -> FrameSummary {
        let (summary, tracks) = {
            let mut fusion = lock(&self.fusion);
            let summary = fusion.process_batch(batch);
            (summary, fusion.global_tracks())
        };
        if summary.accepted {
            self.hand_off(&summary.evicted, &tracks);
        }
        summary
    }

    /// Evicted tracks go to last-seen memory and leave assignment; live
    /// tracks refresh the targets.
    fn hand_off(&self, evicted: &[GlobalTrack], tracks: &[GlobalTrack]) {
        if !evicted.is_empty() {
            lock(&self.last_seen).remember(evicted);
        }
        let mut assignment = lock(&self.assignment);
        for track in evicted {
            assignment.remove_target(track.id);
        }
        assignment.sync_tracks(tracks);
    }

    pub fn update_agent(&self, id: &str, x: f64, y: f64, capacity: Option<u32>) -> AssignmentOutput {
        let now = self.now();
        let mut assignment = lock(&self.assignment);
        assignment.update_agent(id, x, y, capacity, now);
        assignment.run(now);
        assignment.output(now)
    }

    pub fn remove_agent(&self, id: &str) -> AssignmentOutput {
        let now = self.now();
        let mut assignment = lock(&self.assignment);
        assignment.remove_agent(id);
        assignment.run(now);
        assignment.output(now)
    }

    pub fn update_target(&self, id: TargetId, x: f64, y: f64, confidence: f64) -> AssignmentOutput {
        let now = self.now();
        let mut assignment = lock(&self.assignment);
        assignment.update_target(id, x, y, confidence, now);
        assignment.run(now);
        assignment.output(now)
    }

    pub fn remove_target(&self, id: TargetId) -> AssignmentOutput {
        let now = self.now();
        let mut assignment = lock(&self.assignment);
        assignment.remove_target(id);
        assignment.run(now);
        assignment.output(now)
    }

    pub fn handle(&self, message: InboundMessage) {
        match message {
            InboundMessage::CameraPose(update) => self.ingest_pose(&update),
            InboundMessage::Detections(batch) => {
                self.ingest_detections(&batch);
            }
            InboundMessage::Agent { agent_id, position, capacity } => {
                self.update_agent(&agent_id, position[0], position[1], capacity);
            }
            InboundMessage::Target { target_id, position, confidence } => {
                self.update_target(target_id, position[0], position[1], confidence);
            }
            InboundMessage::RemoveAgent { agent_id } => {
                self.remove_agent(&agent_id);
            }
            InboundMessage::RemoveTarget { target_id } => {
                self.remove_target(target_id);
            }
        }
    }

    /// Decode and apply one JSON message. A bad message leaves state alone.
    pub fn handle_json(&self, raw: &str) -> Result<(), CoordinatorError> {
        let message: InboundMessage = serde_json::from_str(raw).map_err(|e| {
            debug!(error = %e, "Rejecting malformed message");
            CoordinatorError::Decode(e.to_string())
        })?;
        self.handle(message);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Outputs
    // ------------------------------------------------------------------------

    /// Evict stale tracks, re-run assignment and return both views.
    pub fn tick(&self) -> Snapshot {
        let now = self.now();
        let (fusion, evicted, tracks) = {
            let mut engine = lock(&self.fusion);
            let evicted = engine.evict_stale(now);
            (engine.output(now), evicted, engine.global_tracks())
        };
        self.hand_off(&evicted, &tracks);

        let assignment = {
            let mut engine = lock(&self.assignment);
            engine.run(now);
            engine.output(now)
        };
        self.ticks.fetch_add(1, Ordering::Relaxed);
        Snapshot { fusion, assignment }
    }

    pub fn fusion_output(&self) -> FusionOutput {
        lock(&self.fusion).output(self.now())
    }

    pub fn assignment_output(&self) -> AssignmentOutput {
        lock(&self.assignment).output(self.now())
    }

    pub fn distance_matrix_output(&self) -> DistanceMatrixOutput {
        lock(&self.assignment).distance_matrix_output(self.now())
    }

    pub fn global_tracks(&self) -> Vec<GlobalTrack> {
        lock(&self.fusion).global_tracks()
    }

    /// Live tracks plus recently lost ones.
    pub fn tracked_persons(&self) -> Vec<TrackedPerson> {
        let tracks = self.global_tracks();
        lock(&self.last_seen).update(&tracks, self.now())
    }

    /// Run a closure against the assignment engine.
    pub fn with_assignment<R>(&self, f: impl FnOnce(&mut AssignmentEngine) -> R) -> R {
        f(&mut lock(&self.assignment))
    }

    // ------------------------------------------------------------------------
    // Publication
    // ------------------------------------------------------------------------

    /// Publish both views. Returns the number of receivers of the last send.
    pub async fn publish(&self, snapshot: &Snapshot) -> Result<usize, CoordinatorError> {
        let ts_ms = (snapshot.fusion.timestamp * 1000.0) as u64;
        self.sink.publish(Envelope::json(Topic::Fusion, &snapshot.fusion, ts_ms)?).await?;
        let receivers = self
            .sink
            .publish(Envelope::json(Topic::Assignment, &snapshot.assignment, ts_ms)?)
            .await?;
        Ok(receivers)
    }

    /// Tick and publish every `push_interval_ms` until the sink closes.
    ///
    /// Returns the total tick count.
    pub async fn run_push_loop(&self) -> Result<u64, CoordinatorError> {
        let interval = Duration::from_millis(self.config.push_interval_ms);
        while !self.sink.is_closed() {
            let snapshot = self.tick();
            match self.publish(&snapshot).await {
                Ok(_) => {}
                Err(CoordinatorError::Env(EnvError::SinkClosed(topic))) => {
                    debug!(%topic, "Sink closed during publish");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Push loop stopped");
                    return Err(e);
                }
            }
            self.context.sleep(interval).await;
        }
        info!(ticks = self.tick_count(), "Push loop finished");
        Ok(self.tick_count())
    }

    /// Run the push loop as a background task on the context's executor.
    pub fn spawn_push_loop(self: &Arc<Self>) {
        let coordinator = Arc::clone(self);
        self.context.spawn("overwatch-push", async move {
            if let Err(e) = coordinator.run_push_loop().await {
                warn!(error = %e, "Background push loop failed");
            }
        });
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Algorithm, AssignmentConfig};
    use crate::overwatch_projection::bbox_for;
    use crate::schemas::{CameraPose, DetectionRecord};
    use overwatch_env::{BroadcastSink, TokioContext};

    fn coordinator(config: CoordinatorConfig) -> Coordinator<TokioContext, BroadcastSink> {
        Coordinator::new(TokioContext::shared(), Arc::new(BroadcastSink::default()), config).unwrap()
    }

    fn frame(camera: &CameraPose, points: &[(f64, f64)], timestamp: f64) -> DetectionBatch {
        DetectionBatch {
            camera_id: camera.id.clone(),
            timestamp,
            tracks: points
                .iter()
                .enumerate()
                .map(|(i, (x, y))| DetectionRecord {
                    track_id: i as u64,
                    bbox: bbox_for(camera, *x, *y, 1.7).unwrap(),
                    confidence: 0.9,
                })
                .collect(),
        }
    }

    fn register(c: &Coordinator<TokioContext, BroadcastSink>, camera: &CameraPose) {
        c.ingest_pose(&PoseUpdate {
            camera_id: camera.id.clone(),
            position: [camera.position.x, camera.position.y],
            heading_deg: camera.heading_deg,
            timestamp: 0.0,
            horizontal_fov_deg: None,
            image_width: None,
            image_height: None,
        });
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = CoordinatorConfig::default();
        config.assignment.reassign_threshold_m = 0.0;
        let result = Coordinator::new(TokioContext::shared(), Arc::new(BroadcastSink::default()), config);
        assert!(matches!(result, Err(CoordinatorError::Config(_))));
    }

    #[test]
    fn test_detections_flow_into_assignment() {
        let c = coordinator(CoordinatorConfig::default());
        let camera = CameraPose::new("cam_1", 0.0, 0.0, 45.0);
        register(&c, &camera);
        c.update_agent("alice", 4.0, 4.0, None);

        let summary = c.ingest_detections(&frame(&camera, &[(5.0, 5.0)], c.now()));
        assert!(summary.accepted);
        assert_eq!(summary.spawned, 1);

        let snapshot = c.tick();
        assert_eq!(snapshot.fusion.global_tracks.len(), 1);
        assert_eq!(snapshot.assignment.assignments.len(), 1);
        assert_eq!(snapshot.assignment.assignments[0].agent_id, "alice");
        assert_eq!(snapshot.assignment.assignments[0].target_id, snapshot.fusion.global_tracks[0].id);
    }

    #[test]
    fn test_unknown_camera_keeps_last_state() {
        let c = coordinator(CoordinatorConfig::default());
        c.update_agent("alice", 0.0, 0.0, None);
        c.update_target(500, 1.0, 0.0, 0.9);

        let camera = CameraPose::new("ghost_cam", 0.0, 0.0, 0.0);
        let summary = c.ingest_detections(&frame(&camera, &[(5.0, 0.0)], c.now()));

        assert!(!summary.accepted);
        assert_eq!(c.assignment_output().assignments.len(), 1);
    }

    #[test]
    fn test_handle_json_messages() {
        let c = coordinator(CoordinatorConfig::default());
        c.handle_json(r#"{"type": "agent", "agent_id": "bob", "position": [10.0, 0.0], "capacity": 2}"#)
            .unwrap();
        c.handle_json(r#"{"type": "target", "target_id": 7, "position": [9.0, 1.0], "confidence": 0.8}"#)
            .unwrap();

        assert!(matches!(c.handle_json(r#"{"type": "teleport"}"#), Err(CoordinatorError::Decode(_))));

        let out = c.assignment_output();
        assert_eq!(out.agents["bob"].current_assignment, Some(7));
        assert_eq!(c.with_assignment(|a| a.agent("bob").map(|b| b.max_assignments)), Some(2));

        c.handle_json(r#"{"type": "remove_target", "target_id": 7}"#).unwrap();
        assert!(c.assignment_output().assignments.is_empty());
    }

    #[test]
    fn test_distance_matrix_output() {
        let mut config = CoordinatorConfig::default();
        config.assignment = AssignmentConfig {
            algorithm: Algorithm::Greedy,
            ..Default::default()
        };
        let c = coordinator(config);
        c.update_agent("a", 0.0, 0.0, None);
        c.update_target(1, 3.0, 4.0, 0.5);

        assert_eq!(c.distance_matrix_output()["1"]["a"], Some(5.0));
    }

    #[test]
    fn test_tracked_persons_include_live_tracks() {
        let c = coordinator(CoordinatorConfig::default());
        let camera = CameraPose::new("cam_1", 0.0, 0.0, 0.0);
        register(&c, &camera);
        c.ingest_detections(&frame(&camera, &[(5.0, 0.0), (5.0, 2.0)], c.now()));

        let people = c.tracked_persons();
        assert_eq!(people.len(), 2);
        assert!(people.iter().all(|p| p.visible));
    }

    #[tokio::test]
    async fn test_track_evicted_between_polls_is_last_seen() {
        let mut config = CoordinatorConfig::default();
        config.fusion.track_ttl_s = 0.05;
        let c = coordinator(config);
        let camera = CameraPose::new("cam_1", 0.0, 0.0, 0.0);
        register(&c, &camera);
        let seen_at = c.now();
        c.ingest_detections(&frame(&camera, &[(5.0, 0.0)], seen_at));

        tokio::time::sleep(Duration::from_millis(120)).await;
        let snapshot = c.tick();
        assert!(snapshot.fusion.global_tracks.is_empty());
        assert!(snapshot.assignment.assignments.is_empty());

        let people = c.tracked_persons();
        assert_eq!(people.len(), 1);
        assert_eq!(people[0].track_id, 1);
        assert!(!people[0].visible);
        assert_eq!(people[0].confidence, 0.0);
        assert_eq!(people[0].last_seen_time, seen_at);
    }

    #[tokio::test]
    async fn test_push_loop_publishes_until_closed() {
        let sink = Arc::new(BroadcastSink::new(16));
        let config = CoordinatorConfig {
            push_interval_ms: 1,
            ..Default::default()
        };
        let c = Coordinator::new(TokioContext::shared(), sink.clone(), config).unwrap();
        c.update_agent("alice", 0.0, 0.0, None);
        let mut rx = sink.subscribe();

        let consumer = async {
            let fusion = rx.recv().await.unwrap();
            let assignment = rx.recv().await.unwrap();
            sink.close();
            (fusion, assignment)
        };
        let (ticks, (fusion, assignment)) = tokio::join!(c.run_push_loop(), consumer);

        assert!(ticks.unwrap() >= 1);
        assert_eq!(fusion.topic, Topic::Fusion);
        assert_eq!(assignment.topic, Topic::Assignment);
        let decoded: AssignmentOutput = assignment.decode().unwrap();
        assert!(decoded.agents.contains_key("alice"));
    }

    #[tokio::test]
    async fn test_spawned_push_loop_stops_when_sink_closes() {
        let sink = Arc::new(BroadcastSink::new(16));
        let config = CoordinatorConfig {
            push_interval_ms: 1,
            ..Default::default()
        };
        let c = Arc::new(Coordinator::new(TokioContext::shared(), sink.clone(), config).unwrap());
        let mut rx = sink.subscribe();

        c.spawn_push_loop();
        let first = rx.recv().await.unwrap();
        assert_eq!(first.topic, Topic::Fusion);

        sink.close();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let ticks = c.tick_count();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(c.tick_count(), ticks);
    }
}
