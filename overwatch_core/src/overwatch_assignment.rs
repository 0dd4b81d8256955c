//! The "ASSIGNMENT" Engine - Responder Dispatch
//!
//! Decides which agent goes to which target, re-planning every run from a
//! fresh distance matrix.
//!
//! Three policies share the same state and output:
//! - `greedy`: highest-priority target takes the nearest agent with spare
//!   capacity. Stateless, so small position jitter can swap agents.
//! - `anti_thrash` (default): like greedy, but an incumbent agent keeps its
//!   target unless an alternative is closer by more than
//!   `reassign_threshold_m`.
//! - `ranked`: bounded search over whole assignments, see
//!   [`crate::overwatch_ranked`].
//!
//! After every run the assignment table is replaced wholesale and each
//! agent's pointers are rebuilt from it, so the two always agree.

use crate::config::{Algorithm, AssignmentConfig, ConfigError};
use crate::distance::{DistanceMatrix, DistanceProvider, Euclidean};
use crate::overwatch_ranked::{RankedPlan, RankedPlanner};
use crate::schemas::{
    Agent, AgentId, AgentRecord, Assignment, AssignmentHistoryRecord, AssignmentOutput,
    DistanceMatrixOutput, GlobalTrack, Target, TargetId,
};
use nalgebra::Point2;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tracing::{debug, info};

// ============================================================================
// LOAD ACCOUNTING
// ============================================================================

/// Per-run agent load.
///
/// `load` counts bindings plus reservations still held by incumbents that
/// have not been visited yet; new bindings must fit under it. `bound` counts
/// only bindings made this run; an incumbent may keep its target while
/// `bound` is under capacity.
#[derive(Debug, Default)]
struct LoadLedger {
    load: HashMap<AgentId, u32>,
    bound: HashMap<AgentId, u32>,
}

impl LoadLedger {
    fn load(&self, agent_id: &str) -> u32 {
        self.load.get(agent_id).copied().unwrap_or(0)
    }

    fn bound(&self, agent_id: &str) -> u32 {
        self.bound.get(agent_id).copied().unwrap_or(0)
    }

    fn reserve(&mut self, agent_id: &str) {
        *self.load.entry(agent_id.to_string()).or_insert(0) += 1;
    }

    fn release(&mut self, agent_id: &str) {
        if let Some(n) = self.load.get_mut(agent_id) {
            *n = n.saturating_sub(1);
        }
    }

    /// New binding: counts against both load and bound.
    fn bind(&mut self, agent_id: &str) {
        self.reserve(agent_id);
        self.confirm(agent_id);
    }

    /// Incumbent kept: its reservation is already in `load`.
    fn confirm(&mut self, agent_id: &str) {
        *self.bound.entry(agent_id.to_string()).or_insert(0) += 1;
    }
}

// ============================================================================
// ASSIGNMENT ENGINE
// ============================================================================

pub struct AssignmentEngine {
    config: AssignmentConfig,
    agents: BTreeMap<AgentId, Agent>,
    targets: BTreeMap<TargetId, Target>,
    assignments: BTreeMap<TargetId, Assignment>,
    distance: Box<dyn DistanceProvider>,
    history: VecDeque<AssignmentHistoryRecord>,
    reassignment_total: u64,
    last_ranked: Option<RankedPlan>,
}

impl AssignmentEngine {
    pub fn new(config: AssignmentConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    pub fn with_defaults() -> Self {
        Self::build(AssignmentConfig::default())
    }

    fn build(config: AssignmentConfig) -> Self {
        Self {
            config,
            agents: BTreeMap::new(),
            targets: BTreeMap::new(),
            assignments: BTreeMap::new(),
            distance: Box::new(Euclidean),
            history: VecDeque::new(),
            reassignment_total: 0,
            last_ranked: None,
        }
    }

    /// Swap the distance source. Matching logic is unchanged.
    pub fn set_distance_provider(&mut self, provider: Box<dyn DistanceProvider>) {
        debug!(provider = provider.name(), "Distance provider replaced");
        self.distance = provider;
    }

    pub fn with_distance_provider(mut self, provider: impl DistanceProvider + 'static) -> Self {
        self.set_distance_provider(Box::new(provider));
        self
    }

    pub fn config(&self) -> &AssignmentConfig {
        &self.config
    }

    pub fn algorithm(&self) -> Algorithm {
        self.config.algorithm
    }

    pub fn set_algorithm(&mut self, algorithm: Algorithm) {
        self.config.algorithm = algorithm;
    }

    // ------------------------------------------------------------------------
    // Agents & targets
    // ------------------------------------------------------------------------

    /// Insert or move an agent. A `None` capacity keeps the agent's current
    /// capacity, or the configured default for a new agent.
    pub fn update_agent(&mut self, id: &str, x: f64, y: f64, capacity: Option<u32>, now: f64) {
        let default_capacity = self.config.default_capacity;
        let agent = self
            .agents
            .entry(id.to_string())
            .or_insert_with(|| Agent::new(id, x, y, default_capacity, now));
        agent.position = Point2::new(x, y);
        agent.last_updated = now;
        if let Some(cap) = capacity {
            agent.max_assignments = cap.max(1);
        }
    }

    /// Remove an agent together with every assignment pointing at it.
    pub fn remove_agent(&mut self, id: &str) -> Option<Agent> {
        let removed = self.agents.remove(id)?;
        self.assignments.retain(|_, a| a.agent_id != id);
        Some(removed)
    }

    pub fn update_target(&mut self, id: TargetId, x: f64, y: f64, confidence: f64, now: f64) {
        self.targets.insert(id, Target::new(id, x, y, confidence, now));
    }

    /// Remove a target and clear any agent pointer to it.
    pub fn remove_target(&mut self, id: TargetId) -> Option<Target> {
        let removed = self.targets.remove(&id)?;
        if let Some(assignment) = self.assignments.remove(&id) {
            if let Some(agent) = self.agents.get_mut(&assignment.agent_id) {
                agent.assigned_targets.remove(&id);
                if agent.current_assignment == Some(id) {
                    agent.current_assignment = agent.assigned_targets.iter().next().copied();
                }
            }
        }
        Some(removed)
    }

    /// Upsert targets from fused tracks, keeping each track's own `last_seen`.
    pub fn sync_tracks(&mut self, tracks: &[GlobalTrack]) {
        for track in tracks {
            self.targets.insert(track.id, Target::from(track));
        }
    }

    pub fn agent(&self, id: &str) -> Option<&Agent> {
        self.agents.get(id)
    }

    pub fn agents(&self) -> impl Iterator<Item = &Agent> {
        self.agents.values()
    }

    pub fn target(&self, id: TargetId) -> Option<&Target> {
        self.targets.get(&id)
    }

    pub fn assignments(&self) -> impl Iterator<Item = &Assignment> {
        self.assignments.values()
    }

    pub fn assignment_for(&self, target_id: TargetId) -> Option<&Assignment> {
        self.assignments.get(&target_id)
    }

    /// Targets seen within `stale_ttl_s` of `now`, ordered by id.
    pub fn active_targets(&self, now: f64) -> Vec<&Target> {
        let ttl = self.config.stale_ttl_s;
        self.targets.values().filter(|t| t.is_active(now, ttl)).collect()
    }

    // ------------------------------------------------------------------------
    // Distances
    // ------------------------------------------------------------------------

    fn matrix_for(&self, targets: &[&Target]) -> DistanceMatrix {
        let mut matrix = DistanceMatrix::new();
        for target in targets {
            let row = self
                .agents
                .values()
                .map(|agent| (agent.id.clone(), self.distance.distance(&target.position, &agent.position)))
                .collect();
            matrix.insert_row(target.id, row);
        }
        matrix
    }

    /// Agents per active target, nearest first.
    pub fn distance_matrix(&self, now: f64) -> DistanceMatrix {
        self.matrix_for(&self.active_targets(now))
    }

    pub fn distance_matrix_output(&self, now: f64) -> DistanceMatrixOutput {
        self.distance_matrix(now).to_output()
    }

    /// Nearest agent in `row` with spare capacity and a finite distance.
    fn first_available(
        &self,
        row: &[(AgentId, f64)],
        ledger: &LoadLedger,
        exclude: Option<&str>,
    ) -> Option<(AgentId, f64)> {
        row.iter()
            .filter(|(agent_id, d)| d.is_finite() && exclude != Some(agent_id.as_str()))
            .find(|(agent_id, _)| {
                self.agents
                    .get(agent_id)
                    .is_some_and(|agent| ledger.load(agent_id) < agent.max_assignments)
            })
            .cloned()
    }

    // ------------------------------------------------------------------------
    // Matching
    // ------------------------------------------------------------------------

    /// Compute and apply a fresh assignment.
    pub fn run(&mut self, now: f64) -> Vec<Assignment> {
        let active: Vec<Target> = self.active_targets(now).into_iter().cloned().collect();
        if self.agents.is_empty() || active.is_empty() {
            self.apply(Vec::new(), now);
            return Vec::new();
        }

        let refs: Vec<&Target> = active.iter().collect();
        let matrix = self.matrix_for(&refs);
        let ordered = priority_order(&active);

        let proposed = match self.config.algorithm {
            Algorithm::Greedy => self.assign_greedy(&ordered, &matrix, now),
            Algorithm::AntiThrash => self.assign_anti_thrash(&ordered, &matrix, now),
            Algorithm::Ranked => self.assign_ranked(&ordered, &matrix, now),
        };

        self.apply(proposed, now);
        self.assignments.values().cloned().collect()
    }

    fn assign_greedy(&self, ordered: &[&Target], matrix: &DistanceMatrix, now: f64) -> Vec<Assignment> {
        let mut ledger = LoadLedger::default();
        let mut out = Vec::new();

        for target in ordered {
            let Some(row) = matrix.row(target.id) else { continue };
            if let Some((agent_id, distance)) = self.first_available(row, &ledger, None) {
                ledger.bind(&agent_id);
                out.push(Assignment {
                    target_id: target.id,
                    agent_id,
                    distance,
                    timestamp: now,
                });
            }
        }
        out
    }

    fn assign_anti_thrash(&self, ordered: &[&Target], matrix: &DistanceMatrix, now: f64) -> Vec<Assignment> {
        let threshold = self.config.reassign_threshold_m;
        let active: HashSet<TargetId> = ordered.iter().map(|t| t.id).collect();

        // Reservations held by incumbents of active targets
        let mut ledger = LoadLedger::default();
        for assignment in self.assignments.values() {
            if active.contains(&assignment.target_id) && self.agents.contains_key(&assignment.agent_id) {
                ledger.reserve(&assignment.agent_id);
            }
        }

        let mut out = Vec::new();
        for target in ordered {
            let Some(row) = matrix.row(target.id) else { continue };

            let incumbent = self
                .assignments
                .get(&target.id)
                .and_then(|a| self.agents.get(&a.agent_id));

            if let Some(incumbent) = incumbent {
                let d0 = matrix.distance(target.id, &incumbent.id).unwrap_or(f64::INFINITY);

                if d0.is_finite() && ledger.bound(&incumbent.id) < incumbent.max_assignments {
                    match self.first_available(row, &ledger, Some(incumbent.id.as_str())) {
                        Some((alternative, d1)) if d0 - d1 > threshold => {
                            info!(
                                target_id = target.id,
                                from = %incumbent.id,
                                to = %alternative,
                                improvement_m = d0 - d1,
                                "Reassigning target"
                            );
                            ledger.release(&incumbent.id);
                            ledger.bind(&alternative);
                            out.push(Assignment {
                                target_id: target.id,
                                agent_id: alternative,
                                distance: d1,
                                timestamp: now,
                            });
                        }
                        _ => {
                            ledger.confirm(&incumbent.id);
                            out.push(Assignment {
                                target_id: target.id,
                                agent_id: incumbent.id.clone(),
                                distance: d0,
                                timestamp: now,
                            });
                        }
                    }
                    continue;
                }

                debug!(target_id = target.id, agent_id = %incumbent.id, "Releasing incumbent");
                ledger.release(&incumbent.id);
            }

            if let Some((agent_id, distance)) = self.first_available(row, &ledger, None) {
                ledger.bind(&agent_id);
                out.push(Assignment {
                    target_id: target.id,
                    agent_id,
                    distance,
                    timestamp: now,
                });
            }
        }
        out
    }

    fn assign_ranked(&mut self, ordered: &[&Target], matrix: &DistanceMatrix, now: f64) -> Vec<Assignment> {
        let plan = self.plan_ranked(ordered, matrix);
        let out = plan
            .primary
            .as_ref()
            .map(|p| p.to_assignments(now))
            .unwrap_or_default();
        self.last_ranked = Some(plan);
        out
    }

    fn plan_ranked(&self, ordered: &[&Target], matrix: &DistanceMatrix) -> RankedPlan {
        let target_ids: Vec<TargetId> = ordered.iter().map(|t| t.id).collect();
        let agent_ids: Vec<AgentId> = self.agents.keys().cloned().collect();
        RankedPlanner::new(self.config.ranked_search_budget).plan(matrix, &target_ids, &agent_ids)
    }

    /// Ranked plans for the current state without applying anything.
    pub fn ranked_plan(&self, now: f64) -> RankedPlan {
        let active = self.active_targets(now);
        let matrix = self.matrix_for(&active);
        let owned: Vec<Target> = active.into_iter().cloned().collect();
        self.plan_ranked(&priority_order(&owned), &matrix)
    }

    /// Plans from the last ranked run.
    pub fn last_ranked_plan(&self) -> Option<&RankedPlan> {
        self.last_ranked.as_ref()
    }

    // ------------------------------------------------------------------------
    // Apply
    // ------------------------------------------------------------------------

    /// Replace the assignment table and rebuild agent pointers.
    ///
    /// Entries naming an unknown agent, repeating a target, or exceeding the
    /// agent's capacity are dropped. Order matters: an agent's
    /// `current_assignment` becomes the first target it receives.
    pub fn apply(&mut self, new_assignments: Vec<Assignment>, now: f64) {
        let previous = std::mem::take(&mut self.assignments);

        for agent in self.agents.values_mut() {
            agent.current_assignment = None;
            agent.assigned_targets.clear();
        }

        let mut reassigned = 0;
        for assignment in new_assignments {
            if self.assignments.contains_key(&assignment.target_id) {
                debug!(target_id = assignment.target_id, "Duplicate assignment dropped");
                continue;
            }
            let Some(agent) = self.agents.get_mut(&assignment.agent_id) else {
                debug!(agent_id = %assignment.agent_id, "Assignment to unknown agent dropped");
                continue;
            };
            if agent.assigned_targets.len() >= agent.max_assignments as usize {
                debug!(agent_id = %agent.id, "Assignment over capacity dropped");
                continue;
            }

            agent.assigned_targets.insert(assignment.target_id);
            agent.current_assignment.get_or_insert(assignment.target_id);

            if previous
                .get(&assignment.target_id)
                .is_some_and(|p| p.agent_id != assignment.agent_id)
            {
                reassigned += 1;
            }
            self.assignments.insert(assignment.target_id, assignment);
        }

        self.reassignment_total += reassigned as u64;
        self.history.push_back(AssignmentHistoryRecord {
            timestamp: now,
            algorithm: self.config.algorithm,
            mapping: self
                .assignments
                .values()
                .map(|a| (a.target_id, a.agent_id.clone()))
                .collect(),
            reassigned,
        });
        while self.history.len() > self.config.history_limit {
            self.history.pop_front();
        }
    }

    // ------------------------------------------------------------------------
    // Output
    // ------------------------------------------------------------------------

    pub fn history(&self) -> impl Iterator<Item = &AssignmentHistoryRecord> {
        self.history.iter()
    }

    /// Reassignments summed over every applied run.
    pub fn reassignment_total(&self) -> u64 {
        self.reassignment_total
    }

    pub fn unassigned_targets(&self, now: f64) -> Vec<TargetId> {
        self.active_targets(now)
            .into_iter()
            .map(|t| t.id)
            .filter(|id| !self.assignments.contains_key(id))
            .collect()
    }

    pub fn output(&self, now: f64) -> AssignmentOutput {
        AssignmentOutput {
            assignments: self.assignments.values().map(Assignment::to_record).collect(),
            agents: self
                .agents
                .values()
                .map(|agent| {
                    (
                        agent.id.clone(),
                        AgentRecord {
                            position: agent.position.into(),
                            current_assignment: agent.current_assignment,
                        },
                    )
                })
                .collect(),
            unassigned_targets: self.unassigned_targets(now),
            algorithm: self.config.algorithm,
            timestamp: now,
        }
    }
}

/// Descending confidence, ties by ascending id.
fn priority_order(targets: &[Target]) -> Vec<&Target> {
    let mut ordered: Vec<&Target> = targets.iter().collect();
    ordered.sort_by(|a, b| b.confidence.total_cmp(&a.confidence).then_with(|| a.id.cmp(&b.id)));
    ordered
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::DistanceFn;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn engine(algorithm: Algorithm, threshold: f64) -> AssignmentEngine {
        AssignmentEngine::new(AssignmentConfig {
            algorithm,
            reassign_threshold_m: threshold,
            ..Default::default()
        })
        .unwrap()
    }

    fn agent_of(engine: &AssignmentEngine, target_id: TargetId) -> Option<&str> {
        engine.assignment_for(target_id).map(|a| a.agent_id.as_str())
    }

    /// Four responders and three people, threshold 2.0.
    fn control_room(algorithm: Algorithm) -> AssignmentEngine {
        let mut e = engine(algorithm, 2.0);
        e.update_agent("alice", 0.0, 0.0, None, 0.0);
        e.update_agent("bob", 10.0, 0.0, None, 0.0);
        e.update_agent("charlie", 5.0, 8.0, None, 0.0);
        e.update_agent("diana", 2.0, 5.0, None, 0.0);
        e.update_target(101, 1.0, 1.0, 0.95, 0.0);
        e.update_target(102, 9.0, 1.0, 0.88, 0.0);
        e.update_target(103, 5.0, 9.0, 0.70, 0.0);
        e
    }

    fn assert_consistent(engine: &AssignmentEngine) {
        for agent in engine.agents() {
            let owned: Vec<TargetId> = engine
                .assignments()
                .filter(|a| a.agent_id == agent.id)
                .map(|a| a.target_id)
                .collect();
            assert_eq!(owned, agent.assigned_targets.iter().copied().collect::<Vec<_>>());
            assert!(owned.len() <= agent.max_assignments as usize);
            match agent.current_assignment {
                Some(t) => assert!(agent.assigned_targets.contains(&t)),
                None => assert!(agent.assigned_targets.is_empty()),
            }
        }
    }

    #[test]
    fn test_initial_assignment() {
        let mut e = control_room(Algorithm::AntiThrash);
        e.run(0.0);

        assert_eq!(agent_of(&e, 101), Some("alice"));
        assert_eq!(agent_of(&e, 102), Some("bob"));
        assert_eq!(agent_of(&e, 103), Some("charlie"));
        assert_eq!(e.agent("diana").unwrap().current_assignment, None);
        assert_eq!(e.agent("alice").unwrap().current_assignment, Some(101));
        assert_consistent(&e);
    }

    #[test]
    fn test_small_move_keeps_incumbent() {
        let mut e = control_room(Algorithm::AntiThrash);
        e.run(0.0);

        e.update_target(102, 9.3, 1.2, 0.88, 0.5);
        e.run(0.5);

        assert_eq!(agent_of(&e, 102), Some("bob"));
        assert_eq!(e.reassignment_total(), 0);
    }

    #[test]
    fn test_large_move_reassigns() {
        let mut e = control_room(Algorithm::AntiThrash);
        e.run(0.0);

        e.update_target(102, 5.5, 7.5, 0.88, 0.5);
        e.run(0.5);

        // Bob is 8.7m out. Charlie is closest but still held by 103, so the
        // next free agent takes over.
        assert_eq!(agent_of(&e, 102), Some("diana"));
        assert_eq!(agent_of(&e, 103), Some("charlie"));
        assert_eq!(e.reassignment_total(), 1);
        assert_consistent(&e);
    }

    #[test]
    fn test_threshold_equality_keeps_incumbent() {
        let mut e = engine(Algorithm::AntiThrash, 2.0);
        e.update_agent("near", 0.0, 0.0, None, 0.0);
        e.update_target(1, 1.0, 0.0, 0.9, 0.0);
        e.run(0.0);
        assert_eq!(agent_of(&e, 1), Some("near"));

        // Incumbent now 3.0 away, newcomer 1.0 away: improvement exactly 2.0
        e.update_agent("near", -2.0, 0.0, None, 0.1);
        e.update_agent("other", 2.0, 0.0, None, 0.1);
        e.run(0.1);
        assert_eq!(agent_of(&e, 1), Some("near"));

        // A hair more and it moves
        e.update_agent("near", -2.001, 0.0, None, 0.2);
        e.run(0.2);
        assert_eq!(agent_of(&e, 1), Some("other"));
    }

    #[test]
    fn test_ranked_plan_previews_and_matches_run() {
        let mut e = control_room(Algorithm::AntiThrash);
        let preview = e.ranked_plan(0.0);
        assert!(e.last_ranked_plan().is_none());

        let primary = preview.primary.as_ref().unwrap();
        let mut bound: Vec<(TargetId, &str)> =
            primary.bindings.iter().map(|b| (b.target_id, b.agent_id.as_str())).collect();
        bound.sort();
        assert_eq!(bound, vec![(101, "alice"), (102, "bob"), (103, "charlie")]);
        assert!(preview.runner_up.as_ref().unwrap().total_cost >= primary.total_cost);
        assert!(preview.secondary.is_none());

        e.set_algorithm(Algorithm::Ranked);
        assert_eq!(e.algorithm(), Algorithm::Ranked);
        e.run(0.0);

        assert_eq!(e.last_ranked_plan(), Some(&preview));
        assert_eq!(agent_of(&e, 101), Some("alice"));
        assert_eq!(agent_of(&e, 103), Some("charlie"));
        assert_consistent(&e);
    }

    #[test]
    fn test_greedy_follows_nearest() {
        let mut e = engine(Algorithm::Greedy, 2.0);
        e.update_agent("a", 0.0, 0.0, None, 0.0);
        e.update_agent("b", 3.0, 0.0, None, 0.0);
        e.update_target(1, 1.4, 0.0, 0.9, 0.0);
        e.run(0.0);
        assert_eq!(agent_of(&e, 1), Some("a"));

        e.update_target(1, 1.6, 0.0, 0.9, 0.1);
        e.run(0.1);
        assert_eq!(agent_of(&e, 1), Some("b"));
        assert_eq!(e.reassignment_total(), 1);
    }

    #[test]
    fn test_capacity_contention() {
        for algorithm in [Algorithm::Greedy, Algorithm::AntiThrash] {
            let mut e = engine(algorithm, 1.5);
            e.update_agent("near", 0.0, 0.0, None, 0.0);
            e.update_agent("far", 20.0, 0.0, None, 0.0);
            e.update_target(1, 1.0, 0.0, 0.9, 0.0);
            e.update_target(2, 1.5, 0.0, 0.8, 0.0);
            e.update_target(3, 2.0, 0.0, 0.7, 0.0);
            e.run(0.0);

            assert_eq!(agent_of(&e, 1), Some("near"));
            assert_eq!(agent_of(&e, 2), Some("far"));
            assert_eq!(e.unassigned_targets(0.0), vec![3]);
            assert_consistent(&e);
        }
    }

    #[test]
    fn test_confidence_ties_break_by_id() {
        let mut e = engine(Algorithm::Greedy, 1.5);
        e.update_agent("only", 0.0, 0.0, None, 0.0);
        e.update_target(9, 1.0, 0.0, 0.5, 0.0);
        e.update_target(4, 5.0, 0.0, 0.5, 0.0);
        e.run(0.0);

        assert_eq!(agent_of(&e, 4), Some("only"));
        assert_eq!(agent_of(&e, 9), None);
    }

    #[test]
    fn test_unreachable_targets_stay_unassigned() {
        let walls = DistanceFn(|t: &Point2<f64>, a: &Point2<f64>| {
            if t.x > 50.0 { f64::INFINITY } else { nalgebra::distance(t, a) }
        });
        let mut e = engine(Algorithm::AntiThrash, 1.5).with_distance_provider(walls);
        e.update_agent("a", 0.0, 0.0, None, 0.0);
        e.update_target(1, 60.0, 0.0, 0.9, 0.0);
        e.update_target(2, 5.0, 0.0, 0.5, 0.0);
        e.run(0.0);

        assert_eq!(agent_of(&e, 1), None);
        assert_eq!(agent_of(&e, 2), Some("a"));
        assert_eq!(e.distance_matrix_output(0.0)["1"]["a"], None);
    }

    #[test]
    fn test_unreachable_incumbent_is_released() {
        let mut e = engine(Algorithm::AntiThrash, 10.0);
        e.update_agent("a", 0.0, 0.0, None, 0.0);
        e.update_agent("b", 4.0, 0.0, None, 0.0);
        e.update_target(1, 1.0, 0.0, 0.9, 0.0);
        e.run(0.0);
        assert_eq!(agent_of(&e, 1), Some("a"));

        e.set_distance_provider(Box::new(DistanceFn(|t: &Point2<f64>, a: &Point2<f64>| {
            if a.x == 0.0 { f64::NAN } else { nalgebra::distance(t, a) }
        })));
        e.run(0.1);
        assert_eq!(agent_of(&e, 1), Some("b"));
    }

    #[test]
    fn test_lowered_capacity_releases_extra_targets() {
        let mut e = engine(Algorithm::AntiThrash, 1.5);
        e.update_agent("a", 0.0, 0.0, Some(2), 0.0);
        e.update_target(1, 1.0, 0.0, 0.9, 0.0);
        e.update_target(2, 2.0, 0.0, 0.8, 0.0);
        e.run(0.0);
        assert_eq!(e.agent("a").unwrap().assigned_targets.len(), 2);

        e.update_agent("a", 0.0, 0.0, Some(1), 0.1);
        e.run(0.1);
        assert_eq!(agent_of(&e, 1), Some("a"));
        assert_eq!(e.unassigned_targets(0.1), vec![2]);
        assert_consistent(&e);
    }

    #[test]
    fn test_stale_targets_drop_out() {
        let mut e = control_room(Algorithm::AntiThrash);
        e.run(0.0);
        e.update_target(101, 1.0, 1.0, 0.95, 4.0);

        e.run(5.0);

        assert_eq!(e.active_targets(5.0).len(), 1);
        assert_eq!(agent_of(&e, 102), None);
        assert_eq!(agent_of(&e, 101), Some("alice"));
        assert_eq!(e.agent("bob").unwrap().current_assignment, None);
    }

    #[test]
    fn test_remove_agent_and_target() {
        let mut e = control_room(Algorithm::AntiThrash);
        e.run(0.0);

        e.remove_agent("bob");
        assert_eq!(agent_of(&e, 102), None);

        e.remove_target(101);
        assert_eq!(e.agent("alice").unwrap().current_assignment, None);
        assert!(e.remove_target(101).is_none());

        e.run(0.1);
        assert!(agent_of(&e, 102).is_some());
        assert_consistent(&e);
    }

    #[test]
    fn test_no_agents_clears_table() {
        let mut e = control_room(Algorithm::AntiThrash);
        e.run(0.0);
        for id in ["alice", "bob", "charlie", "diana"] {
            e.remove_agent(id);
        }
        assert!(e.run(0.1).is_empty());
        assert_eq!(e.assignments().count(), 0);
    }

    #[test]
    fn test_apply_drops_invalid_entries() {
        let mut e = engine(Algorithm::AntiThrash, 1.5);
        e.update_agent("a", 0.0, 0.0, None, 0.0);
        let entry = |target_id, agent_id: &str| Assignment {
            target_id,
            agent_id: agent_id.to_string(),
            distance: 1.0,
            timestamp: 0.0,
        };

        e.apply(vec![entry(1, "a"), entry(1, "a"), entry(2, "a"), entry(3, "ghost")], 0.0);

        assert_eq!(e.assignments().count(), 1);
        assert_consistent(&e);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut e = AssignmentEngine::new(AssignmentConfig {
            history_limit: 3,
            ..Default::default()
        })
        .unwrap();
        e.update_agent("a", 0.0, 0.0, None, 0.0);
        e.update_target(1, 1.0, 0.0, 0.9, 0.0);
        for i in 0..5 {
            e.run(i as f64 * 0.1);
        }

        let history: Vec<_> = e.history().collect();
        assert_eq!(history.len(), 3);
        assert_relative_eq!(history[0].timestamp, 0.2);
        assert_eq!(history[2].mapping.get(&1).map(String::as_str), Some("a"));
    }

    #[test]
    fn test_output_shape() {
        let mut e = control_room(Algorithm::AntiThrash);
        e.run(0.0);
        let json = serde_json::to_value(e.output(0.0)).unwrap();

        assert_eq!(json["algorithm"], "anti_thrash");
        assert_eq!(json["agents"]["alice"]["position"]["x"], 0.0);
        assert_eq!(json["agents"]["alice"]["current_assignment"], 101);
        assert_eq!(json["agents"]["diana"]["current_assignment"], serde_json::Value::Null);
        assert_eq!(json["assignments"][0]["distance"], 1.414);
        assert_eq!(json["unassigned_targets"].as_array().unwrap().len(), 0);
    }

    proptest! {
        #[test]
        fn prop_invariants_hold_across_runs(
            agents in proptest::collection::vec((0.0..50.0f64, 0.0..50.0f64, 1u32..3), 1..5),
            steps in proptest::collection::vec(
                proptest::collection::vec((0.0..50.0f64, 0.0..50.0f64, 0.0..1.0f64), 0..6),
                1..6,
            ),
            algorithm in prop_oneof![Just(Algorithm::Greedy), Just(Algorithm::AntiThrash), Just(Algorithm::Ranked)],
        ) {
            let mut e = engine(algorithm, 1.5);
            for (i, (x, y, cap)) in agents.iter().enumerate() {
                e.update_agent(&format!("agent_{i}"), *x, *y, Some(*cap), 0.0);
            }
            for (step, targets) in steps.iter().enumerate() {
                let now = step as f64;
                for (i, (x, y, conf)) in targets.iter().enumerate() {
                    e.update_target(i as u64 + 1, *x, *y, *conf, now);
                }
                e.run(now);

                for agent in e.agents() {
                    let owned = e.assignments().filter(|a| a.agent_id == agent.id).count();
                    prop_assert!(owned <= agent.max_assignments as usize);
                    prop_assert_eq!(owned, agent.assigned_targets.len());
                    if let Some(t) = agent.current_assignment {
                        prop_assert!(agent.assigned_targets.contains(&t));
                    }
                }
                for a in e.assignments() {
                    let agent = e.agent(&a.agent_id);
                    prop_assert!(agent.is_some_and(|ag| ag.assigned_targets.contains(&a.target_id)));
                }
            }
        }
    }
}
