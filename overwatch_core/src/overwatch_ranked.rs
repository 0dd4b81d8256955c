//! Ranked assignment search.
//!
//! Greedy matching is myopic: the first target grabs the nearest agent even
//! when that strands a later target. This planner searches whole assignments
//! instead, minimising the summed distance.
//!
//! The search is a depth-first branch and bound over an injective mapping
//! from rows to columns (`rows <= cols`):
//! - agents >= targets: rows are targets, so every target is covered.
//! - targets > agents: rows are agents, each bound to a distinct target; a
//!   secondary plan then covers the targets the primary left out.
//!
//! Columns are tried nearest first, the best `k` complete plans are kept,
//! and a branch is cut once its partial cost reaches the k-th best. A node
//! budget caps the work; the best plans found so far are returned.

use crate::distance::DistanceMatrix;
use crate::schemas::{AgentId, Assignment, TargetId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// Complete plans kept per search.
const KEEP_BEST: usize = 2;

// ============================================================================
// PLANS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedBinding {
    pub target_id: TargetId,
    pub agent_id: AgentId,
    pub distance: f64,
}

/// One complete assignment and its summed distance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub bindings: Vec<PlannedBinding>,
    pub total_cost: f64,
}

impl Plan {
    pub fn to_assignments(&self, timestamp: f64) -> Vec<Assignment> {
        self.bindings
            .iter()
            .map(|b| Assignment {
                target_id: b.target_id,
                agent_id: b.agent_id.clone(),
                distance: b.distance,
                timestamp,
            })
            .collect()
    }

    pub fn covers(&self, target_id: TargetId) -> bool {
        self.bindings.iter().any(|b| b.target_id == target_id)
    }
}

/// Result of a ranked search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RankedPlan {
    /// Cheapest complete plan, or `None` if no complete plan exists
    pub primary: Option<Plan>,
    /// Second-cheapest complete plan of the same shape
    pub runner_up: Option<Plan>,
    /// Plan for targets left uncovered by `primary` (targets > agents only)
    pub secondary: Option<Plan>,
    pub expansions: usize,
    /// True when a search stopped on the node budget
    pub budget_exhausted: bool,
}

// ============================================================================
// PLANNER
// ============================================================================

#[derive(Debug, Clone)]
pub struct RankedPlanner {
    budget: usize,
}

impl RankedPlanner {
    pub fn new(budget: usize) -> Self {
        Self {
            budget: budget.max(1),
        }
    }

    /// Plan over `targets` (priority order) and `agents`.
    pub fn plan(&self, matrix: &DistanceMatrix, targets: &[TargetId], agents: &[AgentId]) -> RankedPlan {
        let mut result = RankedPlan::default();
        if targets.is_empty() || agents.is_empty() {
            return result;
        }

        let (ranked, outcome) = self.solve(matrix, targets, agents);
        result.expansions += outcome.expansions;
        result.budget_exhausted |= outcome.exhausted;
        let mut ranked = ranked.into_iter();
        result.primary = ranked.next();
        result.runner_up = ranked.next();

        if targets.len() > agents.len() {
            if let Some(primary) = &result.primary {
                let uncovered: Vec<TargetId> =
                    targets.iter().copied().filter(|t| !primary.covers(*t)).collect();
                if !uncovered.is_empty() {
                    let (secondary, outcome) = self.solve(matrix, &uncovered, agents);
                    result.expansions += outcome.expansions;
                    result.budget_exhausted |= outcome.exhausted;
                    result.secondary = secondary.into_iter().next();
                }
            }
        }

        debug!(
            expansions = result.expansions,
            exhausted = result.budget_exhausted,
            primary_cost = result.primary.as_ref().map(|p| p.total_cost),
            "Ranked search finished"
        );
        result
    }

    /// Best plans for one target/agent set, orienting the cost matrix so
    /// rows never outnumber columns.
    fn solve(&self, matrix: &DistanceMatrix, targets: &[TargetId], agents: &[AgentId]) -> (Vec<Plan>, SearchOutcome) {
        let targets_are_rows = agents.len() >= targets.len();
        let (rows, cols) = if targets_are_rows {
            (targets.len(), agents.len())
        } else {
            (agents.len(), targets.len())
        };

        let cost = |r: usize, c: usize| -> f64 {
            let (t, a) = if targets_are_rows { (targets[r], &agents[c]) } else { (targets[c], &agents[r]) };
            matrix.distance(t, a).unwrap_or(f64::INFINITY)
        };
        let costs: Vec<Vec<f64>> = (0..rows).map(|r| (0..cols).map(|c| cost(r, c)).collect()).collect();

        let (found, outcome) = k_best_injective(&costs, KEEP_BEST, self.budget);
        let plans = found
            .into_iter()
            .map(|(cols_for_rows, total_cost)| {
                let bindings = cols_for_rows
                    .iter()
                    .enumerate()
                    .map(|(r, &c)| {
                        let (target_id, agent_id) =
                            if targets_are_rows { (targets[r], agents[c].clone()) } else { (targets[c], agents[r].clone()) };
                        PlannedBinding {
                            target_id,
                            agent_id,
                            distance: costs[r][c],
                        }
                    })
                    .collect();
                Plan { bindings, total_cost }
            })
            .collect();
        (plans, outcome)
    }
}

// ============================================================================
// BRANCH AND BOUND
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
struct SearchOutcome {
    expansions: usize,
    exhausted: bool,
}

struct Search<'a> {
    costs: &'a [Vec<f64>],
    /// Finite columns per row, cheapest first
    order: Vec<Vec<usize>>,
    keep: usize,
    budget: usize,
    best: Vec<(Vec<usize>, f64)>,
    used: HashSet<usize>,
    current: Vec<usize>,
    outcome: SearchOutcome,
}

impl Search<'_> {
    fn bound(&self) -> f64 {
        if self.best.len() < self.keep {
            f64::INFINITY
        } else {
            self.best[self.keep - 1].1
        }
    }

    fn record(&mut self, cost: f64) {
        let at = self.best.partition_point(|(_, c)| *c <= cost);
        self.best.insert(at, (self.current.clone(), cost));
        self.best.truncate(self.keep);
    }

    fn descend(&mut self, row: usize, cost: f64) {
        if self.outcome.expansions >= self.budget {
            self.outcome.exhausted = true;
            return;
        }
        self.outcome.expansions += 1;

        if row == self.costs.len() {
            self.record(cost);
            return;
        }

        for i in 0..self.order[row].len() {
            let col = self.order[row][i];
            if self.used.contains(&col) {
                continue;
            }
            let next = cost + self.costs[row][col];
            // Columns are sorted, so nothing later in this row can do better
            if next >= self.bound() {
                break;
            }
            self.used.insert(col);
            self.current.push(col);
            self.descend(row + 1, next);
            self.current.pop();
            self.used.remove(&col);
            if self.outcome.exhausted {
                return;
            }
        }
    }
}

/// Up to `keep` cheapest injective row→column mappings using only finite
/// costs, cheapest first. Requires `rows <= cols`.
fn k_best_injective(costs: &[Vec<f64>], keep: usize, budget: usize) -> (Vec<(Vec<usize>, f64)>, SearchOutcome) {
    let order = costs
        .iter()
        .map(|row| {
            let mut cols: Vec<usize> = (0..row.len()).filter(|&c| row[c].is_finite()).collect();
            cols.sort_by(|&a, &b| row[a].total_cmp(&row[b]).then(a.cmp(&b)));
            cols
        })
        .collect();

    let mut search = Search {
        costs,
        order,
        keep: keep.max(1),
        budget,
        best: Vec::new(),
        used: HashSet::new(),
        current: Vec::with_capacity(costs.len()),
        outcome: SearchOutcome::default(),
    };
    search.descend(0, 0.0);
    (search.best, search.outcome)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn matrix(rows: &[(TargetId, &[(&str, f64)])]) -> DistanceMatrix {
        let mut m = DistanceMatrix::new();
        for (target, agents) in rows {
            m.insert_row(*target, agents.iter().map(|(a, d)| (a.to_string(), *d)).collect());
        }
        m
    }

    fn ids(agents: &[&str]) -> Vec<AgentId> {
        agents.iter().map(|a| a.to_string()).collect()
    }

    #[test]
    fn test_beats_greedy_on_stranding() {
        // Greedy gives target 1 agent a (1.0) and leaves target 2 with b (10.0)
        let m = matrix(&[(1, &[("a", 1.0), ("b", 2.0)]), (2, &[("a", 2.0), ("b", 10.0)])]);
        let plan = RankedPlanner::new(1_000).plan(&m, &[1, 2], &ids(&["a", "b"]));

        let primary = plan.primary.unwrap();
        assert_relative_eq!(primary.total_cost, 4.0);
        assert!(primary.bindings.contains(&PlannedBinding { target_id: 1, agent_id: "b".into(), distance: 2.0 }));
        assert_relative_eq!(plan.runner_up.unwrap().total_cost, 11.0);
        assert!(plan.secondary.is_none());
    }

    #[test]
    fn test_more_targets_than_agents() {
        let m = matrix(&[
            (1, &[("a", 1.0), ("b", 5.0)]),
            (2, &[("a", 5.0), ("b", 1.0)]),
            (3, &[("a", 2.0), ("b", 2.0)]),
        ]);
        let plan = RankedPlanner::new(1_000).plan(&m, &[1, 2, 3], &ids(&["a", "b"]));

        let primary = plan.primary.unwrap();
        assert_eq!(primary.bindings.len(), 2);
        assert!(primary.covers(1) && primary.covers(2));

        let secondary = plan.secondary.unwrap();
        assert_eq!(secondary.bindings.len(), 1);
        assert!(secondary.covers(3));
    }

    #[test]
    fn test_unreachable_pairs_never_used() {
        let m = matrix(&[(1, &[("a", f64::INFINITY), ("b", 3.0)]), (2, &[("a", f64::INFINITY), ("b", 1.0)])]);
        let plan = RankedPlanner::new(1_000).plan(&m, &[1, 2], &ids(&["a", "b"]));

        // Both targets need b; no complete plan exists
        assert!(plan.primary.is_none());
    }

    #[test]
    fn test_budget_returns_best_so_far() {
        let agents: Vec<String> = (0..8).map(|i| format!("agent_{i}")).collect();
        let mut m = DistanceMatrix::new();
        for t in 0..8u64 {
            m.insert_row(t, agents.iter().enumerate().map(|(i, a)| (a.clone(), ((t as f64) - i as f64).abs() + 1.0)).collect());
        }
        let targets: Vec<TargetId> = (0..8).collect();

        let plan = RankedPlanner::new(20).plan(&m, &targets, &agents);

        assert!(plan.budget_exhausted);
        assert!(plan.expansions <= 20);
        // Diagonal is found first by the nearest-first descent
        assert_relative_eq!(plan.primary.unwrap().total_cost, 8.0);
    }

    #[test]
    fn test_empty_inputs() {
        let plan = RankedPlanner::new(10).plan(&DistanceMatrix::new(), &[], &[]);
        assert_eq!(plan, RankedPlan::default());
    }
}
