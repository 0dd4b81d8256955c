//! Distance providers and the per-run distance matrix.
//!
//! Assignment only ever asks "how far is agent A from target T"; a
//! building-aware router can answer that instead of straight-line geometry
//! without the matching code noticing.

use crate::schemas::{round_mm, AgentId, DistanceMatrixOutput, TargetId};
use nalgebra::Point2;
use std::collections::BTreeMap;

/// Travel distance from an agent to a target.
///
/// Must return a value `>= 0`, or `f64::INFINITY` when the target cannot be
/// reached. NaN is read as unreachable.
pub trait DistanceProvider: Send + Sync {
    fn distance(&self, target: &Point2<f64>, agent: &Point2<f64>) -> f64;

    fn name(&self) -> &str {
        "custom"
    }
}

/// Straight-line distance.
#[derive(Debug, Clone, Copy, Default)]
pub struct Euclidean;

impl DistanceProvider for Euclidean {
    fn distance(&self, target: &Point2<f64>, agent: &Point2<f64>) -> f64 {
        nalgebra::distance(target, agent)
    }

    fn name(&self) -> &str {
        "euclidean"
    }
}

/// Adapts a closure into a provider.
pub struct DistanceFn<F>(pub F);

impl<F> DistanceProvider for DistanceFn<F>
where
    F: Fn(&Point2<f64>, &Point2<f64>) -> f64 + Send + Sync,
{
    fn distance(&self, target: &Point2<f64>, agent: &Point2<f64>) -> f64 {
        (self.0)(target, agent)
    }
}

/// NaN becomes unreachable; negative values are clamped to zero.
pub fn sanitize(distance: f64) -> f64 {
    if distance.is_nan() {
        f64::INFINITY
    } else {
        distance.max(0.0)
    }
}

// ============================================================================
// DISTANCE MATRIX
// ============================================================================

/// For each active target, every agent sorted by ascending distance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DistanceMatrix {
    rows: BTreeMap<TargetId, Vec<(AgentId, f64)>>,
}

impl DistanceMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a row, sorting it by distance then agent id.
    pub fn insert_row(&mut self, target_id: TargetId, mut row: Vec<(AgentId, f64)>) {
        for entry in row.iter_mut() {
            entry.1 = sanitize(entry.1);
        }
        row.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        self.rows.insert(target_id, row);
    }

    pub fn row(&self, target_id: TargetId) -> Option<&[(AgentId, f64)]> {
        self.rows.get(&target_id).map(Vec::as_slice)
    }

    pub fn distance(&self, target_id: TargetId, agent_id: &str) -> Option<f64> {
        self.rows
            .get(&target_id)?
            .iter()
            .find(|(a, _)| a == agent_id)
            .map(|(_, d)| *d)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// JSON-friendly view: millimetre rounding, unreachable as `null`.
    pub fn to_output(&self) -> DistanceMatrixOutput {
        self.rows
            .iter()
            .map(|(target_id, row)| {
                let agents = row
                    .iter()
                    .map(|(agent_id, d)| (agent_id.clone(), d.is_finite().then(|| round_mm(*d))))
                    .collect();
                (target_id.to_string(), agents)
            })
            .collect()
    }
}
