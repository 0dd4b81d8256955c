//! Simulation scenarios for the Overwatch pipeline.

use crate::error::SimError;
use serde::{Deserialize, Serialize};

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioId {
    /// SIM-001: control-room script; small moves keep the responder, large moves hand off
    Hysteresis,

    /// SIM-002: more targets than responder slots, all nearest the same responder
    CapacityContention,

    /// SIM-003: walkers, walls and cameras through projection, fusion and assignment
    CameraFeed,

    /// SIM-004: jittery targets between responders, greedy vs anti-thrash
    ThrashComparison,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Hysteresis,
            ScenarioId::CapacityContention,
            ScenarioId::CameraFeed,
            ScenarioId::ThrashComparison,
        ]
    }

    /// Short name used on the command line.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Hysteresis => "hysteresis",
            ScenarioId::CapacityContention => "capacity",
            ScenarioId::CameraFeed => "camera_feed",
            ScenarioId::ThrashComparison => "thrash_compare",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Hysteresis => "Reassignment only when the improvement beats the threshold",
            ScenarioId::CapacityContention => "Responder capacity is never exceeded under contention",
            ScenarioId::CameraFeed => "End-to-end tracking accuracy against ground truth",
            ScenarioId::ThrashComparison => "Anti-thrash reassigns less often than greedy under jitter",
        }
    }

    /// Whether the scenario drives the oracle's walkers and cameras.
    pub fn uses_cameras(&self) -> bool {
        matches!(self, ScenarioId::CameraFeed)
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hysteresis" | "sim-001" => Ok(ScenarioId::Hysteresis),
            "capacity" | "capacity_contention" | "sim-002" => Ok(ScenarioId::CapacityContention),
            "camera_feed" | "camera" | "sim-003" => Ok(ScenarioId::CameraFeed),
            "thrash_compare" | "thrash" | "sim-004" => Ok(ScenarioId::ThrashComparison),
            _ => Err(SimError::UnknownScenario(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_parse_back() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>().unwrap(), scenario);
        }
    }

    #[test]
    fn test_aliases_and_unknown() {
        assert_eq!("SIM-004".parse::<ScenarioId>().unwrap(), ScenarioId::ThrashComparison);
        assert!(matches!(
            "split_brain".parse::<ScenarioId>(),
            Err(SimError::UnknownScenario(name)) if name == "split_brain"
        ));
    }
}
