//! Configuration for the projection, fusion and assignment engines.
//!
//! Every struct carries field-level serde defaults so a partial JSON document
//! (or an empty `{}`) deserializes into a usable config. Engines call
//! `validate()` at construction and refuse to start on a bad value.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

// ============================================================================
// ERRORS
// ============================================================================

/// Errors raised while loading or validating configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be positive and finite, got {value}")]
    NotPositive { field: &'static str, value: f64 },

    #[error("{field} must be at least {min}, got {value}")]
    BelowMinimum {
        field: &'static str,
        min: u64,
        value: u64,
    },

    #[error("horizontal_fov_deg must be in (0, 180), got {0}")]
    InvalidFov(f64),

    #[error("Unknown assignment algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("Failed to read config file: {0}")]
    Io(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),
}

fn require_positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NotPositive { field, value })
    }
}

fn require_at_least(field: &'static str, value: u64, min: u64) -> Result<(), ConfigError> {
    if value >= min {
        Ok(())
    } else {
        Err(ConfigError::BelowMinimum { field, min, value })
    }
}

// ============================================================================
// ALGORITHM SELECTION
// ============================================================================

/// Matching policy used by the assignment engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Stateless nearest-available matching.
    #[serde(alias = "v1")]
    Greedy,
    /// Greedy with incumbent hysteresis.
    #[default]
    #[serde(alias = "v2")]
    AntiThrash,
    /// Bounded search over whole assignments.
    Ranked,
}

impl Algorithm {
    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Greedy => "greedy",
            Algorithm::AntiThrash => "anti_thrash",
            Algorithm::Ranked => "ranked",
        }
    }

    pub fn all() -> [Algorithm; 3] {
        [Algorithm::Greedy, Algorithm::AntiThrash, Algorithm::Ranked]
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "greedy" | "v1" => Ok(Algorithm::Greedy),
            "anti_thrash" | "anti-thrash" | "v2" => Ok(Algorithm::AntiThrash),
            "ranked" => Ok(Algorithm::Ranked),
            other => Err(ConfigError::UnknownAlgorithm(other.to_string())),
        }
    }
}

// ============================================================================
// CAMERA DEFAULTS
// ============================================================================

/// Intrinsics applied to cameras that report a pose without them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraDefaults {
    /// Horizontal field of view in degrees (default: 60)
    pub horizontal_fov_deg: f64,

    /// Image width in pixels (default: 640)
    pub image_width: u32,

    /// Image height in pixels (default: 480)
    pub image_height: u32,
}

impl Default for CameraDefaults {
    fn default() -> Self {
        Self {
            horizontal_fov_deg: 60.0,
            image_width: 640,
            image_height: 480,
        }
    }
}

impl CameraDefaults {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fov = self.horizontal_fov_deg;
        if !(fov.is_finite() && fov > 0.0 && fov < 180.0) {
            return Err(ConfigError::InvalidFov(fov));
        }
        require_at_least("image_width", self.image_width as u64, 1)?;
        require_at_least("image_height", self.image_height as u64, 1)
    }
}

// ============================================================================
// FUSION
// ============================================================================

/// Configuration for the FusionEngine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Association gate in metres; matches must be strictly inside (default: 3.0)
    pub match_radius_m: f64,

    /// Seconds without an observation before a track is evicted (default: 5.0)
    pub track_ttl_s: f64,

    /// Assumed standing height used for range estimation (default: 1.7)
    pub person_height_m: f64,

    /// Intrinsics for cameras registered through a bare pose update
    pub camera_defaults: CameraDefaults,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            match_radius_m: 3.0,
            track_ttl_s: 5.0,
            person_height_m: 1.7,
            camera_defaults: CameraDefaults::default(),
        }
    }
}

impl FusionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive("match_radius_m", self.match_radius_m)?;
        require_positive("track_ttl_s", self.track_ttl_s)?;
        require_positive("person_height_m", self.person_height_m)?;
        self.camera_defaults.validate()
    }
}

// ============================================================================
// ASSIGNMENT
// ============================================================================

/// Configuration for the AssignmentEngine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssignmentConfig {
    /// Matching policy (default: anti_thrash)
    pub algorithm: Algorithm,

    /// Minimum improvement in metres before an incumbent is replaced (default: 1.5)
    pub reassign_threshold_m: f64,

    /// Targets an agent may serve when it does not state its own capacity (default: 1)
    pub default_capacity: u32,

    /// Seconds after which a target stops being considered (default: 5.0)
    pub stale_ttl_s: f64,

    /// Number of runs kept in the history ring (default: 256)
    pub history_limit: usize,

    /// Node expansions allowed per ranked search (default: 100_000)
    pub ranked_search_budget: usize,
}

impl Default for AssignmentConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::AntiThrash,
            reassign_threshold_m: 1.5,
            default_capacity: 1,
            stale_ttl_s: 5.0,
            history_limit: 256,
            ranked_search_budget: 100_000,
        }
    }
}

impl AssignmentConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive("reassign_threshold_m", self.reassign_threshold_m)?;
        require_at_least("default_capacity", self.default_capacity as u64, 1)?;
        require_positive("stale_ttl_s", self.stale_ttl_s)?;
        require_at_least("history_limit", self.history_limit as u64, 1)?;
        require_at_least("ranked_search_budget", self.ranked_search_budget as u64, 1)
    }
}

// ============================================================================
// COORDINATOR
// ============================================================================

/// Top-level configuration for a coordinator process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Logical name (for logging)
    pub name: String,

    pub fusion: FusionConfig,

    pub assignment: AssignmentConfig,

    /// Interval between published snapshots in milliseconds (default: 100)
    pub push_interval_ms: u64,

    /// How long an evicted track is still reported as last seen (default: 30.0)
    pub last_seen_ttl_s: f64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            name: "overwatch".to_string(),
            fusion: FusionConfig::default(),
            assignment: AssignmentConfig::default(),
            push_interval_ms: 100,
            last_seen_ttl_s: 30.0,
        }
    }
}

impl CoordinatorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.fusion.validate()?;
        self.assignment.validate()?;
        require_at_least("push_interval_ms", self.push_interval_ms, 1)?;
        require_positive("last_seen_ttl_s", self.last_seen_ttl_s)
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&raw)
    }
}

// ============================================================================
// TESTS
// ============================================================================
