//! Overwatch Deterministic Simulation Harness
//!
//! This crate provides a controlled room where the whole Overwatch pipeline
//! runs deterministically: ground-truth walkers, cameras with walls in the
//! way, detector noise, and responders to dispatch.
//!
//! # Core Principle: One Seed
//!
//! All sources of non-determinism are intercepted and controlled:
//! - **Time**: a virtual clock advanced only by the runner
//! - **Randomness**: every stream derived from a single 64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     ScenarioRunner                       │
//! │  ┌──────────────┐   bboxes    ┌────────────────────────┐ │
//! │  │    Oracle    │────────────►│      Coordinator       │ │
//! │  │ walkers,     │   poses     │ fusion → assignment    │ │
//! │  │ cameras,     │────────────►│                        │ │
//! │  │ walls        │             └───────────┬────────────┘ │
//! │  └──────┬───────┘                         │ snapshots    │
//! │         │ ground truth        ┌───────────▼────────────┐ │
//! │         └────────────────────►│ ValidationSession/sink │ │
//! │                               └────────────────────────┘ │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use overwatch_sim::{ScenarioRunner, ScenarioId};
//!
//! let result = ScenarioRunner::new(42)
//!     .with_duration(10.0)
//!     .run(ScenarioId::Hysteresis)
//!     .await?;
//! assert!(result.passed);
//! ```

mod context;
mod error;
mod exporter;
mod oracle;
mod runner;
pub mod scenarios;

pub use context::SimContext;
pub use error::SimError;
pub use exporter::{CameraFrame, PersonPosition, SimEvent, SimExport, SimFrame};
pub use oracle::{default_walls, has_line_of_sight, segments_cross, Oracle, Patrol, SimCamera, Walker, Wall};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use scenarios::ScenarioId;
