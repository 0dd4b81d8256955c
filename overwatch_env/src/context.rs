//! Core environment context trait for Overwatch components.

use async_trait::async_trait;
use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// The central interface for environment interaction.
///
/// Projection, fusion and assignment are pure computation over in-memory
/// state; every timestamp they see comes from an implementation of this
/// trait, so the same coordinator runs against the wall clock in production
/// and against a virtual clock in simulation.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time` and `SystemTime`
/// - **Simulation**: `SimContext` (in `overwatch_sim`) - manually advanced clock
#[async_trait]
pub trait OverwatchContext: Send + Sync + 'static {
    /// Returns the monotonic time since context creation.
    fn now(&self) -> Duration;

    /// Returns the wall-clock time used to stamp published output.
    fn system_time(&self) -> SystemTime;

    /// Returns `system_time()` as fractional seconds since the Unix epoch.
    ///
    /// This is the timestamp source handed to fusion and assignment. Callers
    /// must not mix it with another clock within one engine.
    fn timestamp(&self) -> f64 {
        self.system_time()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: advances the virtual clock
    async fn sleep(&self, duration: Duration);

    /// Spawns a background task.
    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static;

    /// Returns the context's seed (0 when not seeded).
    fn seed(&self) -> u64;
}
