//! Production `OverwatchContext` on Tokio.

use crate::OverwatchContext;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// Production context backed by the Tokio runtime.
///
/// Wall-clock time is read once at construction and then advanced with the
/// monotonic clock, so timestamps handed to fusion and assignment never run
/// backwards when the system clock is stepped.
pub struct TokioContext {
    started: Instant,
    anchor: SystemTime,
}

impl TokioContext {
    /// Creates a context anchored at the current wall-clock time.
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            anchor: SystemTime::now(),
        }
    }

    /// Context whose wall clock starts at `anchor` (replaying recorded feeds).
    pub fn anchored_at(anchor: SystemTime) -> Self {
        Self {
            started: Instant::now(),
            anchor,
        }
    }

    /// Creates an Arc-wrapped context for sharing with a coordinator.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for TokioContext {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OverwatchContext for TokioContext {
    fn now(&self) -> Duration {
        self.started.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        self.anchor + self.started.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn spawn<F>(&self, _name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        // tokio::spawn has no task names outside tokio_unstable
        tokio::spawn(future);
    }

    fn seed(&self) -> u64 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    #[tokio::test]
    async fn test_sleep_moves_both_clocks() {
        let ctx = TokioContext::new();
        let (mono, wall) = (ctx.now(), ctx.timestamp());
        ctx.sleep(Duration::from_millis(10)).await;

        assert!(ctx.now() - mono >= Duration::from_millis(10));
        assert!(ctx.timestamp() - wall >= 0.010);
    }

    #[test]
    fn test_timestamp_is_epoch_seconds() {
        // Anything after 2020-01-01 is a plausible wall clock
        assert!(TokioContext::new().timestamp() > 1_577_836_800.0);
    }

    #[test]
    fn test_anchored_clock_starts_at_anchor() {
        let anchor = UNIX_EPOCH + Duration::from_secs(1_000);
        let ctx = TokioContext::anchored_at(anchor);
        let ts = ctx.timestamp();
        assert!((1_000.0..1_001.0).contains(&ts));
        assert_eq!(ctx.seed(), 0);
    }
}
