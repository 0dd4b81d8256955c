//! Overwatch Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" seam that lets the Overwatch engines run
//! against the **Production** clock (tokio) or a **Simulation** clock.
//!
//! Everything the core needs from the outside world goes through here:
//! - Time (`now()`, `timestamp()`, `sleep()`)
//! - Output (`OutputSink::publish()`)
//!
//! # Example
//!
//! ```ignore
//! use overwatch_env::{OverwatchContext, OutputSink};
//!
//! async fn push_loop<Ctx: OverwatchContext, S: OutputSink>(ctx: &Ctx, sink: &S) {
//!     while !sink.is_closed() {
//!         publish_snapshot(ctx.timestamp(), sink).await;
//!         ctx.sleep(Duration::from_millis(100)).await;
//!     }
//! }
//! ```

mod context;
mod sink;
mod types;
mod error;
mod tokio_impl;

pub use context::OverwatchContext;
pub use sink::{OutputSink, BroadcastSink};
pub use types::{Envelope, Topic};
pub use error::EnvError;
pub use tokio_impl::TokioContext;
