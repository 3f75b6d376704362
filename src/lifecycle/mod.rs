//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Forking a loop (task.rs):
//!     BackgroundTask::spawn → own Shutdown → loop selects on tick / shutdown
//!
//! Stopping (shutdown.rs):
//!     cancel() → broadcast → loop exits after the current round
//!     shutdown().await → cancel + join
//!     drop → detach; the loop keeps its own sender and runs on
//! ```
//!
//! # Design Decisions
//! - Only an explicit cancel stops a loop
//! - Loop periods below `MIN_LOOP_INTERVAL` are clamped, never passed to `interval`
//! - Loop failures are logged inside the loop, never propagated to the forker

pub mod shutdown;
pub mod task;

pub use shutdown::Shutdown;
pub use task::{BackgroundTask, MIN_LOOP_INTERVAL};
