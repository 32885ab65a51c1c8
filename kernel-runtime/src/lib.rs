//! Concurrency runtime for the kernel
//!
//! One task per latency-sensitive channel loop, supervised as a group: the
//! first loop to exit (for any reason) cancels the rest, and closing shared
//! resources is bounded by a hard deadline.

pub mod closing;
pub mod error;
pub mod loops;
pub mod merge;
pub mod supervisor;

pub use closing::{close_within, Closeable};
pub use error::{Interruptible, RuntimeError, RuntimeResult};
pub use loops::run_loop;
pub use merge::MergedError;
pub use supervisor::LoopSupervisor;

pub use tokio_util::sync::CancellationToken;
