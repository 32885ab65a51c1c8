//! Runtime error types

use crate::merge::MergedError;
use std::time::Duration;
use thiserror::Error;

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors that know whether they stand for a deliberate interruption.
/// Loops exit cleanly on interruptions and fail on anything else.
pub trait Interruptible {
    fn is_interruption(&self) -> bool;
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Cooperative cancellation was requested
    #[error("Interrupted")]
    Interrupted,

    /// A supervised loop returned an error
    #[error("Loop '{name}' failed: {source}")]
    LoopFailed {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// A supervised loop panicked
    #[error("Loop '{name}' panicked: {message}")]
    LoopPanicked { name: String, message: String },

    /// Closing did not finish in time; remaining resources were force-closed
    #[error("Closing {resource} did not finish within {timeout:?}")]
    CloseTimedOut { resource: String, timeout: Duration },

    /// Several independent failures
    #[error(transparent)]
    Merged(#[from] MergedError),
}

impl Interruptible for RuntimeError {
    fn is_interruption(&self) -> bool {
        matches!(self, RuntimeError::Interrupted)
    }
}

impl Interruptible for anyhow::Error {
    fn is_interruption(&self) -> bool {
        self.chain().any(|cause| {
            cause
                .downcast_ref::<RuntimeError>()
                .is_some_and(RuntimeError::is_interruption)
        })
    }
}
