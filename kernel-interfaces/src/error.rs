//! Engine error types

use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The request did not allow stdin
    #[error("Input was requested but this request does not allow stdin")]
    StdinNotAllowed,

    /// Work was cancelled before it finished
    #[error("Interrupted")]
    Interrupted,

    /// The kernel could not deliver output or input
    #[error("Kernel I/O failed: {0}")]
    Io(String),

    #[error("Process error: {0}")]
    Process(#[from] std::io::Error),

    #[error("Engine is unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    pub fn is_interruption(&self) -> bool {
        matches!(self, EngineError::Interrupted)
    }
}
