//! Server error types

use kernel_config::ConfigError;
use kernel_interfaces::EngineError;
use kernel_protocol::ProtocolError;
use kernel_runtime::{Interruptible, RuntimeError};
use kernel_transport::TransportError;
use thiserror::Error;

pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Operation on a comm that has been closed
    #[error("Comm {0} is closed")]
    CommClosed(String),

    #[error("A comm with id {0} is already open")]
    DuplicateComm(String),

    #[error("Execution queue is closed")]
    QueueClosed,

    /// A job on the execution queue panicked
    #[error("Handler panicked: {0}")]
    Panicked(String),

    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),
}

impl ServerError {
    /// Short name used as `ename` when the error is reported to a client
    pub fn kind(&self) -> &'static str {
        match self {
            ServerError::Transport(_) => "TransportError",
            ServerError::Protocol(_) => "ProtocolError",
            ServerError::Config(_) => "ConfigError",
            ServerError::Runtime(_) => "RuntimeError",
            ServerError::Engine(_) => "EngineError",
            ServerError::CommClosed(_) | ServerError::DuplicateComm(_) => "CommError",
            ServerError::QueueClosed => "QueueClosed",
            ServerError::Panicked(_) => "Panic",
            ServerError::UnexpectedReply(_) => "UnexpectedReply",
        }
    }
}

impl Interruptible for ServerError {
    fn is_interruption(&self) -> bool {
        match self {
            ServerError::Transport(e) => e.is_interruption(),
            ServerError::Runtime(e) => e.is_interruption(),
            ServerError::Engine(e) => e.is_interruption(),
            _ => false,
        }
    }
}
