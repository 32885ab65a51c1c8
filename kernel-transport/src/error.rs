//! Transport error types

use kernel_config::ConfigError;
use kernel_protocol::{ChannelType, ProtocolError};
use kernel_runtime::{Interruptible, RuntimeError};
use thiserror::Error;
use zeromq::ZmqError;

pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Error)]
pub enum TransportError {
    /// A blocking receive was cancelled
    #[error("Interrupted")]
    Interrupted,

    #[error("Failed to bind the {channel} channel on {endpoint}: {source}")]
    Bind {
        channel: ChannelType,
        endpoint: String,
        #[source]
        source: ZmqError,
    },

    #[error("Failed to connect the {channel} channel to {endpoint}: {source}")]
    Connect {
        channel: ChannelType,
        endpoint: String,
        #[source]
        source: ZmqError,
    },

    /// I/O failure on an open socket
    #[error("Socket error on the {channel} channel: {source}")]
    Socket {
        channel: ChannelType,
        #[source]
        source: ZmqError,
    },

    /// The driver task is gone
    #[error("The {0} channel is closed")]
    Closed(ChannelType),

    /// Operation not allowed by the socket pattern or its current turn
    #[error("The {channel} channel cannot {operation}")]
    Unsupported {
        channel: ChannelType,
        operation: &'static str,
    },

    #[error("Refusing to send an empty multipart message")]
    EmptyMessage,

    /// Failures reported by the socket while closing
    #[error("Closing the {channel} channel failed: {}", .errors.join("; "))]
    Close {
        channel: ChannelType,
        errors: Vec<String>,
    },

    /// Envelope could not be decoded or encoded
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl TransportError {
    /// Failures confined to one message; the channel keeps running
    pub fn is_per_message(&self) -> bool {
        matches!(self, TransportError::Protocol(e) if e.is_per_message())
    }

    /// Failures that must stop the owning loop
    pub fn is_fatal(&self) -> bool {
        !self.is_per_message() && !self.is_interruption()
    }
}

impl Interruptible for TransportError {
    fn is_interruption(&self) -> bool {
        matches!(self, TransportError::Interrupted)
    }
}

/// True if `error` carries a deliberate interruption anywhere in its chain
pub fn is_interruption(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| {
        matches!(cause.downcast_ref::<TransportError>(), Some(TransportError::Interrupted))
            || matches!(cause.downcast_ref::<RuntimeError>(), Some(RuntimeError::Interrupted))
    })
}
