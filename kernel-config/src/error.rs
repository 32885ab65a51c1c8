//! Configuration error types

use kernel_protocol::{ChannelType, ProtocolError};
use thiserror::Error;

/// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// IO error reading or writing configuration, or probing ports
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// YAML parsing error
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// JSON parsing error (connection files)
    #[error("Failed to parse connection file: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Environment variable error
    #[error("Environment variable error: {0}")]
    EnvError(String),

    /// No port mapped for a channel
    #[error("No port configured for the {0} channel")]
    UnmappedChannel(ChannelType),

    /// Signature scheme or key rejected
    #[error("Invalid signature configuration: {0}")]
    Signature(#[from] ProtocolError),

    /// Domain-specific configuration error
    #[error("Domain configuration error in {domain}: {message}")]
    DomainError { domain: String, message: String },
}
