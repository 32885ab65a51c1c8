//! Kernel configuration
//!
//! Configuration is split by domain (connection, session, runtime, logging)
//! and assembled from a Jupyter connection file, an optional YAML file and
//! `KERNEL_*` environment overrides. Validation runs before any socket is
//! opened; every failure here is fatal at startup.

pub mod domains;
pub mod error;
pub mod loader;
pub mod validation;

pub use domains::{
    connection::ConnectionConfig,
    logging::{LogFormat, LogLevel, LoggingConfig},
    runtime::RuntimeConfig,
    session::SessionConfig,
    KernelConfig,
};
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use validation::Validatable;
