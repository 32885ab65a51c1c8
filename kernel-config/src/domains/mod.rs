//! Domain-specific configuration modules

pub mod connection;
pub mod logging;
pub mod runtime;
pub mod session;
pub mod utils;

use crate::error::ConfigResult;
use crate::validation::Validatable;
use serde::{Deserialize, Serialize};

/// Complete kernel configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct KernelConfig {
    /// Transport endpoints and signing
    pub connection: connection::ConnectionConfig,

    /// Identity stamped on outgoing headers
    pub session: session::SessionConfig,

    /// Loop and shutdown tuning
    pub runtime: runtime::RuntimeConfig,

    pub logging: logging::LoggingConfig,
}

impl KernelConfig {
    /// Validate all domain configurations
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.connection.validate()?;
        self.session.validate()?;
        self.runtime.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    /// Render the configuration as YAML
    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}
