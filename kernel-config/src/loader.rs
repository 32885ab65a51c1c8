//! Configuration loading and environment variable handling

use crate::domains::{connection::ConnectionConfig, KernelConfig};
use crate::error::{ConfigError, ConfigResult};
use std::path::Path;
use std::time::Duration;

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default prefix
    pub fn new() -> Self {
        Self {
            prefix: "KERNEL".to_string(),
        }
    }

    /// Create a new config loader with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load configuration from a YAML file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<KernelConfig> {
        let content = std::fs::read_to_string(path)?;
        let mut config: KernelConfig = serde_yaml::from_str(&content)?;
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env(&self) -> ConfigResult<KernelConfig> {
        let mut config = KernelConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Full startup chain: YAML (or defaults), then the connection file,
    /// then environment overrides, then validation.
    pub fn load(
        &self,
        config_path: Option<impl AsRef<Path>>,
        connection_file: Option<impl AsRef<Path>>,
    ) -> ConfigResult<KernelConfig> {
        let mut config = match config_path {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                serde_yaml::from_str(&content)?
            }
            None => KernelConfig::default(),
        };

        if let Some(path) = connection_file {
            config.connection = ConnectionConfig::from_connection_file(path)?;
        }

        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_overrides(&self, config: &mut KernelConfig) -> ConfigResult<()> {
        self.apply_connection_overrides(&mut config.connection)?;
        self.apply_session_overrides(config)?;
        self.apply_runtime_overrides(config)?;
        self.apply_logging_overrides(config)?;
        Ok(())
    }

    fn apply_connection_overrides(&self, connection: &mut ConnectionConfig) -> ConfigResult<()> {
        if let Ok(transport) = self.get_env_var("TRANSPORT") {
            connection.transport = transport;
        }
        if let Ok(ip) = self.get_env_var("IP") {
            connection.ip = ip;
        }
        if let Ok(key) = self.get_env_var("KEY") {
            connection.key = key;
        }
        if let Ok(scheme) = self.get_env_var("SIGNATURE_SCHEME") {
            connection.signature_scheme = scheme;
        }

        for (name, port) in [
            ("SHELL_PORT", &mut connection.shell_port),
            ("IOPUB_PORT", &mut connection.iopub_port),
            ("STDIN_PORT", &mut connection.stdin_port),
            ("CONTROL_PORT", &mut connection.control_port),
            ("HB_PORT", &mut connection.hb_port),
        ] {
            if let Ok(value) = self.get_env_var(name) {
                *port = value.parse().map_err(|e| {
                    ConfigError::EnvError(format!("Invalid {}_{}: {}", self.prefix, name, e))
                })?;
            }
        }

        Ok(())
    }

    fn apply_session_overrides(&self, config: &mut KernelConfig) -> ConfigResult<()> {
        if let Ok(session) = self.get_env_var("SESSION") {
            config.session.session_id = session;
        }
        if let Ok(username) = self.get_env_var("USERNAME") {
            config.session.username = username;
        }
        if let Ok(embedded) = self.get_env_var("EMBEDDED") {
            config.session.embedded = embedded.parse().map_err(|e| {
                ConfigError::EnvError(format!("Invalid {}_EMBEDDED: {}", self.prefix, e))
            })?;
        }
        Ok(())
    }

    fn apply_runtime_overrides(&self, config: &mut KernelConfig) -> ConfigResult<()> {
        if let Ok(timeout) = self.get_env_var("CLOSE_TIMEOUT_SECONDS") {
            let seconds: u64 = timeout.parse().map_err(|e| {
                ConfigError::EnvError(format!(
                    "Invalid {}_CLOSE_TIMEOUT_SECONDS: {}",
                    self.prefix, e
                ))
            })?;
            config.runtime.close_timeout = Duration::from_secs(seconds);
        }
        if let Ok(warmup) = self.get_env_var("PUBLISH_WARMUP_MS") {
            let millis: u64 = warmup.parse().map_err(|e| {
                ConfigError::EnvError(format!("Invalid {}_PUBLISH_WARMUP_MS: {}", self.prefix, e))
            })?;
            config.runtime.publish_warmup = Duration::from_millis(millis);
        }
        Ok(())
    }

    fn apply_logging_overrides(&self, config: &mut KernelConfig) -> ConfigResult<()> {
        if let Ok(level) = self.get_env_var("LOG_LEVEL") {
            config.logging.level = level.parse().map_err(ConfigError::EnvError)?;
        }
        if let Ok(format) = self.get_env_var("LOG_FORMAT") {
            config.logging.format = format.parse().map_err(ConfigError::EnvError)?;
        }
        Ok(())
    }

    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        std::env::var(format!("{}_{}", self.prefix, name))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::logging::LogLevel;
    use tempfile::NamedTempFile;

    const CONNECTION: &str = r#"{"shell_port": 7001, "iopub_port": 7002, "stdin_port": 7003,
        "control_port": 7004, "hb_port": 7005, "ip": "127.0.0.1", "key": "secret",
        "transport": "tcp", "signature_scheme": "hmac-sha256"}"#;

    fn connection_file() -> NamedTempFile {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), CONNECTION).unwrap();
        file
    }

    #[test]
    fn test_load_connection_file_with_yaml() {
        let connection = connection_file();
        let yaml = NamedTempFile::new().unwrap();
        std::fs::write(
            yaml.path(),
            "session:\n  username: alice\nruntime:\n  close_timeout: 3\nlogging:\n  level: debug\n",
        )
        .unwrap();

        temp_env::with_vars_unset(["TESTA_USERNAME", "TESTA_LOG_LEVEL"], || {
            let config = ConfigLoader::with_prefix("TESTA")
                .load(Some(yaml.path()), Some(connection.path()))
                .unwrap();
            assert_eq!(config.connection.shell_port, 7001);
            assert_eq!(config.session.username, "alice");
            assert_eq!(config.runtime.close_timeout, Duration::from_secs(3));
            assert_eq!(config.logging.level, LogLevel::Debug);
        });
    }

    #[test]
    fn test_env_overrides_win() {
        let connection = connection_file();
        temp_env::with_vars(
            [
                ("TESTB_KEY", Some("")),
                ("TESTB_SHELL_PORT", Some("8001")),
                ("TESTB_SESSION", Some("fixed-session")),
                ("TESTB_EMBEDDED", Some("true")),
                ("TESTB_LOG_LEVEL", Some("trace")),
            ],
            || {
                let config = ConfigLoader::with_prefix("TESTB")
                    .load(None::<&str>, Some(connection.path()))
                    .unwrap();
                assert_eq!(config.connection.shell_port, 8001);
                assert!(config.connection.key.is_empty());
                assert_eq!(config.session.session_id, "fixed-session");
                assert!(config.session.embedded);
                assert_eq!(config.logging.level, LogLevel::Trace);
            },
        );
    }

    #[test]
    fn test_invalid_env_values_are_errors() {
        let connection = connection_file();
        temp_env::with_var("TESTC_HB_PORT", Some("not-a-port"), || {
            let err = ConfigLoader::with_prefix("TESTC")
                .load(None::<&str>, Some(connection.path()))
                .unwrap_err();
            assert!(matches!(err, ConfigError::EnvError(_)));
        });
    }

    #[test]
    fn test_missing_ports_fail_validation() {
        temp_env::with_var_unset("TESTD_SHELL_PORT", || {
            let err = ConfigLoader::with_prefix("TESTD").from_env().unwrap_err();
            assert!(matches!(err, ConfigError::DomainError { .. }));
        });
    }

    #[test]
    fn test_from_file_reads_yaml() {
        let yaml = NamedTempFile::new().unwrap();
        std::fs::write(
            yaml.path(),
            concat!(
                "connection:\n",
                "  shell_port: 1\n",
                "  iopub_port: 2\n",
                "  stdin_port: 3\n",
                "  control_port: 4\n",
                "  hb_port: 5\n",
            ),
        )
        .unwrap();
        let config = ConfigLoader::with_prefix("TESTE").from_file(yaml.path()).unwrap();
        assert_eq!(config.connection.iopub_port, 2);
        assert_eq!(config.connection.transport, "tcp");
    }
}
