//! Connection configuration
//!
//! Field names follow the Jupyter connection file so the file can be
//! deserialized directly into this struct.

use crate::error::{ConfigError, ConfigResult};
use crate::validation::{validate_enum_choice, validate_required_string, Validatable};
use kernel_protocol::{ChannelType, SignatureScheme, Signer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::TcpListener;
use std::path::Path;

const TRANSPORTS: &[&str] = &["tcp", "ipc"];

/// Transport endpoints and signing material
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Transport scheme (`tcp` or `ipc`)
    #[serde(default = "default_transport")]
    pub transport: String,

    #[serde(default = "default_ip")]
    pub ip: String,

    pub shell_port: u16,
    pub iopub_port: u16,
    pub stdin_port: u16,
    pub control_port: u16,
    pub hb_port: u16,

    #[serde(default = "default_signature_scheme")]
    pub signature_scheme: String,

    /// HMAC key; empty disables signing
    pub key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel_name: Option<String>,
}

fn default_transport() -> String {
    "tcp".to_string()
}

fn default_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_signature_scheme() -> String {
    SignatureScheme::HmacSha256.as_str().to_string()
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            transport: default_transport(),
            ip: default_ip(),
            shell_port: 0,
            iopub_port: 0,
            stdin_port: 0,
            control_port: 0,
            hb_port: 0,
            signature_scheme: default_signature_scheme(),
            key: String::new(),
            kernel_name: None,
        }
    }
}

impl ConnectionConfig {
    /// Ports in `[hb, shell, control, stdin, iopub]` order
    pub fn with_ports(ip: impl Into<String>, ports: [u16; 5]) -> Self {
        let [hb, shell, control, stdin, iopub] = ports;
        Self {
            ip: ip.into(),
            hb_port: hb,
            shell_port: shell,
            control_port: control,
            stdin_port: stdin,
            iopub_port: iopub,
            ..Self::default()
        }
    }

    /// Pick five currently free TCP ports on `ip` and generate a random key
    pub fn with_free_ports(ip: impl Into<String>) -> ConfigResult<Self> {
        let ip = ip.into();
        // Hold every listener until all five are chosen so no port repeats.
        let listeners = (0..ChannelType::ALL.len())
            .map(|_| TcpListener::bind((ip.as_str(), 0)))
            .collect::<Result<Vec<_>, _>>()?;
        let mut ports = [0u16; 5];
        for (slot, listener) in ports.iter_mut().zip(&listeners) {
            *slot = listener.local_addr()?.port();
        }
        drop(listeners);

        let mut config = Self::with_ports(ip, ports);
        config.key = uuid::Uuid::new_v4().to_string();
        Ok(config)
    }

    /// Read a Jupyter connection file
    pub fn from_connection_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write this configuration as a Jupyter connection file
    pub fn write_connection_file(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn port(&self, channel: ChannelType) -> u16 {
        match channel {
            ChannelType::Heartbeat => self.hb_port,
            ChannelType::Shell => self.shell_port,
            ChannelType::Control => self.control_port,
            ChannelType::Stdin => self.stdin_port,
            ChannelType::Iopub => self.iopub_port,
        }
    }

    /// Mapped ports keyed by channel; channels with port 0 are absent
    pub fn ports(&self) -> BTreeMap<ChannelType, u16> {
        ChannelType::ALL
            .iter()
            .map(|channel| (*channel, self.port(*channel)))
            .filter(|(_, port)| *port != 0)
            .collect()
    }

    /// Endpoint for `channel`, e.g. `tcp://127.0.0.1:5555`
    pub fn address(&self, channel: ChannelType) -> ConfigResult<String> {
        let port = self
            .ports()
            .get(&channel)
            .copied()
            .ok_or(ConfigError::UnmappedChannel(channel))?;

        Ok(match self.transport.as_str() {
            "ipc" => format!("ipc://{}-{}", self.ip, port),
            transport => format!("{}://{}:{}", transport, self.ip, port),
        })
    }

    /// Signer for the configured scheme and key
    pub fn signer(&self) -> ConfigResult<Signer> {
        Ok(Signer::new(&self.signature_scheme, &self.key)?)
    }
}

impl Validatable for ConnectionConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_enum_choice(&self.transport, TRANSPORTS, "transport", self.domain_name())?;
        validate_required_string(&self.ip, "ip", self.domain_name())?;

        let ports = self.ports();
        for channel in ChannelType::ALL {
            if !ports.contains_key(&channel) {
                return Err(self.validation_error(format!("{}_port must be set", channel.name())));
            }
        }

        let mut seen = std::collections::BTreeSet::new();
        for (channel, port) in &ports {
            if !seen.insert(*port) {
                return Err(self.validation_error(format!(
                    "port {} for the {} channel is used by another channel",
                    port, channel
                )));
            }
        }

        self.signature_scheme
            .parse::<SignatureScheme>()
            .map_err(|e| self.validation_error(e.to_string()))?;

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "connection"
    }
}
