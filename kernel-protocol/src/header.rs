//! Message header

use crate::message::MessageType;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Protocol version stamped on every header this engine emits
pub const PROTOCOL_VERSION: &str = "5.3";

fn default_version() -> String {
    PROTOCOL_VERSION.to_string()
}

/// Typed view of the `header` and `parent_header` frames
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    pub msg_id: String,
    pub msg_type: String,
    #[serde(default)]
    pub session: String,
    #[serde(default)]
    pub username: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub date: String,
}

impl MessageHeader {
    /// Fresh header with a random id and the current UTC time
    pub fn new(msg_type: &MessageType, session: &str, username: &str) -> Self {
        Self {
            msg_id: Uuid::new_v4().to_string(),
            msg_type: msg_type.as_str().to_string(),
            session: session.to_string(),
            username: username.to_string(),
            version: default_version(),
            date: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
        }
    }

    pub fn kind(&self) -> MessageType {
        MessageType::parse(&self.msg_type)
    }
}
