//! Session identity and message construction

use kernel_config::SessionConfig;
use kernel_protocol::{JsonObject, Message, MessageContent, MessageHeader};

/// `(session id, username)` stamped on every header this process emits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub session_id: String,
    pub username: String,
}

impl SessionIdentity {
    pub fn new(session_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            username: username.into(),
        }
    }
}

impl From<&SessionConfig> for SessionIdentity {
    fn from(config: &SessionConfig) -> Self {
        Self::new(config.session_id.clone(), config.username.clone())
    }
}

/// Builds outgoing messages with fresh headers
#[derive(Debug, Clone)]
pub struct MessageFactory {
    identity: SessionIdentity,
}

impl MessageFactory {
    pub fn new(identity: SessionIdentity) -> Self {
        Self { identity }
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    pub fn header(&self, content: &MessageContent) -> MessageHeader {
        MessageHeader::new(
            &content.message_type(),
            &self.identity.session_id,
            &self.identity.username,
        )
    }

    /// A root message with no parent and no routing identities
    pub fn message(&self, content: MessageContent) -> Message {
        Message {
            identities: Vec::new(),
            header: self.header(&content),
            parent_header: None,
            metadata: JsonObject::new(),
            content,
            buffers: Vec::new(),
        }
    }

    /// A reply routed back to the sender of `parent`
    pub fn reply(&self, parent: &Message, content: MessageContent) -> Message {
        Message {
            identities: parent.identities.clone(),
            parent_header: Some(parent.header.clone()),
            ..self.message(content)
        }
    }

    /// A broadcast, optionally parented to the request that caused it
    pub fn broadcast(&self, parent: Option<&MessageHeader>, content: MessageContent) -> Message {
        Message {
            parent_header: parent.cloned(),
            ..self.message(content)
        }
    }
}
