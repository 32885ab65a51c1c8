//! Typed messages
//!
//! [`MessageType`] is a closed set of known kinds plus `Other` for anything
//! unrecognised; [`MessageContent`] pairs each kind with its payload type so
//! routing is an exhaustive `match` rather than a string lookup.

use crate::content::*;
use crate::error::{ProtocolError, ProtocolResult};
use crate::header::MessageHeader;
use crate::wire::{JsonObject, RawMessage};
use bytes::Bytes;
use serde_json::Value;
use std::fmt;

macro_rules! define_messages {
    ($($variant:ident($payload:ty) => $name:literal),* $(,)?) => {
        /// Known message kinds
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub enum MessageType {
            $($variant,)*
            Other(String),
        }

        impl MessageType {
            pub fn as_str(&self) -> &str {
                match self {
                    $(MessageType::$variant => $name,)*
                    MessageType::Other(name) => name,
                }
            }

            pub fn parse(name: &str) -> Self {
                match name {
                    $($name => MessageType::$variant,)*
                    other => MessageType::Other(other.to_string()),
                }
            }
        }

        /// Message payload, one variant per known kind
        #[derive(Debug, Clone, PartialEq)]
        pub enum MessageContent {
            $($variant($payload),)*
            Other { msg_type: String, content: Value },
        }

        impl MessageContent {
            pub fn message_type(&self) -> MessageType {
                match self {
                    $(MessageContent::$variant(_) => MessageType::$variant,)*
                    MessageContent::Other { msg_type, .. } => MessageType::parse(msg_type),
                }
            }

            pub fn to_value(&self) -> ProtocolResult<Value> {
                let value = match self {
                    $(MessageContent::$variant(payload) => serde_json::to_value(payload),)*
                    MessageContent::Other { content, .. } => Ok(content.clone()),
                };
                value.map_err(|source| ProtocolError::Content {
                    msg_type: self.message_type().as_str().to_string(),
                    source,
                })
            }

            pub fn from_value(msg_type: &MessageType, value: Value) -> ProtocolResult<Self> {
                let content = match msg_type {
                    $(MessageType::$variant => {
                        serde_json::from_value(value).map(MessageContent::$variant)
                    })*
                    MessageType::Other(name) => Ok(MessageContent::Other {
                        msg_type: name.clone(),
                        content: value,
                    }),
                };
                content.map_err(|source| ProtocolError::Content {
                    msg_type: msg_type.as_str().to_string(),
                    source,
                })
            }
        }
    };
}

define_messages! {
    KernelInfoRequest(KernelInfoRequest) => "kernel_info_request",
    KernelInfoReply(KernelInfoReply) => "kernel_info_reply",
    ExecuteRequest(ExecuteRequest) => "execute_request",
    ExecuteReply(ExecuteReply) => "execute_reply",
    ExecuteInput(ExecuteInput) => "execute_input",
    ExecuteResult(ExecuteResult) => "execute_result",
    Stream(Stream) => "stream",
    Status(KernelStatus) => "status",
    Error(ErrorContent) => "error",
    IsCompleteRequest(IsCompleteRequest) => "is_complete_request",
    IsCompleteReply(IsCompleteReply) => "is_complete_reply",
    InterruptRequest(InterruptRequest) => "interrupt_request",
    InterruptReply(InterruptReply) => "interrupt_reply",
    ShutdownRequest(ShutdownRequest) => "shutdown_request",
    ShutdownReply(ShutdownReply) => "shutdown_reply",
    CommOpen(CommOpen) => "comm_open",
    CommMsg(CommMsg) => "comm_msg",
    CommClose(CommClose) => "comm_close",
    CommInfoRequest(CommInfoRequest) => "comm_info_request",
    CommInfoReply(CommInfoReply) => "comm_info_reply",
    HistoryRequest(HistoryRequest) => "history_request",
    HistoryReply(HistoryReply) => "history_reply",
    InputRequest(InputRequest) => "input_request",
    InputReply(InputReply) => "input_reply",
    DisplayData(DisplayData) => "display_data",
    UpdateDisplayData(DisplayData) => "update_display_data",
    ClearOutput(ClearOutput) => "clear_output",
    ConnectRequest(ConnectRequest) => "connect_request",
    ConnectReply(ConnectReply) => "connect_reply",
    CompleteRequest(CompleteRequest) => "complete_request",
    CompleteReply(CompleteReply) => "complete_reply",
    NoOp(Empty) => "none",
}

impl MessageType {
    /// `foo_request` -> `foo_reply`
    pub fn reply_type(&self) -> Option<MessageType> {
        self.as_str()
            .strip_suffix("_request")
            .map(|stem| MessageType::parse(&format!("{}_reply", stem)))
    }

    pub fn is_request(&self) -> bool {
        self.as_str().ends_with("_request")
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl MessageContent {
    /// `<type>_reply` with `status: error` for a request that failed in its handler
    pub fn error_reply(reply_type: &MessageType, error: ErrorContent) -> ProtocolResult<Self> {
        let content = serde_json::to_value(ErrorReply::new(error)).map_err(|source| {
            ProtocolError::Content {
                msg_type: reply_type.as_str().to_string(),
                source,
            }
        })?;
        Ok(MessageContent::Other {
            msg_type: reply_type.as_str().to_string(),
            content,
        })
    }
}

/// A decoded message with typed header and content
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub identities: Vec<Bytes>,
    pub header: MessageHeader,
    pub parent_header: Option<MessageHeader>,
    pub metadata: JsonObject,
    pub content: MessageContent,
    pub buffers: Vec<Bytes>,
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        self.header.kind()
    }

    /// Interpret a raw message. Content is parsed according to the header's `msg_type`.
    pub fn from_raw(raw: RawMessage) -> ProtocolResult<Self> {
        let header: MessageHeader =
            serde_json::from_value(Value::Object(raw.header)).map_err(ProtocolError::Header)?;
        let parent_header = raw
            .parent_header
            .map(|parent| serde_json::from_value(Value::Object(parent)))
            .transpose()
            .map_err(ProtocolError::Header)?;
        let content = MessageContent::from_value(&header.kind(), raw.content)?;

        Ok(Self {
            identities: raw.identities,
            header,
            parent_header,
            metadata: raw.metadata.unwrap_or_default(),
            content,
            buffers: raw.buffers,
        })
    }

    pub fn to_raw(&self) -> ProtocolResult<RawMessage> {
        Ok(RawMessage {
            identities: self.identities.clone(),
            header: header_object(&self.header)?,
            parent_header: self.parent_header.as_ref().map(header_object).transpose()?,
            metadata: if self.metadata.is_empty() {
                None
            } else {
                Some(self.metadata.clone())
            },
            content: self.content.to_value()?,
            buffers: self.buffers.clone(),
        })
    }
}

fn header_object(header: &MessageHeader) -> ProtocolResult<JsonObject> {
    match serde_json::to_value(header).map_err(ProtocolError::Header)? {
        Value::Object(object) => Ok(object),
        _ => Err(ProtocolError::NotAnObject { part: "header" }),
    }
}
