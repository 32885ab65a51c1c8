//! Channel identities and the socket pattern each side uses

use serde::{Deserialize, Serialize};
use std::fmt;

/// The five logical channels of a kernel connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Heartbeat,
    Shell,
    Control,
    Stdin,
    Iopub,
}

/// Which end of the connection a socket belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketSide {
    /// The kernel; binds every channel
    Server,
    /// A front end; connects to every channel
    Client,
}

/// Messaging pattern of a concrete socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketPattern {
    Router,
    Dealer,
    Publish,
    Subscribe,
    Reply,
    Request,
}

impl ChannelType {
    pub const ALL: [ChannelType; 5] = [
        ChannelType::Heartbeat,
        ChannelType::Shell,
        ChannelType::Control,
        ChannelType::Stdin,
        ChannelType::Iopub,
    ];

    /// Short name used in connection files and logs
    pub fn name(&self) -> &'static str {
        match self {
            ChannelType::Heartbeat => "hb",
            ChannelType::Shell => "shell",
            ChannelType::Control => "control",
            ChannelType::Stdin => "stdin",
            ChannelType::Iopub => "iopub",
        }
    }

    /// Socket pattern for the given side. Server and client patterns are always a compatible pair.
    pub fn pattern(&self, side: SocketSide) -> SocketPattern {
        match (self, side) {
            (ChannelType::Heartbeat, SocketSide::Server) => SocketPattern::Reply,
            (ChannelType::Heartbeat, SocketSide::Client) => SocketPattern::Request,
            (ChannelType::Iopub, SocketSide::Server) => SocketPattern::Publish,
            (ChannelType::Iopub, SocketSide::Client) => SocketPattern::Subscribe,
            (_, SocketSide::Server) => SocketPattern::Router,
            (_, SocketSide::Client) => SocketPattern::Dealer,
        }
    }

    /// Heartbeat frames are echoed raw and never pass through the codec
    pub fn uses_envelope(&self) -> bool {
        !matches!(self, ChannelType::Heartbeat)
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl SocketPattern {
    pub fn can_send(&self) -> bool {
        !matches!(self, SocketPattern::Subscribe)
    }

    pub fn can_receive(&self) -> bool {
        !matches!(self, SocketPattern::Publish)
    }

    /// Strict request/reply alternation (heartbeat)
    pub fn is_lockstep(&self) -> bool {
        matches!(self, SocketPattern::Reply | SocketPattern::Request)
    }
}
