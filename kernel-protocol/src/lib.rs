//! Kernel messaging protocol
//!
//! Wire-level framing, keyed signatures and the typed message model shared by
//! every other kernel crate. The transport crates only ever move
//! [`RawMessage`] values around; handlers work with the typed [`Message`].

pub mod channel;
pub mod content;
pub mod error;
pub mod header;
pub mod message;
pub mod signing;
pub mod wire;

pub use channel::{ChannelType, SocketPattern, SocketSide};
pub use error::{ProtocolError, ProtocolResult};
pub use header::{MessageHeader, PROTOCOL_VERSION};
pub use message::{Message, MessageContent, MessageType};
pub use signing::{SignatureScheme, Signer};
pub use wire::{JsonObject, RawMessage, WireCodec, DELIMITER};
