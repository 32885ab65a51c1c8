//! Kernel transport
//!
//! Each [`SocketChannel`] owns one ZeroMQ socket through a driver task; the
//! channel's public handle only talks to the driver over queues, so sending
//! and receiving from different tasks never contend on the socket itself.
//! [`SocketManager`] opens the five channels together and closes them
//! together.

pub mod channel;
pub mod dispatcher;
pub mod error;
pub mod manager;
mod socket;

pub use channel::{ChannelOptions, SocketChannel};
pub use dispatcher::{CallbackDispatcher, CallbackId, FnCallback, MessageCallback, MessageFilter};
pub use error::{is_interruption, TransportError, TransportResult};
pub use manager::SocketManager;
