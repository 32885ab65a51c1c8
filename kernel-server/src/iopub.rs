//! IOPUB publishing
//!
//! Everything the kernel broadcasts goes through [`IoPub`], which stamps
//! headers and keeps track of the request currently being handled so
//! messages sent from comm callbacks are parented to it.

use crate::error::ServerResult;
use crate::session::MessageFactory;
use async_trait::async_trait;
use kernel_protocol::content::{ExecutionState, KernelStatus};
use kernel_protocol::{Message, MessageContent, MessageHeader};
use kernel_transport::SocketManager;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Destination for broadcast messages
#[async_trait]
pub trait Broadcast: Send + Sync {
    async fn broadcast(&self, message: &Message) -> ServerResult<()>;
}

#[async_trait]
impl Broadcast for SocketManager {
    async fn broadcast(&self, message: &Message) -> ServerResult<()> {
        Ok(self.iopub().send_message(message).await?)
    }
}

pub struct IoPub {
    sink: Arc<dyn Broadcast>,
    factory: Arc<MessageFactory>,
    context: RwLock<Option<MessageHeader>>,
}

impl IoPub {
    pub fn new(sink: Arc<dyn Broadcast>, factory: Arc<MessageFactory>) -> Self {
        Self {
            sink,
            factory,
            context: RwLock::new(None),
        }
    }

    pub fn factory(&self) -> &MessageFactory {
        &self.factory
    }

    /// Publish `content` parented to `parent`
    pub async fn publish(
        &self,
        parent: Option<&MessageHeader>,
        content: MessageContent,
    ) -> ServerResult<()> {
        let message = self.factory.broadcast(parent, content);
        debug!(msg_type = %message.message_type(), "Publishing");
        self.sink.broadcast(&message).await
    }

    /// Publish parented to the request currently being handled, if any
    pub async fn publish_in_context(&self, content: MessageContent) -> ServerResult<()> {
        let parent = self.context.read().clone();
        self.publish(parent.as_ref(), content).await
    }

    pub async fn status(
        &self,
        parent: Option<&MessageHeader>,
        execution_state: ExecutionState,
    ) -> ServerResult<()> {
        self.publish(parent, MessageContent::Status(KernelStatus { execution_state }))
            .await
    }

    pub fn set_context(&self, parent: Option<MessageHeader>) {
        *self.context.write() = parent;
    }

    pub fn context(&self) -> Option<MessageHeader> {
        self.context.read().clone()
    }
}
