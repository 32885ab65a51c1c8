//! Client role
//!
//! Connects DEALER, SUB and REQ sockets to a running kernel. Used by the
//! `probe` command and by the integration tests.

use crate::error::{ServerError, ServerResult};
use crate::session::{MessageFactory, SessionIdentity};
use bytes::Bytes;
use kernel_config::{ConnectionConfig, RuntimeConfig};
use kernel_protocol::content::{ExecutionState, InputReply};
use kernel_protocol::{ChannelType, Message, MessageContent, MessageHeader, SocketSide, WireCodec};
use kernel_runtime::close_within;
use kernel_transport::SocketManager;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct KernelClient {
    sockets: SocketManager,
    factory: MessageFactory,
    close_timeout: Duration,
}

impl KernelClient {
    /// Connect to the kernel described by `connection`
    ///
    /// Waits one publish warm-up period after connecting so the IOPub
    /// subscription is in place before the first request is sent.
    pub async fn connect(
        connection: &ConnectionConfig,
        runtime: &RuntimeConfig,
        cancel: &CancellationToken,
    ) -> ServerResult<Self> {
        let codec = Arc::new(WireCodec::new(connection.signer()?));
        let sockets =
            SocketManager::open(connection, runtime, SocketSide::Client, codec, cancel).await?;
        tokio::time::sleep(runtime.publish_warmup).await;

        let identity = SessionIdentity::new(uuid::Uuid::new_v4().to_string(), "kernel-client");
        Ok(Self {
            sockets,
            factory: MessageFactory::new(identity),
            close_timeout: runtime.close_timeout,
        })
    }

    pub fn factory(&self) -> &MessageFactory {
        &self.factory
    }

    pub fn sockets(&self) -> &SocketManager {
        &self.sockets
    }

    /// Send a fresh root message and return it
    pub async fn send(
        &self,
        channel: ChannelType,
        content: MessageContent,
    ) -> ServerResult<Message> {
        let message = self.factory.message(content);
        self.sockets.channel(channel).send_message(&message).await?;
        Ok(message)
    }

    pub async fn receive(&self, channel: ChannelType) -> ServerResult<Message> {
        Ok(self.sockets.channel(channel).receive_message().await?)
    }

    /// Send a request and wait for the reply parented to it. Replies to
    /// other requests arriving first are skipped.
    pub async fn request(
        &self,
        channel: ChannelType,
        content: MessageContent,
    ) -> ServerResult<Message> {
        let request = self.send(channel, content).await?;
        loop {
            let reply = self.receive(channel).await?;
            if is_child_of(&reply, &request.header) {
                return Ok(reply);
            }
            debug!(
                %channel,
                msg_type = %reply.header.msg_type,
                "Skipping reply to another request"
            );
        }
    }

    pub async fn next_iopub(&self) -> ServerResult<Message> {
        self.receive(ChannelType::Iopub).await
    }

    /// Collect the IOPub messages caused by `parent`, up to and including
    /// its `idle` status
    pub async fn iopub_until_idle(&self, parent: &MessageHeader) -> ServerResult<Vec<Message>> {
        let mut collected = Vec::new();
        loop {
            let message = self.next_iopub().await?;
            if !is_child_of(&message, parent) {
                continue;
            }
            let idle = matches!(
                &message.content,
                MessageContent::Status(status) if status.execution_state == ExecutionState::Idle
            );
            collected.push(message);
            if idle {
                return Ok(collected);
            }
        }
    }

    /// Answer an `input_request` received on stdin
    pub async fn reply_input(
        &self,
        request: &Message,
        value: impl Into<String>,
    ) -> ServerResult<()> {
        if !matches!(request.content, MessageContent::InputRequest(_)) {
            return Err(ServerError::UnexpectedReply(request.header.msg_type.clone()));
        }
        let mut reply = self
            .factory
            .reply(request, MessageContent::InputReply(InputReply { value: value.into() }));
        // DEALER sockets carry no routing frames of their own
        reply.identities.clear();
        self.sockets.stdin().send_message(&reply).await?;
        Ok(())
    }

    /// Send `payload` on the heartbeat channel and return the echo
    pub async fn ping(&self, payload: &[u8]) -> ServerResult<Vec<Bytes>> {
        let heartbeat = self.sockets.heartbeat();
        heartbeat.send_raw(vec![Bytes::copy_from_slice(payload)]).await?;
        Ok(heartbeat.receive_raw().await?)
    }

    pub async fn close(&self) -> ServerResult<()> {
        Ok(close_within(&self.sockets, self.close_timeout).await?)
    }
}

fn is_child_of(message: &Message, parent: &MessageHeader) -> bool {
    message
        .parent_header
        .as_ref()
        .is_some_and(|header| header.msg_id == parent.msg_id)
}
