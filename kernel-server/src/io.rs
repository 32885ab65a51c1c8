//! Per-request kernel I/O
//!
//! Output from the engine is published on IOPUB parented to the execute
//! request. Input is requested on STDIN, routed to the peer that sent the
//! execute request.

use crate::error::ServerError;
use crate::iopub::IoPub;
use async_trait::async_trait;
use kernel_interfaces::{DisplayPayload, EngineError, EngineResult, KernelIo};
use kernel_protocol::content::{ClearOutput, DisplayData, InputRequest, Stream, StreamName};
use kernel_protocol::{JsonObject, Message, MessageContent, MessageHeader};
use kernel_runtime::Interruptible;
use kernel_transport::{SocketManager, TransportError};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct RequestIo {
    iopub: Arc<IoPub>,
    sockets: Arc<SocketManager>,
    request: Message,
    allow_stdin: bool,
}

impl RequestIo {
    pub fn new(
        iopub: Arc<IoPub>,
        sockets: Arc<SocketManager>,
        request: Message,
        allow_stdin: bool,
    ) -> Self {
        Self {
            iopub,
            sockets,
            request,
            allow_stdin,
        }
    }

    async fn publish(&self, content: MessageContent) -> EngineResult<()> {
        self.iopub
            .publish(Some(&self.request.header), content)
            .await
            .map_err(engine_error)
    }
}

fn engine_error(error: ServerError) -> EngineError {
    if error.is_interruption() {
        EngineError::Interrupted
    } else {
        EngineError::Io(error.to_string())
    }
}

fn transient(display_id: Option<&str>) -> JsonObject {
    let mut transient = JsonObject::new();
    if let Some(id) = display_id {
        transient.insert("display_id".to_string(), Value::String(id.to_string()));
    }
    transient
}

#[async_trait]
impl KernelIo for RequestIo {
    async fn stream(&self, name: StreamName, text: &str) -> EngineResult<()> {
        self.publish(MessageContent::Stream(Stream {
            name,
            text: text.to_string(),
        }))
        .await
    }

    async fn display(&self, payload: DisplayPayload, display_id: Option<&str>) -> EngineResult<()> {
        self.publish(MessageContent::DisplayData(DisplayData {
            data: payload.data,
            metadata: payload.metadata,
            transient: transient(display_id),
        }))
        .await
    }

    async fn update_display(&self, payload: DisplayPayload, display_id: &str) -> EngineResult<()> {
        self.publish(MessageContent::UpdateDisplayData(DisplayData {
            data: payload.data,
            metadata: payload.metadata,
            transient: transient(Some(display_id)),
        }))
        .await
    }

    async fn clear_output(&self, wait: bool) -> EngineResult<()> {
        self.publish(MessageContent::ClearOutput(ClearOutput { wait })).await
    }

    async fn read_input(&self, prompt: &str, password: bool) -> EngineResult<String> {
        if !self.allow_stdin {
            return Err(EngineError::StdinNotAllowed);
        }

        let stdin = self.sockets.stdin();
        let request = self.iopub.factory().reply(
            &self.request,
            MessageContent::InputRequest(InputRequest {
                prompt: prompt.to_string(),
                password,
            }),
        );
        stdin
            .send_message(&request)
            .await
            .map_err(|e| engine_error(e.into()))?;
        debug!(msg_id = %request.header.msg_id, "Waiting for input_reply");

        loop {
            match stdin.receive_message().await {
                Ok(Message {
                    parent_header,
                    content: MessageContent::InputReply(reply),
                    ..
                }) => {
                    if answers(parent_header.as_ref(), &request) {
                        return Ok(reply.value);
                    }
                    warn!("Ignoring input_reply to a different input_request");
                }
                Ok(other) => {
                    warn!(msg_type = %other.message_type(), "Ignoring unexpected message on stdin")
                }
                Err(e) if e.is_per_message() => warn!("Dropping stdin message: {}", e),
                Err(TransportError::Interrupted) => return Err(EngineError::Interrupted),
                Err(e) => return Err(EngineError::Io(e.to_string())),
            }
        }
    }
}

/// Whether a reply's parent header names `request`
fn answers(parent: Option<&MessageHeader>, request: &Message) -> bool {
    parent.is_some_and(|parent| parent.msg_id == request.header.msg_id)
}
