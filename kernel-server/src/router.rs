//! Request routing
//!
//! Every request on shell or control is bracketed by `busy` and `idle`
//! status broadcasts, whatever the handler does. Handler failures,
//! including panics, become an error reply to the sender; only an
//! interruption escapes to the channel loop.

use crate::comm::CommManager;
use crate::counter::ExecutionCounter;
use crate::error::{ServerError, ServerResult};
use crate::history::HistoryStore;
use crate::io::RequestIo;
use crate::iopub::IoPub;
use crate::queue::{panic_message, ExecutionQueue};
use chrono::{SecondsFormat, Utc};
use futures::FutureExt;
use kernel_interfaces::{ExecutionEngine, ExecutionOutcome, ExecutionRequest, KernelIo, Renderer};
use kernel_protocol::content::*;
use kernel_protocol::{
    ChannelType, JsonObject, Message, MessageContent, MessageHeader, RawMessage, PROTOCOL_VERSION,
};
use kernel_runtime::Interruptible;
use kernel_transport::{SocketManager, TransportError};
use parking_lot::Mutex;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Stderr text published when an execution is aborted
pub const ABORT_MESSAGE: &str = "The execution was interrupted";

/// Whether the channel loop keeps going after a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Recorded when a `shutdown_request` has been served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownRequested {
    pub restart: bool,
}

/// A decoded request and the channel it arrived on
struct Incoming<'a> {
    channel: ChannelType,
    message: &'a Message,
}

pub struct RequestRouter {
    sockets: Arc<SocketManager>,
    iopub: Arc<IoPub>,
    comms: Arc<CommManager>,
    queue: Arc<ExecutionQueue>,
    engine: Arc<dyn ExecutionEngine>,
    renderer: Arc<dyn Renderer>,
    counter: ExecutionCounter,
    history: HistoryStore,
    shutdown: Mutex<Option<ShutdownRequested>>,
}

impl RequestRouter {
    pub fn new(
        sockets: Arc<SocketManager>,
        iopub: Arc<IoPub>,
        comms: Arc<CommManager>,
        queue: Arc<ExecutionQueue>,
        engine: Arc<dyn ExecutionEngine>,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        Self {
            sockets,
            iopub,
            comms,
            queue,
            engine,
            renderer,
            counter: ExecutionCounter::new(),
            history: HistoryStore::new(),
            shutdown: Mutex::new(None),
        }
    }

    pub fn counter(&self) -> &ExecutionCounter {
        &self.counter
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn comms(&self) -> &Arc<CommManager> {
        &self.comms
    }

    pub fn shutdown_requested(&self) -> Option<ShutdownRequested> {
        *self.shutdown.lock()
    }

    /// Handle one verified message from `channel`
    ///
    /// # Errors
    /// Only an interruption is returned: after a served `shutdown_request`,
    /// or when the kernel is being cancelled.
    pub async fn handle(&self, channel: ChannelType, raw: &RawMessage) -> ServerResult<()> {
        let (message, decode_error) = match Message::from_raw(raw.clone()) {
            Ok(message) => (message, None),
            Err(e) => match header_only(raw) {
                Some(message) => (message, Some(e)),
                None => {
                    warn!(%channel, "Dropping message with unreadable header: {}", e);
                    return Ok(());
                }
            },
        };
        let incoming = Incoming {
            channel,
            message: &message,
        };
        let parent = message.header.clone();
        debug!(%channel, msg_type = %parent.msg_type, msg_id = %parent.msg_id, "Handling request");

        self.publish_status(&parent, ExecutionState::Busy).await;
        if channel == ChannelType::Shell {
            self.iopub.set_context(Some(parent.clone()));
        }

        let handled = AssertUnwindSafe(async {
            match decode_error {
                Some(e) => Err(ServerError::from(e)),
                None => self.dispatch(&incoming).await,
            }
        })
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(ServerError::Panicked(panic_message(panic))));

        let flow = match handled {
            Ok(flow) => flow,
            Err(e) if e.is_interruption() => Flow::Stop,
            Err(e) => {
                warn!(%channel, msg_type = %parent.msg_type, "Request failed: {}", e);
                self.reply_error(&incoming, &e).await;
                Flow::Continue
            }
        };

        if channel == ChannelType::Shell {
            self.iopub.set_context(None);
        }
        self.publish_status(&parent, ExecutionState::Idle).await;

        match flow {
            Flow::Continue => Ok(()),
            Flow::Stop => Err(TransportError::Interrupted.into()),
        }
    }

    async fn dispatch(&self, req: &Incoming<'_>) -> ServerResult<Flow> {
        match &req.message.content {
            MessageContent::KernelInfoRequest(_) => self.kernel_info(req).await,
            MessageContent::ExecuteRequest(request) => self.execute(req, request).await,
            MessageContent::IsCompleteRequest(request) => self.is_complete(req, request).await,
            MessageContent::InterruptRequest(_) => self.interrupt(req).await,
            MessageContent::ShutdownRequest(request) => self.shutdown(req, request).await,
            MessageContent::CommInfoRequest(request) => self.comm_info(req, request).await,
            MessageContent::HistoryRequest(request) => self.history_reply(req, request).await,
            MessageContent::ConnectRequest(_) => self.connect(req).await,
            MessageContent::CompleteRequest(request) => self.complete(req, request).await,
            MessageContent::CommOpen(open) => {
                let (comms, open) = (self.comms.clone(), open.clone());
                self.queue.run(async move { comms.process_comm_open(open).await }).await??;
                Ok(Flow::Continue)
            }
            MessageContent::CommMsg(message) => {
                let (comms, message) = (self.comms.clone(), message.clone());
                self.queue.run(async move { comms.process_comm_msg(message).await }).await??;
                Ok(Flow::Continue)
            }
            MessageContent::CommClose(close) => {
                let (comms, close) = (self.comms.clone(), close.clone());
                self.queue.run(async move { comms.process_comm_close(close).await }).await??;
                Ok(Flow::Continue)
            }
            MessageContent::KernelInfoReply(_)
            | MessageContent::ExecuteReply(_)
            | MessageContent::ExecuteInput(_)
            | MessageContent::ExecuteResult(_)
            | MessageContent::Stream(_)
            | MessageContent::Status(_)
            | MessageContent::Error(_)
            | MessageContent::IsCompleteReply(_)
            | MessageContent::InterruptReply(_)
            | MessageContent::ShutdownReply(_)
            | MessageContent::CommInfoReply(_)
            | MessageContent::HistoryReply(_)
            | MessageContent::InputRequest(_)
            | MessageContent::InputReply(_)
            | MessageContent::DisplayData(_)
            | MessageContent::UpdateDisplayData(_)
            | MessageContent::ClearOutput(_)
            | MessageContent::ConnectReply(_)
            | MessageContent::CompleteReply(_)
            | MessageContent::NoOp(_)
            | MessageContent::Other { .. } => self.unknown(req).await,
        }
    }

    async fn reply(&self, req: &Incoming<'_>, content: MessageContent) -> ServerResult<()> {
        let reply = self.iopub.factory().reply(req.message, content);
        self.send(req.channel, &reply).await
    }

    async fn send(&self, channel: ChannelType, message: &Message) -> ServerResult<()> {
        Ok(self.sockets.channel(channel).send_message(message).await?)
    }

    async fn publish_status(&self, parent: &MessageHeader, state: ExecutionState) {
        if let Err(e) = self.iopub.status(Some(parent), state).await {
            warn!(?state, "Failed to publish status: {}", e);
        }
    }

    async fn reply_error(&self, req: &Incoming<'_>, error: &ServerError) {
        let Some(reply_type) = req.message.message_type().reply_type() else {
            return;
        };

        let mut traceback = Vec::new();
        let mut cause: Option<&dyn std::error::Error> = Some(error);
        while let Some(e) = cause {
            traceback.push(e.to_string());
            cause = e.source();
        }
        let content = ErrorContent {
            ename: error.kind().to_string(),
            evalue: error.to_string(),
            traceback,
        };

        let sent = match MessageContent::error_reply(&reply_type, content) {
            Ok(content) => self.reply(req, content).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = sent {
            warn!(%reply_type, "Failed to send error reply: {}", e);
        }
    }

    async fn kernel_info(&self, req: &Incoming<'_>) -> ServerResult<Flow> {
        let implementation = self.engine.implementation();
        let reply = KernelInfoReply {
            status: ReplyStatus::Ok,
            protocol_version: PROTOCOL_VERSION.to_string(),
            implementation: implementation.name,
            implementation_version: implementation.version,
            language_info: self.engine.language_info(),
            banner: implementation.banner,
            help_links: Vec::new(),
        };
        self.reply(req, MessageContent::KernelInfoReply(reply)).await?;
        Ok(Flow::Continue)
    }

    async fn execute(&self, req: &Incoming<'_>, request: &ExecuteRequest) -> ServerResult<Flow> {
        let started = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        let parent = &req.message.header;
        let execution_count = self.counter.claim(request.store_history);

        self.iopub
            .publish(
                Some(parent),
                MessageContent::ExecuteInput(ExecuteInput {
                    code: request.code.clone(),
                    execution_count,
                }),
            )
            .await?;
        if request.store_history {
            self.history.record(execution_count, &request.code);
        }

        let io: Arc<dyn KernelIo> = Arc::new(RequestIo::new(
            self.iopub.clone(),
            self.sockets.clone(),
            req.message.clone(),
            request.allow_stdin,
        ));
        let job = ExecutionRequest {
            code: request.code.clone(),
            execution_count,
            store_history: request.store_history,
            silent: request.silent,
            allow_stdin: request.allow_stdin,
        };
        let engine = self.engine.clone();
        let outcome = self.queue.run(async move { engine.execute(job, io).await }).await??;

        let (reply, mut metadata) = match outcome {
            ExecutionOutcome::Success(value) => {
                let rendered = value
                    .filter(|_| !request.silent)
                    .and_then(|value| self.renderer.render(&value));
                if let Some(payload) = rendered {
                    self.iopub
                        .publish(
                            Some(parent),
                            MessageContent::ExecuteResult(ExecuteResult {
                                execution_count,
                                data: payload.data,
                                metadata: payload.metadata,
                            }),
                        )
                        .await?;
                }
                let reply = ExecuteReply::Ok {
                    execution_count,
                    user_expressions: JsonObject::new(),
                    payload: Vec::new(),
                };
                (reply, JsonObject::new())
            }
            ExecutionOutcome::Failed(failure) => {
                self.iopub
                    .publish(
                        Some(parent),
                        MessageContent::Error(ErrorContent {
                            ename: failure.ename.clone(),
                            evalue: failure.evalue.clone(),
                            traceback: failure.traceback.clone(),
                        }),
                    )
                    .await?;
                let reply = ExecuteReply::Error {
                    execution_count,
                    ename: failure.ename,
                    evalue: failure.evalue,
                    traceback: failure.traceback,
                };
                (reply, failure.metadata)
            }
            ExecutionOutcome::Aborted => {
                info!(execution_count, "Execution aborted");
                self.iopub
                    .publish(
                        Some(parent),
                        MessageContent::Stream(Stream {
                            name: StreamName::Stderr,
                            text: ABORT_MESSAGE.to_string(),
                        }),
                    )
                    .await?;
                (ExecuteReply::Abort { execution_count }, JsonObject::new())
            }
        };

        metadata.insert("dependencies_met".to_string(), Value::Bool(true));
        metadata.insert(
            "engine".to_string(),
            Value::String(self.iopub.factory().identity().session_id.clone()),
        );
        metadata.insert(
            "status".to_string(),
            Value::String(status_name(reply.status()).to_string()),
        );
        metadata.insert("started".to_string(), Value::String(started));

        let mut message = self
            .iopub
            .factory()
            .reply(req.message, MessageContent::ExecuteReply(reply));
        message.metadata = metadata;
        self.send(req.channel, &message).await?;
        Ok(Flow::Continue)
    }

    async fn is_complete(
        &self,
        req: &Incoming<'_>,
        request: &IsCompleteRequest,
    ) -> ServerResult<Flow> {
        let status =
            kernel_logging::silenced(self.engine.check_syntax_complete(&request.code)).await;
        let reply = IsCompleteReply {
            status,
            indent: String::new(),
        };
        self.reply(req, MessageContent::IsCompleteReply(reply)).await?;
        Ok(Flow::Continue)
    }

    async fn interrupt(&self, req: &Incoming<'_>) -> ServerResult<Flow> {
        info!("Interrupting execution");
        self.engine.interrupt_in_flight();
        self.reply(
            req,
            MessageContent::InterruptReply(InterruptReply {
                status: ReplyStatus::Ok,
            }),
        )
        .await?;
        Ok(Flow::Continue)
    }

    async fn shutdown(&self, req: &Incoming<'_>, request: &ShutdownRequest) -> ServerResult<Flow> {
        info!(restart = request.restart, "Shutdown requested");
        if let Err(e) = self.engine.run_teardown().await {
            warn!("Engine teardown failed: {}", e);
        }
        self.reply(
            req,
            MessageContent::ShutdownReply(ShutdownReply {
                status: ReplyStatus::Ok,
                restart: request.restart,
            }),
        )
        .await?;
        *self.shutdown.lock() = Some(ShutdownRequested {
            restart: request.restart,
        });
        Ok(Flow::Stop)
    }

    async fn comm_info(&self, req: &Incoming<'_>, request: &CommInfoRequest) -> ServerResult<Flow> {
        let reply = CommInfoReply {
            status: ReplyStatus::Ok,
            comms: self.comms.comm_info(request.target_name.as_deref()),
        };
        self.reply(req, MessageContent::CommInfoReply(reply)).await?;
        Ok(Flow::Continue)
    }

    async fn history_reply(
        &self,
        req: &Incoming<'_>,
        request: &HistoryRequest,
    ) -> ServerResult<Flow> {
        let reply = HistoryReply {
            status: ReplyStatus::Ok,
            history: self.history.query(request),
        };
        self.reply(req, MessageContent::HistoryReply(reply)).await?;
        Ok(Flow::Continue)
    }

    async fn connect(&self, req: &Incoming<'_>) -> ServerResult<Flow> {
        let connection = self.sockets.connection();
        let reply = ConnectReply {
            status: ReplyStatus::Ok,
            shell_port: connection.shell_port,
            iopub_port: connection.iopub_port,
            stdin_port: connection.stdin_port,
            hb_port: connection.hb_port,
            control_port: connection.control_port,
        };
        self.reply(req, MessageContent::ConnectReply(reply)).await?;
        Ok(Flow::Continue)
    }

    async fn complete(&self, req: &Incoming<'_>, request: &CompleteRequest) -> ServerResult<Flow> {
        let engine = self.engine.clone();
        let (code, cursor_pos) = (request.code.clone(), request.cursor_pos);
        let completions = self
            .queue
            .run(async move { engine.complete(&code, cursor_pos).await })
            .await??;

        let reply = CompleteReply {
            status: ReplyStatus::Ok,
            matches: completions.matches,
            cursor_start: completions.cursor_start,
            cursor_end: completions.cursor_end,
            metadata: JsonObject::new(),
        };
        self.reply(req, MessageContent::CompleteReply(reply)).await?;
        Ok(Flow::Continue)
    }

    /// Shell gets a neutral `none` reply; anything else is ignored
    async fn unknown(&self, req: &Incoming<'_>) -> ServerResult<Flow> {
        let msg_type = req.message.message_type();
        match req.channel {
            ChannelType::Shell => {
                debug!(%msg_type, "Unknown shell message, sending a neutral reply");
                self.reply(req, MessageContent::NoOp(Empty {})).await?;
            }
            channel => warn!(%channel, %msg_type, "Ignoring unknown message"),
        }
        Ok(Flow::Continue)
    }
}

fn status_name(status: ReplyStatus) -> &'static str {
    match status {
        ReplyStatus::Ok => "ok",
        ReplyStatus::Error => "error",
        ReplyStatus::Abort => "abort",
    }
}

/// Keep the header of a message whose content failed to decode, so the
/// failure can be answered
fn header_only(raw: &RawMessage) -> Option<Message> {
    let header: MessageHeader = serde_json::from_value(Value::Object(raw.header.clone())).ok()?;
    Some(Message {
        identities: raw.identities.clone(),
        content: MessageContent::Other {
            msg_type: header.msg_type.clone(),
            content: raw.content.clone(),
        },
        header,
        parent_header: None,
        metadata: JsonObject::new(),
        buffers: raw.buffers.clone(),
    })
}
