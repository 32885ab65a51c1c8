//! A single named channel
//!
//! The socket lives in a driver task. Sends go through a bounded queue and
//! are acknowledged once the socket accepted them, so per-channel ordering
//! is the queue order. Received frames come back through a second queue
//! that one receiver at a time may hold.

use crate::dispatcher::CallbackDispatcher;
use crate::error::{TransportError, TransportResult};
use crate::socket::ZmqSocket;
use bytes::Bytes;
use kernel_protocol::{ChannelType, Message, RawMessage, SocketPattern, SocketSide, WireCodec};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zeromq::ZmqError;

/// Settings applied when a channel is opened
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// Delay after binding a publish socket before it is used
    pub publish_warmup: Duration,
    /// Depth of the send and receive queues
    pub capacity: usize,
    /// Routing identity for client sockets
    pub identity: Option<Bytes>,
    /// Cancelling this token interrupts blocked receives
    pub cancel: CancellationToken,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            publish_warmup: Duration::from_millis(500),
            capacity: 1024,
            identity: None,
            cancel: CancellationToken::new(),
        }
    }
}

struct Outbound {
    frames: Vec<Bytes>,
    ack: oneshot::Sender<TransportResult<()>>,
}

/// Whose move it is on a strict request/reply socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Turn {
    Free,
    Receive,
    Send,
}

impl Turn {
    fn initial(pattern: SocketPattern) -> Self {
        match pattern {
            SocketPattern::Reply => Turn::Receive,
            SocketPattern::Request => Turn::Send,
            _ => Turn::Free,
        }
    }

    fn may_send(self) -> bool {
        self != Turn::Receive
    }

    fn may_receive(self, pattern: SocketPattern) -> bool {
        match self {
            Turn::Free => pattern.can_receive(),
            Turn::Receive => true,
            Turn::Send => false,
        }
    }

    fn after_send(self) -> Self {
        if self == Turn::Send {
            Turn::Receive
        } else {
            self
        }
    }

    fn after_receive(self) -> Self {
        if self == Turn::Receive {
            Turn::Send
        } else {
            self
        }
    }
}

pub struct SocketChannel {
    channel: ChannelType,
    pattern: SocketPattern,
    endpoint: String,
    codec: Arc<WireCodec>,
    callbacks: CallbackDispatcher,
    outbound: mpsc::Sender<Outbound>,
    inbound: tokio::sync::Mutex<mpsc::Receiver<TransportResult<Vec<Bytes>>>>,
    /// Interrupts receives; child of the caller's token
    interrupt: CancellationToken,
    /// Stops the driver
    stop: CancellationToken,
    driver: Mutex<Option<JoinHandle<Vec<ZmqError>>>>,
}

impl SocketChannel {
    /// Open the serving end of `channel` on `endpoint`
    pub async fn bind(
        channel: ChannelType,
        endpoint: &str,
        codec: Arc<WireCodec>,
        options: ChannelOptions,
    ) -> TransportResult<Self> {
        Self::open(channel, SocketSide::Server, endpoint, codec, options).await
    }

    /// Open the connecting end of `channel` to `endpoint`
    pub async fn connect(
        channel: ChannelType,
        endpoint: &str,
        codec: Arc<WireCodec>,
        options: ChannelOptions,
    ) -> TransportResult<Self> {
        Self::open(channel, SocketSide::Client, endpoint, codec, options).await
    }

    async fn open(
        channel: ChannelType,
        side: SocketSide,
        endpoint: &str,
        codec: Arc<WireCodec>,
        options: ChannelOptions,
    ) -> TransportResult<Self> {
        let pattern = channel.pattern(side);
        let mut socket = ZmqSocket::new(channel, pattern, options.identity.as_ref())?;

        match side {
            SocketSide::Server => {
                socket
                    .bind(endpoint)
                    .await
                    .map_err(|source| TransportError::Bind {
                        channel,
                        endpoint: endpoint.to_string(),
                        source,
                    })?;
                info!(%channel, endpoint, "Bound channel");
            }
            SocketSide::Client => {
                socket
                    .connect(endpoint)
                    .await
                    .map_err(|source| TransportError::Connect {
                        channel,
                        endpoint: endpoint.to_string(),
                        source,
                    })?;
                info!(%channel, endpoint, "Connected channel");
            }
        }

        if pattern == SocketPattern::Publish {
            // Subscribers that connect right after bind would miss the first messages
            tokio::time::sleep(options.publish_warmup).await;
        }

        let capacity = options.capacity.max(1);
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let stop = CancellationToken::new();
        let driver = tokio::spawn(drive(
            channel,
            pattern,
            socket,
            outbound_rx,
            inbound_tx,
            stop.clone(),
        ));

        Ok(Self {
            channel,
            pattern,
            endpoint: endpoint.to_string(),
            codec,
            callbacks: CallbackDispatcher::new(),
            outbound: outbound_tx,
            inbound: tokio::sync::Mutex::new(inbound_rx),
            interrupt: options.cancel.child_token(),
            stop,
            driver: Mutex::new(Some(driver)),
        })
    }

    pub fn channel(&self) -> ChannelType {
        self.channel
    }

    pub fn pattern(&self) -> SocketPattern {
        self.pattern
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn codec(&self) -> &WireCodec {
        &self.codec
    }

    pub fn callbacks(&self) -> &CallbackDispatcher {
        &self.callbacks
    }

    /// Send frames as-is; resolves once the socket accepted them
    pub async fn send_raw(&self, frames: Vec<Bytes>) -> TransportResult<()> {
        if !self.pattern.can_send() {
            return Err(TransportError::Unsupported {
                channel: self.channel,
                operation: "send",
            });
        }

        let (ack, done) = oneshot::channel();
        self.outbound
            .send(Outbound { frames, ack })
            .await
            .map_err(|_| TransportError::Closed(self.channel))?;
        done.await.map_err(|_| TransportError::Closed(self.channel))?
    }

    /// Sign, frame and send
    pub async fn send(&self, message: &RawMessage) -> TransportResult<()> {
        let frames = self.codec.encode(message)?;
        debug!(channel = %self.channel, msg_type = ?message.msg_type(), "Sending message");
        self.send_raw(frames).await
    }

    pub async fn send_message(&self, message: &Message) -> TransportResult<()> {
        self.send(&message.to_raw()?).await
    }

    /// Block until a multipart message arrives. Cancellation surfaces as
    /// [`TransportError::Interrupted`].
    pub async fn receive_raw(&self) -> TransportResult<Vec<Bytes>> {
        if !self.pattern.can_receive() {
            return Err(TransportError::Unsupported {
                channel: self.channel,
                operation: "receive",
            });
        }

        let mut inbound = tokio::select! {
            biased;
            _ = self.interrupt.cancelled() => return Err(TransportError::Interrupted),
            inbound = self.inbound.lock() => inbound,
        };

        tokio::select! {
            biased;
            _ = self.interrupt.cancelled() => Err(TransportError::Interrupted),
            received = inbound.recv() => match received {
                Some(frames) => frames,
                None => Err(TransportError::Closed(self.channel)),
            },
        }
    }

    /// Receive, verify and decode one message
    pub async fn receive(&self) -> TransportResult<RawMessage> {
        let frames = self.receive_raw().await?;
        Ok(self.codec.decode(frames)?)
    }

    pub async fn receive_message(&self) -> TransportResult<Message> {
        Ok(Message::from_raw(self.receive().await?)?)
    }

    /// One iteration of a channel loop: receive, decode, dispatch. Messages
    /// that fail verification or decoding are logged and dropped.
    pub async fn receive_message_and_run_callbacks(&self) -> TransportResult<()> {
        match self.receive().await {
            Ok(message) => {
                self.callbacks.dispatch(&message).await?;
                Ok(())
            }
            Err(e) if e.is_per_message() => {
                warn!(channel = %self.channel, "Dropping message: {}", e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Stop the driver and close the socket, reporting socket errors
    pub async fn close(&self) -> TransportResult<()> {
        self.interrupt.cancel();
        self.stop.cancel();

        let driver = self.driver.lock().take();
        let Some(driver) = driver else {
            return Ok(());
        };

        match driver.await {
            Ok(errors) if errors.is_empty() => {
                debug!(channel = %self.channel, "Channel closed");
                Ok(())
            }
            Ok(errors) => Err(TransportError::Close {
                channel: self.channel,
                errors: errors.iter().map(ToString::to_string).collect(),
            }),
            Err(join) => Err(TransportError::Close {
                channel: self.channel,
                errors: vec![join.to_string()],
            }),
        }
    }

    /// Abort the driver without waiting for the socket to close
    pub fn force_close(&self) {
        self.interrupt.cancel();
        self.stop.cancel();
        if let Some(driver) = self.driver.lock().take() {
            driver.abort();
        }
    }
}

impl Drop for SocketChannel {
    fn drop(&mut self) {
        self.force_close();
    }
}

async fn drive(
    channel: ChannelType,
    pattern: SocketPattern,
    mut socket: ZmqSocket,
    mut outbound: mpsc::Receiver<Outbound>,
    inbound: mpsc::Sender<TransportResult<Vec<Bytes>>>,
    stop: CancellationToken,
) -> Vec<ZmqError> {
    let mut turn = Turn::initial(pattern);
    // Room in `inbound` for the next received message. The socket is only
    // read while a slot is held, so a full queue never stalls sends.
    let mut slot: Option<mpsc::OwnedPermit<TransportResult<Vec<Bytes>>>> = None;

    loop {
        let may_receive = turn.may_receive(pattern);
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            command = outbound.recv() => {
                let Some(Outbound { frames, ack }) = command else {
                    break;
                };
                let result = if turn.may_send() {
                    socket.send(frames).await
                } else {
                    Err(TransportError::Unsupported {
                        channel,
                        operation: "send before a request was received",
                    })
                };
                if result.is_ok() {
                    turn = turn.after_send();
                }
                // Sender may have given up waiting
                let _ = ack.send(result);
            }
            reserved = inbound.clone().reserve_owned(), if may_receive && slot.is_none() => {
                match reserved {
                    Ok(permit) => slot = Some(permit),
                    Err(_) => break,
                }
            }
            received = socket.recv(), if may_receive && slot.is_some() => {
                let failed = received.is_err();
                if !failed {
                    turn = turn.after_receive();
                }
                if let Some(permit) = slot.take() {
                    permit.send(received);
                }
                if failed {
                    break;
                }
            }
        }
    }

    debug!(%channel, "Channel driver stopping");
    socket.close().await
}
