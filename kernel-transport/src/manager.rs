//! Opening and closing the five channels as a unit

use crate::channel::{ChannelOptions, SocketChannel};
use crate::error::TransportResult;
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use kernel_config::{ConnectionConfig, RuntimeConfig};
use kernel_protocol::{ChannelType, SocketSide, WireCodec};
use kernel_runtime::{Closeable, MergedError};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The heartbeat, shell, control, stdin and iopub channels of one connection
pub struct SocketManager {
    side: SocketSide,
    connection: ConnectionConfig,
    codec: Arc<WireCodec>,
    heartbeat: SocketChannel,
    shell: SocketChannel,
    control: SocketChannel,
    stdin: SocketChannel,
    iopub: SocketChannel,
}

impl SocketManager {
    /// Bind (server) or connect (client) all five channels. If a channel
    /// fails to open, the channels already open are dropped, which closes
    /// their sockets.
    ///
    /// Client shell, control and stdin sockets share one routing identity so
    /// the server can address stdin requests to the peer that sent the
    /// execute request.
    pub async fn open(
        connection: &ConnectionConfig,
        runtime: &RuntimeConfig,
        side: SocketSide,
        codec: Arc<WireCodec>,
        cancel: &CancellationToken,
    ) -> TransportResult<Self> {
        let opener = Opener {
            connection,
            runtime,
            side,
            codec: codec.clone(),
            cancel,
            identity: match side {
                SocketSide::Client => Some(Bytes::from(uuid::Uuid::new_v4().to_string())),
                SocketSide::Server => None,
            },
        };

        let heartbeat = opener.open(ChannelType::Heartbeat).await?;
        let shell = opener.open(ChannelType::Shell).await?;
        let control = opener.open(ChannelType::Control).await?;
        let stdin = opener.open(ChannelType::Stdin).await?;
        let iopub = opener.open(ChannelType::Iopub).await?;

        info!(?side, ip = %connection.ip, "All channels open");
        Ok(Self {
            side,
            connection: connection.clone(),
            codec,
            heartbeat,
            shell,
            control,
            stdin,
            iopub,
        })
    }

    pub fn side(&self) -> SocketSide {
        self.side
    }

    pub fn codec(&self) -> &Arc<WireCodec> {
        &self.codec
    }

    pub fn connection(&self) -> &ConnectionConfig {
        &self.connection
    }

    /// Port of every channel
    pub fn ports(&self) -> BTreeMap<ChannelType, u16> {
        self.connection.ports()
    }

    pub fn heartbeat(&self) -> &SocketChannel {
        &self.heartbeat
    }

    pub fn shell(&self) -> &SocketChannel {
        &self.shell
    }

    pub fn control(&self) -> &SocketChannel {
        &self.control
    }

    pub fn stdin(&self) -> &SocketChannel {
        &self.stdin
    }

    pub fn iopub(&self) -> &SocketChannel {
        &self.iopub
    }

    pub fn channel(&self, channel: ChannelType) -> &SocketChannel {
        match channel {
            ChannelType::Heartbeat => &self.heartbeat,
            ChannelType::Shell => &self.shell,
            ChannelType::Control => &self.control,
            ChannelType::Stdin => &self.stdin,
            ChannelType::Iopub => &self.iopub,
        }
    }

    fn all(&self) -> [&SocketChannel; 5] {
        [&self.heartbeat, &self.shell, &self.control, &self.stdin, &self.iopub]
    }
}

struct Opener<'a> {
    connection: &'a ConnectionConfig,
    runtime: &'a RuntimeConfig,
    side: SocketSide,
    codec: Arc<WireCodec>,
    cancel: &'a CancellationToken,
    identity: Option<Bytes>,
}

impl Opener<'_> {
    async fn open(&self, channel: ChannelType) -> TransportResult<SocketChannel> {
        let options = ChannelOptions {
            publish_warmup: self.runtime.publish_warmup,
            capacity: self.runtime.channel_capacity,
            identity: match channel {
                ChannelType::Shell | ChannelType::Control | ChannelType::Stdin => {
                    self.identity.clone()
                }
                ChannelType::Heartbeat | ChannelType::Iopub => None,
            },
            cancel: self.cancel.clone(),
        };

        let endpoint = self.connection.address(channel)?;
        let opened = match self.side {
            SocketSide::Server => {
                SocketChannel::bind(channel, &endpoint, self.codec.clone(), options).await
            }
            SocketSide::Client => {
                SocketChannel::connect(channel, &endpoint, self.codec.clone(), options).await
            }
        };
        if let Err(e) = &opened {
            warn!(%channel, endpoint, "Failed to open channel: {}", e);
        }
        opened
    }
}

#[async_trait]
impl Closeable for SocketManager {
    fn name(&self) -> &str {
        "sockets"
    }

    async fn close(&self) -> Result<(), MergedError> {
        let results = join_all(self.all().into_iter().map(|socket| socket.close())).await;
        MergedError::collect(results)
    }

    fn force_close(&self) {
        for socket in self.all() {
            socket.force_close();
        }
    }
}
