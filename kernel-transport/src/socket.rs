//! Uniform wrapper over the concrete ZeroMQ socket types

use crate::error::{TransportError, TransportResult};
use bytes::Bytes;
use kernel_protocol::{ChannelType, SocketPattern};
use zeromq::util::PeerIdentity;
use zeromq::{
    DealerSocket, PubSocket, RepSocket, ReqSocket, RouterSocket, Socket, SocketOptions, SocketRecv,
    SocketSend, SubSocket, ZmqError, ZmqMessage,
};

enum Kind {
    Router(RouterSocket),
    Dealer(DealerSocket),
    Publish(PubSocket),
    Subscribe(SubSocket),
    Reply(RepSocket),
    Request(ReqSocket),
}

pub(crate) struct ZmqSocket {
    channel: ChannelType,
    kind: Kind,
}

impl ZmqSocket {
    /// `identity` sets the routing id peers see for this socket
    pub(crate) fn new(
        channel: ChannelType,
        pattern: SocketPattern,
        identity: Option<&Bytes>,
    ) -> TransportResult<Self> {
        let mut options = SocketOptions::default();
        if let Some(identity) = identity {
            let peer_id = PeerIdentity::try_from(identity.to_vec())
                .map_err(|source| TransportError::Socket { channel, source })?;
            options.peer_identity(peer_id);
        }

        let kind = match pattern {
            SocketPattern::Router => Kind::Router(RouterSocket::with_options(options)),
            SocketPattern::Dealer => Kind::Dealer(DealerSocket::with_options(options)),
            SocketPattern::Publish => Kind::Publish(PubSocket::with_options(options)),
            SocketPattern::Subscribe => Kind::Subscribe(SubSocket::with_options(options)),
            SocketPattern::Reply => Kind::Reply(RepSocket::with_options(options)),
            SocketPattern::Request => Kind::Request(ReqSocket::with_options(options)),
        };
        Ok(Self { channel, kind })
    }

    pub(crate) async fn bind(&mut self, endpoint: &str) -> Result<(), ZmqError> {
        match &mut self.kind {
            Kind::Router(s) => s.bind(endpoint).await.map(drop),
            Kind::Dealer(s) => s.bind(endpoint).await.map(drop),
            Kind::Publish(s) => s.bind(endpoint).await.map(drop),
            Kind::Subscribe(s) => s.bind(endpoint).await.map(drop),
            Kind::Reply(s) => s.bind(endpoint).await.map(drop),
            Kind::Request(s) => s.bind(endpoint).await.map(drop),
        }
    }

    pub(crate) async fn connect(&mut self, endpoint: &str) -> Result<(), ZmqError> {
        match &mut self.kind {
            Kind::Router(s) => s.connect(endpoint).await,
            Kind::Dealer(s) => s.connect(endpoint).await,
            Kind::Publish(s) => s.connect(endpoint).await,
            Kind::Subscribe(s) => {
                s.connect(endpoint).await?;
                s.subscribe("").await
            }
            Kind::Reply(s) => s.connect(endpoint).await,
            Kind::Request(s) => s.connect(endpoint).await,
        }
    }

    pub(crate) async fn send(&mut self, frames: Vec<Bytes>) -> TransportResult<()> {
        let channel = self.channel;
        let message = ZmqMessage::try_from(frames).map_err(|_| TransportError::EmptyMessage)?;
        let sent = match &mut self.kind {
            Kind::Router(s) => s.send(message).await,
            Kind::Dealer(s) => s.send(message).await,
            Kind::Publish(s) => s.send(message).await,
            Kind::Reply(s) => s.send(message).await,
            Kind::Request(s) => s.send(message).await,
            Kind::Subscribe(_) => {
                return Err(TransportError::Unsupported {
                    channel,
                    operation: "send on a subscribe socket",
                })
            }
        };
        sent.map_err(|source| TransportError::Socket { channel, source })
    }

    pub(crate) async fn recv(&mut self) -> TransportResult<Vec<Bytes>> {
        let channel = self.channel;
        let received = match &mut self.kind {
            Kind::Router(s) => s.recv().await,
            Kind::Dealer(s) => s.recv().await,
            Kind::Subscribe(s) => s.recv().await,
            Kind::Reply(s) => s.recv().await,
            Kind::Request(s) => s.recv().await,
            Kind::Publish(_) => {
                return Err(TransportError::Unsupported {
                    channel,
                    operation: "receive on a publish socket",
                })
            }
        };
        received
            .map(|message| message.iter().cloned().collect())
            .map_err(|source| TransportError::Socket { channel, source })
    }

    /// Unbind and disconnect; returns every error the socket reported
    pub(crate) async fn close(self) -> Vec<ZmqError> {
        match self.kind {
            Kind::Router(s) => s.close().await,
            Kind::Dealer(s) => s.close().await,
            Kind::Publish(s) => s.close().await,
            Kind::Subscribe(s) => s.close().await,
            Kind::Reply(s) => s.close().await,
            Kind::Request(s) => s.close().await,
        }
    }
}
