use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, error, trace};

use crate::config::TransportConfig;
use crate::connection::{Connection, ConnectionStatus};
use crate::headers::HandshakeAccept;
use crate::packet::{InboundPacket, OutboundPacket};
use crate::send_pipeline::SendPipeline;

struct UdpConnectionInner {
    send_pipeline: Arc<SendPipeline>,
    remote: SocketAddr,
    status: ConnectionStatus,
    connection_id: i16,
    pending_send: VecDeque<OutboundPacket>,
    pending_receive: VecDeque<InboundPacket>,
    send_scratch: Vec<u8>,
    error: Option<String>,
    max_datagram_size: usize,
}

impl UdpConnectionInner {
    fn close(&mut self) {
        self.on_close();
        self.status = ConnectionStatus::Closing;
    }

    fn terminate(&mut self) {
        self.on_close();
        self.status = ConnectionStatus::Closed;
    }

    fn on_close(&mut self) {
        if self.status == ConnectionStatus::Open {
            // TODO send a close notification once the protocol grows one
        }
    }

    fn on_open(&mut self, id: i16) {
        debug!("connection to {:?} open with id {}", self.remote, id);
        self.connection_id = id;
        self.status = ConnectionStatus::Open;
    }
}

/// Per-remote state machine for the handshake and unreliable send/receive on
///  a shared UDP socket.
///
/// An acceptor outside this crate owns the socket's receive loop: it routes
///  each datagram to the connection whose [`UdpConnection::matches_endpoint`]
///  answers true, strips the one-byte connection-id header, and hands the
///  rest to [`UdpConnection::on_receive`].
pub struct UdpConnection {
    inner: Arc<RwLock<UdpConnectionInner>>,
}

impl UdpConnection {
    /// A connection for an actively dialed remote, starting in
    ///  [`ConnectionStatus::Connecting`] with no id assigned.
    pub fn new(
        send_pipeline: Arc<SendPipeline>,
        remote: SocketAddr,
        config: &TransportConfig,
    ) -> anyhow::Result<UdpConnection> {
        config.validate()?;

        Ok(UdpConnection {
            inner: Arc::new(RwLock::new(UdpConnectionInner {
                send_pipeline,
                remote,
                status: ConnectionStatus::Connecting,
                connection_id: -1,
                pending_send: VecDeque::new(),
                pending_receive: VecDeque::new(),
                send_scratch: vec![0u8; config.max_datagram_size],
                error: None,
                max_datagram_size: config.max_datagram_size,
            })),
        })
    }

    pub async fn connection_id(&self) -> i16 {
        self.inner.read().await.connection_id
    }

    /// Routing predicate for the acceptor: does a datagram carrying `id` from
    ///  `remote` belong to this connection? An id of -1 matches any
    ///  connection to that endpoint (the peer does not know its id yet).
    pub async fn matches_endpoint(&self, id: i16, remote: SocketAddr) -> bool {
        let inner = self.inner.read().await;
        (id == -1 || id == inner.connection_id) && remote == inner.remote
    }

    /// Server-side accept: assigns `id`, tells the peer, and opens.
    pub async fn open(&self, id: i16) {
        if self.inner.read().await.status != ConnectionStatus::Connecting {
            return;
        }

        let mut buf = [0u8; HandshakeAccept::SERIALIZED_LEN];
        HandshakeAccept { connection_id: id }.ser(&mut &mut buf[..]);
        self.send(OutboundPacket::new(&buf)).await;

        self.inner.write().await.on_open(id);
    }

    /// Called by the acceptor with a received datagram, already stripped of
    ///  its connection-id byte. Datagrams beyond the configured budget are a
    ///  contract violation by the caller.
    pub async fn on_receive(&self, data: &[u8]) {
        let mut inner = self.inner.write().await;
        assert!(
            data.len() <= inner.max_datagram_size,
            "datagram of {} bytes exceeds the {} byte budget",
            data.len(),
            inner.max_datagram_size
        );

        match inner.status {
            ConnectionStatus::Connecting => {
                if let Some(accept) = HandshakeAccept::parse(data) {
                    inner.on_open(accept.connection_id);
                } else {
                    trace!(
                        "ignoring a non-handshake datagram from {:?} while connecting",
                        inner.remote
                    );
                }
            }
            ConnectionStatus::Open => {
                inner.pending_receive.push_back(InboundPacket::new(data));
            }
            _ => {
                trace!("dropping datagram on {:?} connection", inner.status);
            }
        }
    }

    /// Hard stop, skipping the graceful closing state.
    pub async fn terminate(&self) {
        self.inner.write().await.terminate();
    }

    pub async fn set_error(&self, message: impl Into<String> + Send) {
        self.inner.write().await.error = Some(message.into());
    }

    pub async fn last_error(&self) -> Option<String> {
        self.inner.read().await.error.clone()
    }

    /// Sends queued packets one at a time, in order. Runs until the queue is
    ///  empty; `send` spawns it only when the queue was empty before, so
    ///  there is never more than one drain task per connection.
    async fn drain_send_queue(inner_arc: Arc<RwLock<UdpConnectionInner>>) {
        loop {
            let mut inner = inner_arc.write().await;
            let Some(packet) = inner.pending_send.pop_front() else {
                return;
            };

            let size = packet.copy_to(&mut inner.send_scratch);
            let remote = inner.remote;
            trace!("sending {} bytes to {:?}", size, remote);

            if let Err(e) = inner
                .send_pipeline
                .do_send_packet(remote, &inner.send_scratch[..size])
                .await
            {
                error!("error sending packet to {:?}: {}", remote, e);
                inner.error = Some(format!("socket send failed: {}", e));
                inner.close();
                return;
            }

            if inner.pending_send.is_empty() {
                return;
            }
        }
    }
}

#[async_trait]
impl Connection for UdpConnection {
    async fn get_status(&self) -> ConnectionStatus {
        self.inner.read().await.status
    }

    async fn close(&self) {
        self.inner.write().await.close();
    }

    async fn send(&self, mut packet: OutboundPacket) {
        let mut inner = self.inner.write().await;
        if !inner.status.is_sendable() {
            debug!(
                "dropping send on {:?} connection to {:?}",
                inner.status, inner.remote
            );
            return;
        }

        packet.add_header(&[inner.connection_id as u8]);

        let needs_kick = inner.pending_send.is_empty();
        inner.pending_send.push_back(packet);
        if needs_kick {
            tokio::spawn(Self::drain_send_queue(self.inner.clone()));
        }
    }

    async fn receive(&self) -> anyhow::Result<Option<InboundPacket>> {
        Ok(self.inner.write().await.pending_receive.pop_front())
    }
}
