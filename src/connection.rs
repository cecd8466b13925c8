use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::packet::{InboundPacket, OutboundPacket};

/// Lifecycle of a connection to one remote endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ConnectionStatus {
    /// Connections accept outbound traffic while the handshake is still in
    ///  flight, not just once it completed.
    pub fn is_sendable(self) -> bool {
        matches!(self, ConnectionStatus::Open | ConnectionStatus::Connecting)
    }
}

/// A connection layer. [`crate::udp_connection::UdpConnection`] is the bottom
///  of the stack; [`crate::reliable_connection::ReliableConnection`] wraps any
///  implementation of this and is one itself, so further layers can stack on
///  top.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    async fn get_status(&self) -> ConnectionStatus;

    async fn close(&self);

    /// Queues a packet for delivery. Packets sent on a connection that is no
    ///  longer sendable are silently discarded.
    async fn send(&self, packet: OutboundPacket);

    /// Pops the next packet available to the application, or `None` if there
    ///  is currently nothing to deliver.
    async fn receive(&self) -> anyhow::Result<Option<InboundPacket>>;
}

/// Callback surface notified when a tagged outbound packet is acknowledged
///  by the peer.
///
/// Listeners are invoked in registration order, while the connection's
///  internal lock is held: registering or removing listeners from inside
///  `on_packet_acked` deadlocks. Listeners are shared handles; drop them from
///  the registry before tearing the upper layer down.
#[cfg_attr(test, automock)]
pub trait AckListener: Send + Sync + 'static {
    fn on_packet_acked(&self, tag: i32);
}
