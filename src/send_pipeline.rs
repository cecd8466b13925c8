use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::trace;

/// This is an abstraction for sending a buffer on a UDP socket, introduced to
///  facilitate mocking the I/O part away for testing.
///
/// Errors are reported to the caller: a connection treats a failed send as
///  reason to close itself.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SendSocket: Send + Sync + 'static {
    async fn do_send_packet(&self, to: SocketAddr, packet_buf: &[u8]) -> std::io::Result<()>;
}

#[async_trait]
impl SendSocket for Arc<UdpSocket> {
    async fn do_send_packet(&self, to: SocketAddr, packet_buf: &[u8]) -> std::io::Result<()> {
        trace!("UDP socket: sending packet to {:?}", to);

        self.send_to(packet_buf, to).await.map(|_| ())
    }
}

#[derive(Clone)]
pub struct SendPipeline {
    socket: Arc<dyn SendSocket>,
}

impl SendPipeline {
    pub fn new(socket: Arc<dyn SendSocket>) -> SendPipeline {
        SendPipeline { socket }
    }

    pub async fn do_send_packet(&self, to: SocketAddr, packet_buf: &[u8]) -> std::io::Result<()> {
        self.socket.do_send_packet(to, packet_buf).await
    }
}
