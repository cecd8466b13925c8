use anyhow::bail;

use crate::headers::HandshakeAccept;

pub struct TransportConfig {
    /// The largest datagram the dispatcher may hand to a connection, and the
    ///  size of the reusable send scratch buffer. 1500 matches a full
    ///  Ethernet frame; networks with smaller MTUs on some route will drop
    ///  packets rather than fragment them, so this is the application's call.
    pub max_datagram_size: usize,
}

impl Default for TransportConfig {
    fn default() -> TransportConfig {
        TransportConfig {
            max_datagram_size: 1500,
        }
    }
}

impl TransportConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        // the id byte plus the handshake record is the minimum viable datagram
        if self.max_datagram_size < HandshakeAccept::SERIALIZED_LEN + 1 {
            bail!(
                "max datagram size of {} cannot carry a handshake",
                self.max_datagram_size
            );
        }
        if self.max_datagram_size > u16::MAX as usize {
            bail!(
                "max datagram size of {} exceeds what a datagram can be",
                self.max_datagram_size
            );
        }
        Ok(())
    }
}
