//! A reliable-ish datagram transport on top of UDP. It keeps UDP's
//!  packet-oriented, low-latency nature while adding just enough machinery for
//!  an application to know what arrived and what got through:
//!
//! * a small handshake that assigns each connection a one-byte id, so several
//!   logical connections can share a socket pair
//! * per-datagram sequence numbers with a cumulative ack plus a 32-bit ack
//!   bitmask, tracked over a fixed sliding window
//! * deduplication of received sequence numbers, including retransmissions
//!   that declare the sequence number they duplicate
//! * packing of several application messages ("sub-packets") into a single
//!   datagram behind a compact 1-4 byte sub-header
//! * notifications to upstream listeners when a tagged outbound packet is
//!   acknowledged, enabling retransmission layers above this one
//! * a smoothed round-trip latency estimate
//!
//! It is explicitly *not* TCP: there is no in-order delivery (gaps are
//!  reported through the ack bitmask, never stalled on), no congestion
//!  control, and no fragmentation of messages larger than the datagram
//!  budget. The default assumption is that an upper layer decides per message
//!  whether a lost packet is worth resending.
//!
//! ## Wire formats
//!
//! All multi-byte integers are little-endian.
//!
//! Handshake accept record (sent by the accepting side, 16 bytes):
//! ```ascii
//! 0:  magic: the 12 ASCII bytes "halley_accp" followed by a NUL
//! 12: connection id (i16)
//! 14: reserved, zero (room for a future session key exchange)
//! ```
//!
//! Unreliable datagram (what actually hits the socket):
//! ```ascii
//! 0: connection id (1 byte, 0xFF while unassigned)
//! 1: payload
//! ```
//!
//! Reliable payload (carried inside an unreliable datagram):
//! ```ascii
//! 0: sequence (u16) - sender's sequence number for this datagram
//! 2: ack (u16) - highest sequence number observed from the peer
//! 4: ack bits (u32) - bit i set iff sequence `ack - (i+1)` was observed
//! 8: sub-packets, back to back
//! ```
//!
//! Sub-packet header (1-4 bytes, followed by `size` payload bytes):
//! ```ascii
//! 0: sizeA - bit 7: resend flag, bit 6: long-size flag,
//!     bits 5..0: size (short form) or the high 6 bits of size (long form)
//! *: sizeB - low 8 bits of size, present only in long form (size >= 64)
//! *: resendOf (u16) - original sequence number, present only for resends
//! ```
//!
//! Each sub-packet occupies one virtual sequence slot on the receiver: the
//!  decoder increments its working sequence number after every sub-packet,
//!  while the sender increments its counter once per datagram. That asymmetry
//!  is part of the wire contract and is kept bit-compatible here.
//!
//! ## Scope
//!
//! The socket is only consumed through [`send_pipeline::SendSocket`]; the
//!  acceptor that routes inbound datagrams to the right connection (using
//!  [`udp_connection::UdpConnection::matches_endpoint`]) lives outside this
//!  crate, as does any keepalive/timeout policy - the connections expose
//!  time-since-last-send/receive for one to build on.

pub mod config;
pub mod connection;
pub mod error;
pub mod headers;
pub mod packet;
pub mod reliable_connection;
pub mod send_pipeline;
pub mod udp_connection;

#[cfg(test)]
mod tests {
    use tracing::Level;

    #[ctor::ctor]
    fn init_test_logging() {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(Level::TRACE)
            .try_init()
            .ok();
    }
}
