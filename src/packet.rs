//! Packet buffers for the two directions of travel: outbound packets grow
//!  headers at the front, inbound packets are consumed from the front.

use std::fmt::{Debug, Formatter};

use bytes::Buf;

use crate::error::ProtocolError;

/// An outbound packet: payload plus head room for the headers the layers
///  below will prepend.
#[derive(Clone, Eq)]
pub struct OutboundPacket {
    buf: Vec<u8>,
    start: usize,
}

impl OutboundPacket {
    /// Head room reserved for prepended headers. The deepest stack in this
    ///  crate needs 13 bytes (4 sub-header + 8 reliable header + 1 id).
    pub const HEADER_RESERVE: usize = 32;

    pub fn new(payload: &[u8]) -> OutboundPacket {
        let mut buf = vec![0u8; Self::HEADER_RESERVE + payload.len()];
        buf[Self::HEADER_RESERVE..].copy_from_slice(payload);
        OutboundPacket {
            buf,
            start: Self::HEADER_RESERVE,
        }
    }

    pub fn size(&self) -> usize {
        self.buf.len() - self.start
    }

    /// Prepends `header` to the front of the packet, consuming head room.
    ///  Exhausting the reserve is a bug in the calling layer stack.
    pub fn add_header(&mut self, header: &[u8]) {
        assert!(
            header.len() <= self.start,
            "header reserve of {} bytes exhausted",
            Self::HEADER_RESERVE
        );
        self.start -= header.len();
        self.buf[self.start..self.start + header.len()].copy_from_slice(header);
    }

    /// Copies the packet into `dst`, returning the number of bytes written.
    pub fn copy_to(&self, dst: &mut [u8]) -> usize {
        let size = self.size();
        assert!(
            dst.len() >= size,
            "destination of {} bytes cannot hold a {} byte packet",
            dst.len(),
            size
        );
        dst[..size].copy_from_slice(&self.buf[self.start..]);
        size
    }
}

impl AsRef<[u8]> for OutboundPacket {
    fn as_ref(&self) -> &[u8] {
        &self.buf[self.start..]
    }
}

impl PartialEq for OutboundPacket {
    fn eq(&self, other: &Self) -> bool {
        self.as_ref().eq(other.as_ref())
    }
}

impl Debug for OutboundPacket {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.as_ref().fmt(f)
    }
}

/// An inbound packet: a received byte buffer with a read cursor that headers
///  and payloads are peeled off of.
#[derive(Clone, Eq)]
pub struct InboundPacket {
    data: Vec<u8>,
    cursor: usize,
}

impl InboundPacket {
    pub fn new(data: &[u8]) -> InboundPacket {
        InboundPacket {
            data: data.to_vec(),
            cursor: 0,
        }
    }

    /// Remaining unread bytes.
    pub fn size(&self) -> usize {
        self.data.len() - self.cursor
    }

    /// Copies `dst.len()` bytes off the front and advances the read cursor.
    pub fn extract_header(&mut self, dst: &mut [u8]) -> Result<(), ProtocolError> {
        if self.size() < dst.len() {
            return Err(ProtocolError::ShortRead {
                requested: dst.len(),
                remaining: self.size(),
            });
        }
        dst.copy_from_slice(&self.data[self.cursor..self.cursor + dst.len()]);
        self.cursor += dst.len();
        Ok(())
    }
}

impl Buf for InboundPacket {
    fn remaining(&self) -> usize {
        self.size()
    }

    fn chunk(&self) -> &[u8] {
        &self.data[self.cursor..]
    }

    fn advance(&mut self, cnt: usize) {
        assert!(cnt <= self.size(), "advanced past the end of the packet");
        self.cursor += cnt;
    }
}

impl AsRef<[u8]> for InboundPacket {
    fn as_ref(&self) -> &[u8] {
        &self.data[self.cursor..]
    }
}

impl PartialEq for InboundPacket {
    fn eq(&self, other: &Self) -> bool {
        self.as_ref().eq(other.as_ref())
    }
}

impl Debug for InboundPacket {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.as_ref().fmt(f)
    }
}
