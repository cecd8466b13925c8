//! Codecs for the three fixed wire records: the reliable datagram header, the
//!  variable-length sub-packet header, and the handshake accept record.
//!
//! All multi-byte fields are little-endian.

use bytes::{Buf, BufMut};

use crate::error::ProtocolError;

/// Fixed 8-byte header at the front of every reliable datagram payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReliableHeader {
    /// Sender's sequence number for this datagram.
    pub sequence: u16,
    /// Highest sequence number the sender has observed from the peer.
    pub ack: u16,
    /// Bit `i` set iff the sender has observed sequence `ack - (i+1)`.
    pub ack_bits: u32,
}

impl ReliableHeader {
    pub const SERIALIZED_LEN: usize = 8;

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u16_le(self.sequence);
        buf.put_u16_le(self.ack);
        buf.put_u32_le(self.ack_bits);
    }

    pub fn deser(buf: &mut impl Buf) -> Result<ReliableHeader, ProtocolError> {
        if buf.remaining() < Self::SERIALIZED_LEN {
            return Err(ProtocolError::ShortRead {
                requested: Self::SERIALIZED_LEN,
                remaining: buf.remaining(),
            });
        }
        Ok(ReliableHeader {
            sequence: buf.get_u16_le(),
            ack: buf.get_u16_le(),
            ack_bits: buf.get_u32_le(),
        })
    }
}

/// The 1-4 byte header in front of each sub-packet.
///
/// The short form packs sizes 0..=63 into a single byte; the long form
///  (flagged in bit 6) spreads sizes up to [`SubPacketHeader::MAX_SIZE`] over
///  two bytes. A resend (flagged in bit 7) appends the original sequence
///  number it duplicates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubPacketHeader {
    pub size: u16,
    pub resend_of: Option<u16>,
}

impl SubPacketHeader {
    const RESEND_FLAG: u8 = 0x80;
    const LONG_SIZE_FLAG: u8 = 0x40;

    pub const LONG_SIZE_THRESHOLD: u16 = 64;
    pub const MAX_SIZE: u16 = 0x3FFF;

    pub fn serialized_len(&self) -> usize {
        let long_size = self.size >= Self::LONG_SIZE_THRESHOLD;
        1 + usize::from(long_size) + if self.resend_of.is_some() { 2 } else { 0 }
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        debug_assert!(self.size <= Self::MAX_SIZE);

        let long_size = self.size >= Self::LONG_SIZE_THRESHOLD;
        let mut size_a = if long_size {
            Self::LONG_SIZE_FLAG | ((self.size >> 8) as u8 & 0x3F)
        } else {
            self.size as u8
        };
        if self.resend_of.is_some() {
            size_a |= Self::RESEND_FLAG;
        }

        buf.put_u8(size_a);
        if long_size {
            buf.put_u8((self.size & 0xFF) as u8);
        }
        if let Some(resend_of) = self.resend_of {
            buf.put_u16_le(resend_of);
        }
    }

    /// Decodes whichever form the flags announce, regardless of whether the
    ///  encoder would have picked it.
    pub fn deser(buf: &mut impl Buf) -> Result<SubPacketHeader, ProtocolError> {
        if buf.remaining() < 1 {
            return Err(ProtocolError::IncompleteSubPacketHeader);
        }
        let size_a = buf.get_u8();
        let is_resend = size_a & Self::RESEND_FLAG != 0;

        let size = if size_a & Self::LONG_SIZE_FLAG != 0 {
            if buf.remaining() < 1 {
                return Err(ProtocolError::IncompleteSubPacketHeader);
            }
            let size_b = buf.get_u8();
            u16::from(size_a & 0x3F) << 8 | u16::from(size_b)
        } else {
            u16::from(size_a & 0x3F)
        };

        let resend_of = if is_resend {
            if buf.remaining() < 2 {
                return Err(ProtocolError::MissingResendData);
            }
            Some(buf.get_u16_le())
        } else {
            None
        };

        Ok(SubPacketHeader { size, resend_of })
    }
}

/// The 16-byte record the accepting side sends to finish the handshake. The
///  magic is compared byte for byte; the reserved tail keeps room for a
///  future session key exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandshakeAccept {
    pub connection_id: i16,
}

impl HandshakeAccept {
    pub const MAGIC: [u8; 12] = *b"halley_accp\0";
    pub const SERIALIZED_LEN: usize = 16;

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_slice(&Self::MAGIC);
        buf.put_i16_le(self.connection_id);
        buf.put_bytes(0, 2);
    }

    /// Returns the accept record iff `data` is exactly one: anything else is
    ///  not an error, just some other datagram.
    pub fn parse(data: &[u8]) -> Option<HandshakeAccept> {
        if data.len() != Self::SERIALIZED_LEN || data[..Self::MAGIC.len()] != Self::MAGIC {
            return None;
        }
        let connection_id = i16::from_le_bytes([data[12], data[13]]);
        Some(HandshakeAccept { connection_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::zero(0, 0, 0)]
    #[case::small(1, 2, 3)]
    #[case::mixed(0x1234, 0xFFFE, 0xDEAD_BEEF)]
    #[case::max(u16::MAX, u16::MAX, u32::MAX)]
    fn test_reliable_header_roundtrip(#[case] sequence: u16, #[case] ack: u16, #[case] ack_bits: u32) {
        let original = ReliableHeader { sequence, ack, ack_bits };

        let mut buf = Vec::new();
        original.ser(&mut buf);
        assert_eq!(buf.len(), ReliableHeader::SERIALIZED_LEN);

        let mut b: &[u8] = &buf;
        let deser = ReliableHeader::deser(&mut b).unwrap();
        assert!(b.is_empty());
        assert_eq!(deser, original);
    }

    #[test]
    fn test_reliable_header_little_endian_layout() {
        let header = ReliableHeader {
            sequence: 0x0102,
            ack: 0x0304,
            ack_bits: 0x0506_0708,
        };

        let mut buf = Vec::new();
        header.ser(&mut buf);
        assert_eq!(buf, vec![0x02, 0x01, 0x04, 0x03, 0x08, 0x07, 0x06, 0x05]);
    }

    #[test]
    fn test_reliable_header_short_input() {
        let mut b: &[u8] = &[1, 2, 3];
        assert_eq!(
            ReliableHeader::deser(&mut b),
            Err(ProtocolError::ShortRead { requested: 8, remaining: 3 })
        );
    }

    #[rstest]
    #[case::empty(0, None, vec![0x00])]
    #[case::short(5, None, vec![0x05])]
    #[case::short_max(63, None, vec![63])]
    #[case::long_min(64, None, vec![0x40, 0x40])]
    #[case::long(3000, None, vec![0x4B, 0xB8])]
    #[case::long_max(0x3FFF, None, vec![0x7F, 0xFF])]
    #[case::short_resend(5, Some(0x1234), vec![0x85, 0x34, 0x12])]
    #[case::long_resend(100, Some(7), vec![0xC0, 100, 0x07, 0x00])]
    fn test_sub_packet_header_encoding(
        #[case] size: u16,
        #[case] resend_of: Option<u16>,
        #[case] expected: Vec<u8>,
    ) {
        let original = SubPacketHeader { size, resend_of };

        let mut buf = Vec::new();
        original.ser(&mut buf);
        assert_eq!(buf, expected);
        assert_eq!(buf.len(), original.serialized_len());

        let mut b: &[u8] = &buf;
        let deser = SubPacketHeader::deser(&mut b).unwrap();
        assert!(b.is_empty());
        assert_eq!(deser, original);
    }

    /// The decoder honors the long-size flag even for sizes the encoder would
    ///  have packed into the short form.
    #[test]
    fn test_sub_packet_header_non_minimal_long_form() {
        let mut b: &[u8] = &[0x40, 5];
        let deser = SubPacketHeader::deser(&mut b).unwrap();
        assert_eq!(deser, SubPacketHeader { size: 5, resend_of: None });
    }

    #[rstest]
    #[case::missing_first_byte(vec![], ProtocolError::IncompleteSubPacketHeader)]
    #[case::missing_long_size_byte(vec![0x41], ProtocolError::IncompleteSubPacketHeader)]
    #[case::missing_resend_data(vec![0x85, 0x01], ProtocolError::MissingResendData)]
    fn test_sub_packet_header_truncated(#[case] data: Vec<u8>, #[case] expected: ProtocolError) {
        let mut b: &[u8] = &data;
        assert_eq!(SubPacketHeader::deser(&mut b), Err(expected));
    }

    #[test]
    fn test_handshake_accept_layout() {
        let mut buf = Vec::new();
        HandshakeAccept { connection_id: 7 }.ser(&mut buf);

        let mut expected = b"halley_accp\0".to_vec();
        expected.extend_from_slice(&[7, 0, 0, 0]);
        assert_eq!(buf, expected);
        assert_eq!(buf.len(), HandshakeAccept::SERIALIZED_LEN);
    }

    #[rstest]
    #[case::positive(7)]
    #[case::zero(0)]
    #[case::negative(-1)]
    #[case::large(0x1234)]
    fn test_handshake_accept_roundtrip(#[case] connection_id: i16) {
        let mut buf = Vec::new();
        HandshakeAccept { connection_id }.ser(&mut buf);

        assert_eq!(
            HandshakeAccept::parse(&buf),
            Some(HandshakeAccept { connection_id })
        );
    }

    #[test]
    fn test_handshake_accept_rejects_wrong_magic() {
        let mut buf = b"halley_rejec".to_vec();
        buf.extend_from_slice(&[7, 0, 0, 0]);
        assert_eq!(HandshakeAccept::parse(&buf), None);
    }

    #[rstest]
    #[case::too_short(15)]
    #[case::too_long(17)]
    fn test_handshake_accept_rejects_wrong_length(#[case] len: usize) {
        let mut buf = Vec::new();
        HandshakeAccept { connection_id: 7 }.ser(&mut buf);
        buf.resize(len, 0);
        assert_eq!(HandshakeAccept::parse(&buf), None);
    }
}
