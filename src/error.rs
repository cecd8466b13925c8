use thiserror::Error;

/// Decoding failures for inbound datagrams.
///
/// A failed decode abandons the rest of the current datagram; whether the
///  connection itself stays usable is up to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("attempted to read {requested} bytes with only {remaining} available")]
    ShortRead { requested: usize, remaining: usize },

    #[error("sub-packet header incomplete")]
    IncompleteSubPacketHeader,

    #[error("sub-packet header missing resend data")]
    MissingResendData,

    #[error("sub-packet payload of {size} bytes exceeds the {remaining} bytes left in the datagram")]
    SubPacketOverrun { size: usize, remaining: usize },

    #[error("sub-packet payload of {0} bytes exceeds the maximum of 2048")]
    OversizeSubPacket(usize),
}
