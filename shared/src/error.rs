//! Error types for the wire protocol.

use thiserror::Error;

/// Failures produced by the packet codec and the compression layer.
///
/// Every variant is a per-datagram condition: the offending packet is dropped
/// and counted by the caller, never surfaced to peers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The buffer ended before the declared structure was fully read.
    #[error("truncated input")]
    Truncated,

    /// The leading type byte does not name a known message.
    #[error("unknown message type {0}")]
    UnknownType(u8),

    /// Compression would produce more than the 1024-byte packet ceiling.
    #[error("compressed output exceeds {max} bytes", max = crate::MAX_PACKET_SIZE)]
    OutputOverflow,

    /// The caller handed the codec more than 1024 bytes to begin with.
    #[error("input exceeds {max} bytes", max = crate::MAX_PACKET_SIZE)]
    OversizedInput,
}
