//! # Shared Wire Protocol Library
//!
//! This crate contains everything both ends of the relay protocol agree on:
//! the zero-suppression packet compression, the typed client/server message
//! set, and the fixed little-endian codec that turns messages into datagram
//! bodies and back.
//!
//! ## Core Components
//!
//! ### Compression (`compression`)
//! An 8-bit bitmask zero-suppression scheme. Input is walked in groups of up
//! to eight bytes; each group contributes one mask byte plus its non-zero
//! bytes. Frame-input payloads are mostly zeros, so this routinely shrinks a
//! broadcast to a fraction of its raw size.
//!
//! ### Messages (`messages`)
//! Tagged unions over the closed set of client and server payload shapes.
//! The dispatcher on the server is a match on the tag.
//!
//! ### Codec (`codec`)
//! Total parsers and serializers for both message directions. Parsers never
//! read past the provided buffer; underruns surface as
//! [`error::CodecError::Truncated`] instead of panics.
//!
//! ## Reliability Considerations
//!
//! The protocol runs over plain UDP. Sequence numbers ride on every header so
//! receivers can drop stale replays, and acknowledgement frames let the server
//! keep retransmitting the rollback window until the client confirms it.

pub mod codec;
pub mod compression;
pub mod error;
pub mod messages;

pub use error::CodecError;

/// Default UDP port the relay binds to.
pub const GAME_SERVER_PORT: u16 = 41234;

/// Hard ceiling on a datagram body, compressed or raw.
pub const MAX_PACKET_SIZE: usize = 1024;

/// Nominal duration of one simulation frame in milliseconds (60 Hz).
pub const TARGET_FRAME_TIME_MS: f32 = 1000.0 / 60.0;

/// Fixed-length field widths for the `NewConnection` identity strings.
pub const MATCH_ID_LEN: usize = 25;
pub const MATCH_KEY_LEN: usize = 45;
pub const ENVIRONMENT_ID_LEN: usize = 25;
