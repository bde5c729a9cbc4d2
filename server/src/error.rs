//! Server error type.

use thiserror::Error;

/// Failures surfaced by the relay. Per-packet conditions are logged and
/// dropped by the dispatcher; only bind failures at startup are fatal.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] shared::CodecError),

    #[error("config fetch failed for match {0}")]
    ConfigFetch(String),
}
