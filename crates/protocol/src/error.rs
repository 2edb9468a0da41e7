//! Protocol error types

use std::fmt;
use std::io;
use thiserror::Error;

/// Which part of the wire exchange an I/O failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// The 4-byte handshake token
    Handshake,
    /// The 8-byte big-endian length prefix
    Header,
    /// The payload bytes following the length prefix
    Payload,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Handshake => f.write_str("handshake"),
            Stage::Header => f.write_str("header"),
            Stage::Payload => f.write_str("payload"),
        }
    }
}

/// Protocol-level errors
///
/// Every variant is fatal for the connection it was raised on: the stream
/// carries no resynchronisation markers, so the caller must drop it.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Peer sent 4 bytes that are not the handshake token
    #[error("Handshake mismatch: got {received:02x?}")]
    HandshakeMismatch { received: [u8; 4] },

    /// Reading a stage failed or the stream ended early
    #[error("Read {stage} failed: {source}")]
    Read {
        stage: Stage,
        #[source]
        source: io::Error,
    },

    /// Writing a stage failed
    #[error("Write {stage} failed: {source}")]
    Write {
        stage: Stage,
        #[source]
        source: io::Error,
    },

    /// Announced payload length cannot be allocated on this host
    #[error("Frame too large: {length} bytes")]
    FrameTooLarge { length: u64 },

    /// Incomplete frame data in a byte slice
    #[error("Incomplete frame: expected {expected} bytes, got {actual}")]
    IncompleteFrame { expected: usize, actual: usize },
}

impl ProtocolError {
    pub(crate) fn read(stage: Stage) -> impl FnOnce(io::Error) -> Self {
        move |source| ProtocolError::Read { stage, source }
    }

    pub(crate) fn write(stage: Stage) -> impl FnOnce(io::Error) -> Self {
        move |source| ProtocolError::Write { stage, source }
    }

    /// True when the peer closed the stream cleanly between frames
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            ProtocolError::Read {
                stage: Stage::Header,
                source,
            } if source.kind() == io::ErrorKind::UnexpectedEof
        )
    }
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;
