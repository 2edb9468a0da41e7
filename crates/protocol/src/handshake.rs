//! Connection handshake
//!
//! Before any frame is relayed, client and server each send the same
//! 4-byte ASCII token. The client speaks first; the server answers only
//! once it holds a device.

use crate::error::{ProtocolError, Result, Stage};
use std::io::{Read, Write};

#[cfg(feature = "async")]
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Handshake token, identical in both directions
pub const HANDSHAKE: [u8; 4] = *b"FB01";

fn check_token(received: [u8; 4]) -> Result<()> {
    if received == HANDSHAKE {
        Ok(())
    } else {
        Err(ProtocolError::HandshakeMismatch { received })
    }
}

/// Read and verify the peer's handshake
///
/// # Example
/// ```
/// use std::io::Cursor;
///
/// let mut ok = Cursor::new(b"FB01".to_vec());
/// assert!(protocol::read_handshake(&mut ok).is_ok());
///
/// let mut bad = Cursor::new(b"FB02".to_vec());
/// assert!(protocol::read_handshake(&mut bad).is_err());
/// ```
pub fn read_handshake<R: Read>(reader: &mut R) -> Result<()> {
    let mut received = [0u8; 4];
    reader
        .read_exact(&mut received)
        .map_err(ProtocolError::read(Stage::Handshake))?;
    check_token(received)
}

/// Send the handshake token
pub fn write_handshake<W: Write>(writer: &mut W) -> Result<()> {
    writer
        .write_all(&HANDSHAKE)
        .and_then(|()| writer.flush())
        .map_err(ProtocolError::write(Stage::Handshake))
}

/// Async: read and verify the peer's handshake
#[cfg(feature = "async")]
pub async fn read_handshake_async<R>(reader: &mut R) -> Result<()>
where
    R: AsyncReadExt + Unpin,
{
    let mut received = [0u8; 4];
    reader
        .read_exact(&mut received)
        .await
        .map_err(ProtocolError::read(Stage::Handshake))?;
    check_token(received)
}

/// Async: send the handshake token
#[cfg(feature = "async")]
pub async fn write_handshake_async<W>(writer: &mut W) -> Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    writer
        .write_all(&HANDSHAKE)
        .await
        .map_err(ProtocolError::write(Stage::Handshake))?;
    writer
        .flush()
        .await
        .map_err(ProtocolError::write(Stage::Handshake))
}
