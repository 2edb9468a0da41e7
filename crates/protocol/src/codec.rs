//! Length-prefixed frame codec
//!
//! Every request and response on the network side is one frame:
//!
//! ```text
//! [Length: u64 (big-endian)][Payload: Length bytes]
//! ```
//!
//! The payload is opaque. There is no size ceiling beyond what the host can
//! allocate, no checksum and no resynchronisation: a short read or write at
//! either stage leaves the stream unusable.

use crate::error::{ProtocolError, Result, Stage};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use bytes::{BufMut, Bytes, BytesMut};
use std::io::{self, Read, Write};

#[cfg(feature = "async")]
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

/// Size of the length prefix in bytes
pub const LENGTH_PREFIX_LEN: usize = 8;

/// Initial payload buffer size; longer payloads grow as bytes arrive
const INITIAL_PAYLOAD_CAPACITY: usize = 64 * 1024;

fn payload_size(length: u64) -> Result<usize> {
    usize::try_from(length).map_err(|_| ProtocolError::FrameTooLarge { length })
}

fn payload_buffer(size: usize) -> Vec<u8> {
    Vec::with_capacity(size.min(INITIAL_PAYLOAD_CAPACITY))
}

/// Fail if the stream ended before the announced length
fn ensure_complete(payload: &[u8], size: usize) -> Result<()> {
    if payload.len() < size {
        let eof = io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("frame announced {} bytes, got {}", size, payload.len()),
        );
        return Err(ProtocolError::read(Stage::Payload)(eof));
    }
    Ok(())
}

/// Encode a payload with its length prefix
///
/// # Example
/// ```
/// let framed = protocol::encode_frame(&[0x01, 0x02, 0x03]);
/// assert_eq!(&framed[..8], &[0, 0, 0, 0, 0, 0, 0, 3]);
/// assert_eq!(&framed[8..], &[0x01, 0x02, 0x03]);
/// ```
pub fn encode_frame(payload: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(LENGTH_PREFIX_LEN + payload.len());
    frame.put_u64(payload.len() as u64);
    frame.put_slice(payload);
    frame.freeze()
}

/// Decode one frame from the front of a byte slice
///
/// Returns the payload and the total number of bytes consumed.
pub fn decode_frame(frame: &[u8]) -> Result<(&[u8], usize)> {
    if frame.len() < LENGTH_PREFIX_LEN {
        return Err(ProtocolError::IncompleteFrame {
            expected: LENGTH_PREFIX_LEN,
            actual: frame.len(),
        });
    }

    let mut prefix = [0u8; LENGTH_PREFIX_LEN];
    prefix.copy_from_slice(&frame[..LENGTH_PREFIX_LEN]);
    let length = u64::from_be_bytes(prefix);

    let total = usize::try_from(length)
        .ok()
        .and_then(|len| len.checked_add(LENGTH_PREFIX_LEN))
        .ok_or(ProtocolError::FrameTooLarge { length })?;

    if frame.len() < total {
        return Err(ProtocolError::IncompleteFrame {
            expected: total,
            actual: frame.len(),
        });
    }

    Ok((&frame[LENGTH_PREFIX_LEN..total], total))
}

/// Read one frame from a reader
///
/// # Example
/// ```
/// use std::io::Cursor;
///
/// let mut buffer = Vec::new();
/// protocol::write_frame(&mut buffer, b"getvar:product").unwrap();
///
/// let mut cursor = Cursor::new(buffer);
/// let payload = protocol::read_frame(&mut cursor).unwrap();
/// assert_eq!(payload, b"getvar:product");
/// ```
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let length = reader
        .read_u64::<BigEndian>()
        .map_err(ProtocolError::read(Stage::Header))?;

    let size = payload_size(length)?;
    let mut payload = payload_buffer(size);
    (&mut *reader)
        .take(length)
        .read_to_end(&mut payload)
        .map_err(ProtocolError::read(Stage::Payload))?;
    ensure_complete(&payload, size)?;

    Ok(payload)
}

/// Write one frame to a writer
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<()> {
    writer
        .write_u64::<BigEndian>(payload.len() as u64)
        .map_err(ProtocolError::write(Stage::Header))?;
    writer
        .write_all(payload)
        .and_then(|()| writer.flush())
        .map_err(ProtocolError::write(Stage::Payload))
}

/// Async: read one frame from an async reader (e.g., TCP stream)
#[cfg(feature = "async")]
pub async fn read_frame_async<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    // tokio's read_u64 is big-endian
    let length = reader
        .read_u64()
        .await
        .map_err(ProtocolError::read(Stage::Header))?;

    let size = payload_size(length)?;
    let mut payload = payload_buffer(size);
    (&mut *reader)
        .take(length)
        .read_to_end(&mut payload)
        .await
        .map_err(ProtocolError::read(Stage::Payload))?;
    ensure_complete(&payload, size)?;

    Ok(payload)
}

/// Async: write one frame to an async writer (e.g., TCP stream)
#[cfg(feature = "async")]
pub async fn write_frame_async<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    writer
        .write_u64(payload.len() as u64)
        .await
        .map_err(ProtocolError::write(Stage::Header))?;
    writer
        .write_all(payload)
        .await
        .map_err(ProtocolError::write(Stage::Payload))?;
    writer
        .flush()
        .await
        .map_err(ProtocolError::write(Stage::Payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_encode_layout() {
        let framed = encode_frame(b"OKAY");
        assert_eq!(framed.len(), 12);
        assert_eq!(&framed[..8], &4u64.to_be_bytes());
        assert_eq!(&framed[8..], b"OKAY");
    }

    #[test]
    fn test_encode_empty_payload() {
        let framed = encode_frame(&[]);
        assert_eq!(&framed[..], &[0u8; 8]);
    }

    #[test]
    fn test_decode_consumes_one_frame() {
        let mut stream = encode_frame(b"abc").to_vec();
        stream.extend_from_slice(&encode_frame(b"de"));

        let (first, used) = decode_frame(&stream).unwrap();
        assert_eq!(first, b"abc");
        assert_eq!(used, 11);

        let (second, _) = decode_frame(&stream[used..]).unwrap();
        assert_eq!(second, b"de");
    }

    #[test]
    fn test_decode_incomplete_payload() {
        let mut truncated = 10u64.to_be_bytes().to_vec();
        truncated.extend_from_slice(&[1, 2, 3]);

        let Err(ProtocolError::IncompleteFrame { expected, actual }) = decode_frame(&truncated)
        else {
            panic!("Expected IncompleteFrame");
        };
        assert_eq!(expected, 18);
        assert_eq!(actual, 11);
    }

    #[test]
    fn test_decode_partial_prefix() {
        assert!(matches!(
            decode_frame(&[0, 0, 0]),
            Err(ProtocolError::IncompleteFrame {
                expected: 8,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_decode_length_overflow() {
        let huge = u64::MAX.to_be_bytes();
        assert!(matches!(
            decode_frame(&huge),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_read_short_header() {
        let mut cursor = Cursor::new(vec![0u8; 5]);
        let result = read_frame(&mut cursor);
        assert!(matches!(
            result,
            Err(ProtocolError::Read {
                stage: Stage::Header,
                ..
            })
        ));
    }

    #[test]
    fn test_read_short_payload() {
        let mut data = 4u64.to_be_bytes().to_vec();
        data.extend_from_slice(b"ab");
        let mut cursor = Cursor::new(data);

        let result = read_frame(&mut cursor);
        assert!(matches!(
            result,
            Err(ProtocolError::Read {
                stage: Stage::Payload,
                ..
            })
        ));
    }

    #[test]
    fn test_huge_announcement_is_not_preallocated() {
        // Announce the largest possible frame but send only three bytes
        let mut data = u64::MAX.to_be_bytes().to_vec();
        data.extend_from_slice(&[1, 2, 3]);
        let mut cursor = Cursor::new(data);

        let err = read_frame(&mut cursor).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Read {
                stage: Stage::Payload,
                ..
            }
        ));
        assert!(!err.is_disconnect());
    }

    #[test]
    fn test_payload_larger_than_initial_buffer() {
        let payload = vec![0xA5; INITIAL_PAYLOAD_CAPACITY * 2 + 7];
        let mut buffer = Vec::new();
        write_frame(&mut buffer, &payload).unwrap();

        assert_eq!(read_frame(&mut Cursor::new(buffer)).unwrap(), payload);
    }

    #[test]
    fn test_payload_buffer_starts_small() {
        assert!(payload_buffer(16).capacity() >= 16);
        assert!(payload_buffer(usize::MAX).capacity() < 2 * INITIAL_PAYLOAD_CAPACITY);
    }

    #[test]
    fn test_empty_stream_is_disconnect() {
        let mut cursor = Cursor::new(Vec::new());
        let err = read_frame(&mut cursor).unwrap_err();
        assert!(err.is_disconnect());
    }

    #[test]
    fn test_write_frame_matches_encode() {
        let mut buffer = Vec::new();
        write_frame(&mut buffer, b"download:00001000").unwrap();
        assert_eq!(buffer, encode_frame(b"download:00001000").to_vec());
    }

    #[tokio::test]
    async fn test_async_frames_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(16);

        let writer = tokio::spawn(async move {
            write_frame_async(&mut client, &[0x01, 0x02, 0x03]).await.unwrap();
            write_frame_async(&mut client, &[]).await.unwrap();
            client
        });

        assert_eq!(read_frame_async(&mut server).await.unwrap(), vec![1, 2, 3]);
        assert!(read_frame_async(&mut server).await.unwrap().is_empty());

        drop(writer.await.unwrap());
        let err = read_frame_async(&mut server).await.unwrap_err();
        assert!(err.is_disconnect());
    }

    #[tokio::test]
    async fn test_async_huge_announcement_then_hangup() {
        let (mut client, mut server) = tokio::io::duplex(64);

        client.write_u64(1 << 40).await.unwrap();
        client.write_all(b"abc").await.unwrap();
        drop(client);

        assert!(matches!(
            read_frame_async(&mut server).await,
            Err(ProtocolError::Read {
                stage: Stage::Payload,
                ..
            })
        ));
    }
}
