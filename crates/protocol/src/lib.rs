//! Wire protocol for fastboot-bridge
//!
//! This crate implements the network side of the bridge: a one-time 4-byte
//! handshake followed by length-prefixed frames carrying opaque payloads.
//! Payloads are never inspected.
//!
//! # Example
//!
//! ```
//! use protocol::{HANDSHAKE, read_frame, write_frame};
//! use std::io::Cursor;
//!
//! assert_eq!(&HANDSHAKE, b"FB01");
//!
//! let mut buffer = Vec::new();
//! write_frame(&mut buffer, b"getvar:version").unwrap();
//!
//! let mut cursor = Cursor::new(buffer);
//! assert_eq!(read_frame(&mut cursor).unwrap(), b"getvar:version");
//! ```

pub mod codec;
pub mod error;
pub mod handshake;

pub use codec::{LENGTH_PREFIX_LEN, decode_frame, encode_frame, read_frame, write_frame};

#[cfg(feature = "async")]
pub use codec::{read_frame_async, write_frame_async};
pub use error::{ProtocolError, Result, Stage};
pub use handshake::{HANDSHAKE, read_handshake, write_handshake};

#[cfg(feature = "async")]
pub use handshake::{read_handshake_async, write_handshake_async};
