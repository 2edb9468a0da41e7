//! Network subsystem
//!
//! TCP side of the bridge:
//!
//! ```text
//! BridgeServer
//!   ├─> take the single session permit
//!   ├─> accept one client
//!   └─> spawn ClientConnection
//!         ├─> FB01 handshake
//!         ├─> acquire the device via UsbBridge
//!         ├─> relay frames <-> bulk transfers
//!         └─> release the device, then close
//! ```

pub mod connection;
pub mod server;

pub use connection::{ClientConnection, SessionError, SessionSettings, SessionState};
pub use server::BridgeServer;
