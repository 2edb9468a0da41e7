//! Common utilities for fastboot-bridge
//!
//! This crate provides the pieces shared between the bridge library, its
//! binary and its tests: error handling, logging setup, the USB capability
//! boundary the bridge is written against, and the async channel bridge to
//! the blocking USB worker thread.

pub mod channel;
pub mod error;
pub mod logging;
pub mod test_utils;
pub mod usb_types;

pub use channel::{UsbBridge, UsbCommand, UsbWorker, create_usb_bridge};
pub use error::{Error, Result};
pub use logging::setup_logging;
pub use usb_types::{
    BulkHandle, DeviceDescriptor, Direction, EndpointInfo, FASTBOOT_SIGNATURE, InterfaceInfo,
    InterfaceSignature, SessionInfo, TransferKind, TransportError, UsbError, UsbTransport,
};
