//! USB subsystem
//!
//! Locates the single fastboot-mode device, holds the session on it and runs
//! every blocking USB call on a dedicated worker thread so the Tokio runtime
//! never blocks on libusb.

pub mod locator;
pub mod session;
pub mod transport;
pub mod worker;

pub use locator::{Candidate, bulk_endpoints, find_device, locate};
pub use session::{DEFAULT_RESPONSE_CAPACITY, DEFAULT_TIMEOUT, UsbSession, chunk_count};
pub use transport::{RusbHandle, RusbTransport};
pub use worker::{UsbWorkerThread, spawn_usb_worker};
