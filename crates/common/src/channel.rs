//! Async channel bridge between Tokio runtime and USB thread
//!
//! Every USB operation is blocking, so all of them run on one dedicated
//! thread. The async side sends a [`UsbCommand`] carrying a oneshot sender
//! and awaits the reply. Because a single thread serves every command, no
//! two device lookups or sessions can ever overlap.

use crate::usb_types::{SessionInfo, UsbError};
use async_channel::{Receiver, Sender, bounded};
use tokio::sync::oneshot;

/// Commands from Tokio runtime to USB thread
#[derive(Debug)]
pub enum UsbCommand {
    /// Locate the fastboot device, open it and claim interface 0
    Acquire {
        /// Only accept a device with this serial number
        serial: Option<String>,
        /// Channel to send response back
        response: oneshot::Sender<Result<SessionInfo, UsbError>>,
    },

    /// Write one payload to the bulk OUT endpoint, chunked by max packet size
    Write {
        data: Vec<u8>,
        /// Channel to send response back
        response: oneshot::Sender<Result<(), UsbError>>,
    },

    /// Issue exactly one bulk IN transfer into a buffer of `capacity` bytes
    Read {
        capacity: usize,
        /// Channel to send response back
        response: oneshot::Sender<Result<Vec<u8>, UsbError>>,
    },

    /// Release the interface and close the device
    Release {
        /// Receives `true` if a session was open
        response: oneshot::Sender<bool>,
    },

    /// Shutdown the USB thread gracefully
    Shutdown,
}

/// Handle for Tokio runtime (async)
#[derive(Clone)]
pub struct UsbBridge {
    cmd_tx: Sender<UsbCommand>,
}

impl UsbBridge {
    /// Send a command to the USB thread
    pub async fn send_command(&self, cmd: UsbCommand) -> crate::Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> UsbCommand,
    ) -> crate::Result<T> {
        let (tx, rx) = oneshot::channel();
        self.send_command(make(tx)).await?;
        rx.await
            .map_err(|_| crate::Error::Channel("USB worker dropped the request".to_string()))
    }

    /// Open a session on the single matching device
    pub async fn acquire(&self, serial: Option<String>) -> crate::Result<SessionInfo> {
        let result = self
            .request(|response| UsbCommand::Acquire { serial, response })
            .await?;
        Ok(result?)
    }

    /// Write a payload to the device
    pub async fn write(&self, data: Vec<u8>) -> crate::Result<()> {
        let result = self
            .request(|response| UsbCommand::Write { data, response })
            .await?;
        Ok(result?)
    }

    /// Read one response of at most `capacity` bytes
    pub async fn read(&self, capacity: usize) -> crate::Result<Vec<u8>> {
        let result = self
            .request(|response| UsbCommand::Read { capacity, response })
            .await?;
        Ok(result?)
    }

    /// Close the current session, if any
    pub async fn release(&self) -> crate::Result<bool> {
        self.request(|response| UsbCommand::Release { response })
            .await
    }

    /// Ask the USB thread to exit
    pub async fn shutdown(&self) -> crate::Result<()> {
        self.send_command(UsbCommand::Shutdown).await
    }
}

/// Handle for USB thread (blocking)
pub struct UsbWorker {
    pub(crate) cmd_rx: Receiver<UsbCommand>,
}

impl UsbWorker {
    /// Receive a command from Tokio runtime (blocking)
    pub fn recv_command(&self) -> crate::Result<UsbCommand> {
        self.cmd_rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }
}

/// Create the channel bridge between Tokio and USB thread
///
/// Returns (UsbBridge for Tokio, UsbWorker for USB thread). Sessions are
/// strictly request/response, so a small queue is plenty.
pub fn create_usb_bridge() -> (UsbBridge, UsbWorker) {
    let (cmd_tx, cmd_rx) = bounded(16);

    (UsbBridge { cmd_tx }, UsbWorker { cmd_rx })
}
