//! USB worker thread
//!
//! Dedicated thread that owns the USB transport (and with it the global USB
//! context) and at most one [`UsbSession`]. Every blocking USB call happens
//! here; the Tokio side talks to it through the channel bridge in `common`.

use crate::usb::{locator, session::UsbSession};
use common::{SessionInfo, UsbCommand, UsbError, UsbTransport, UsbWorker};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// USB worker thread
///
/// Serves commands one at a time, which keeps device lookups and sessions
/// strictly sequential.
pub struct UsbWorkerThread<T: UsbTransport> {
    transport: T,
    worker: UsbWorker,
    session: Option<UsbSession<T::Handle>>,
    timeout: Duration,
}

impl<T: UsbTransport> UsbWorkerThread<T> {
    /// Create a new USB worker thread
    pub fn new(worker: UsbWorker, transport: T, timeout: Duration) -> Self {
        Self {
            transport,
            worker,
            session: None,
            timeout,
        }
    }

    /// Run the USB worker thread event loop
    ///
    /// Blocks on the command channel and returns on `Shutdown` or once every
    /// bridge handle is gone. An open session is closed before returning.
    pub fn run(mut self) {
        info!("USB worker thread started");

        loop {
            match self.worker.recv_command() {
                Ok(UsbCommand::Shutdown) => {
                    info!("USB worker shutting down");
                    break;
                }
                Ok(cmd) => self.handle_command(cmd),
                Err(e) => {
                    debug!("Command channel closed: {}", e);
                    break;
                }
            }
        }

        self.close_session();
        info!("USB worker thread stopped");
    }

    /// Handle a command from the Tokio runtime
    fn handle_command(&mut self, cmd: UsbCommand) {
        // Wrap in catch_unwind to prevent panics from crashing the USB thread
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.handle_command_inner(cmd)
        }));

        if let Err(e) = result {
            error!("Panic in USB command handler: {:?}", e);
            self.close_session();
        }
    }

    /// Inner command handler (can panic, caught by handle_command)
    fn handle_command_inner(&mut self, cmd: UsbCommand) {
        match cmd {
            UsbCommand::Acquire { serial, response } => {
                debug!("Acquiring device (serial: {:?})", serial);
                let result = self.acquire(serial.as_deref());
                let _ = response.send(result);
            }

            UsbCommand::Write { data, response } => {
                let result = match &self.session {
                    Some(session) => session.write(&data),
                    None => Err(UsbError::NoSession),
                };
                let _ = response.send(result);
            }

            UsbCommand::Read { capacity, response } => {
                let result = match &self.session {
                    Some(session) => session.read(capacity),
                    None => Err(UsbError::NoSession),
                };
                let _ = response.send(result);
            }

            UsbCommand::Release { response } => {
                let had_session = self.close_session();
                let _ = response.send(had_session);
            }

            UsbCommand::Shutdown => {
                // Already handled in run loop
                unreachable!()
            }
        }
    }

    fn acquire(&mut self, serial: Option<&str>) -> Result<SessionInfo, UsbError> {
        if self.session.is_some() {
            warn!("Refusing to open a second USB session");
            return Err(UsbError::SessionActive);
        }

        let session = locator::locate(&self.transport, serial, self.timeout)?;
        let info = session.info();
        self.session = Some(session);
        Ok(info)
    }

    /// Close the current session; returns whether there was one
    fn close_session(&mut self) -> bool {
        match self.session.take() {
            Some(session) => {
                session.close();
                true
            }
            None => false,
        }
    }
}

/// Spawn the USB worker thread
///
/// The thread takes ownership of `transport` and drops it when it exits.
pub fn spawn_usb_worker<T: UsbTransport>(
    worker: UsbWorker,
    transport: T,
    timeout: Duration,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("usb-worker".to_string())
        .spawn(move || UsbWorkerThread::new(worker, transport, timeout).run())
}
