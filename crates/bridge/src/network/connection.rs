//! Client Connection Handler
//!
//! Runs one client session through its states:
//!
//! ```text
//! Handshaking ──> DeviceAcquiring ──> Relaying ──> Closing
//!      │                 │                            ▲
//!      └─────────────────┴────────────────────────────┘
//! ```
//!
//! Relaying is strict request/response: each frame read from the client is
//! written to the device, exactly one bulk read follows, and its result goes
//! back as one frame before the next request is read.

use common::UsbBridge;
use protocol::{
    ProtocolError, read_frame_async, read_handshake_async, write_frame_async,
    write_handshake_async,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, info, warn};

/// Per-session knobs shared by every connection
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Only accept the device with this serial number
    pub serial: Option<String>,
    /// Buffer size of the single bulk read per request
    pub response_capacity: usize,
    /// Pause after a failed acquisition before the client is dropped
    pub acquire_retry_delay: Duration,
    /// Bound on each network read; `None` waits forever
    pub read_timeout: Option<Duration>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            serial: None,
            response_capacity: crate::usb::DEFAULT_RESPONSE_CAPACITY,
            acquire_retry_delay: Duration::from_secs(1),
            read_timeout: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Handshaking,
    DeviceAcquiring,
    Relaying,
    Closing,
}

/// Why a session stopped, tagged by the side that failed
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("tcp: {0}")]
    Network(#[from] ProtocolError),

    #[error("tcp: no data from client for {0:?}")]
    ReadTimeout(Duration),

    #[error("usb: {0}")]
    Usb(#[source] common::Error),
}

impl SessionError {
    /// Client hung up between frames
    pub fn is_disconnect(&self) -> bool {
        matches!(self, SessionError::Network(e) if e.is_disconnect())
    }
}

/// Per-client connection handler
///
/// Owns the client stream for the whole session. The device is released
/// before the stream is dropped, so a client that sees EOF can rely on the
/// device being free again.
pub struct ClientConnection<S> {
    /// Peer label used in log lines
    peer: String,
    stream: S,
    usb_bridge: UsbBridge,
    settings: Arc<SessionSettings>,
    state: SessionState,
    /// Whether the USB worker holds a session for us
    acquired: bool,
}

impl<S> ClientConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a new client connection handler
    pub fn new(
        peer: impl Into<String>,
        stream: S,
        usb_bridge: UsbBridge,
        settings: Arc<SessionSettings>,
    ) -> Self {
        Self {
            peer: peer.into(),
            stream,
            usb_bridge,
            settings,
            state: SessionState::Handshaking,
            acquired: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run the session to completion
    ///
    /// Never fails: every error is logged here and ends the session.
    pub async fn run(mut self) {
        debug!("{}: handshaking", self.peer);
        let timeout = self.settings.read_timeout;
        if let Err(e) = bounded_read(timeout, read_handshake_async(&mut self.stream)).await {
            warn!("{}: {}", self.peer, e);
            return self.close().await;
        }

        self.transition(SessionState::DeviceAcquiring);
        match self.usb_bridge.acquire(self.settings.serial.clone()).await {
            Ok(info) => {
                self.acquired = true;
                info!("{}: acquired device {}", self.peer, info);
            }
            Err(e) => {
                error!("{}: usb: {}", self.peer, e);
                tokio::time::sleep(self.settings.acquire_retry_delay).await;
                return self.close().await;
            }
        }

        if let Err(e) = write_handshake_async(&mut self.stream).await {
            warn!("{}: tcp: {}", self.peer, e);
            return self.close().await;
        }

        self.transition(SessionState::Relaying);
        let (exchanges, e) = self.relay().await;
        if e.is_disconnect() {
            info!(
                "{}: client disconnected after {} exchanges",
                self.peer, exchanges
            );
        } else {
            warn!("{}: {} (after {} exchanges)", self.peer, e, exchanges);
        }

        self.close().await
    }

    /// Relay frames until a step fails
    async fn relay(&mut self) -> (u64, SessionError) {
        let mut exchanges = 0u64;
        loop {
            if let Err(e) = self.exchange().await {
                return (exchanges, e);
            }
            exchanges += 1;
        }
    }

    /// One request/response round trip
    async fn exchange(&mut self) -> Result<(), SessionError> {
        let timeout = self.settings.read_timeout;
        let request = bounded_read(timeout, read_frame_async(&mut self.stream)).await?;

        self.usb_bridge
            .write(request)
            .await
            .map_err(SessionError::Usb)?;

        let response = self
            .usb_bridge
            .read(self.settings.response_capacity)
            .await
            .map_err(SessionError::Usb)?;

        write_frame_async(&mut self.stream, &response).await?;
        Ok(())
    }

    /// Release the device, then drop the stream
    async fn close(mut self) {
        self.transition(SessionState::Closing);

        if self.acquired {
            match self.usb_bridge.release().await {
                Ok(_) => debug!("{}: device released", self.peer),
                Err(e) => error!("{}: usb: release failed: {}", self.peer, e),
            }
        }

        info!("{}: connection closed", self.peer);
    }

    fn transition(&mut self, next: SessionState) {
        debug!("{}: {:?} -> {:?}", self.peer, self.state, next);
        self.state = next;
    }
}

/// Run a network read, optionally bounded in time
async fn bounded_read<T>(
    timeout: Option<Duration>,
    read: impl Future<Output = protocol::Result<T>>,
) -> Result<T, SessionError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, read)
            .await
            .map_err(|_| SessionError::ReadTimeout(limit))?
            .map_err(SessionError::Network),
        None => read.await.map_err(SessionError::Network),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usb::spawn_usb_worker;
    use common::create_usb_bridge;
    use common::test_utils::{MockDevice, MockTransport};
    use protocol::HANDSHAKE;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn settings() -> Arc<SessionSettings> {
        Arc::new(SessionSettings {
            acquire_retry_delay: Duration::from_millis(10),
            ..Default::default()
        })
    }

    #[test]
    fn test_default_settings() {
        let settings = SessionSettings::default();
        assert_eq!(settings.response_capacity, 256);
        assert_eq!(settings.acquire_retry_delay, Duration::from_secs(1));
        assert!(settings.read_timeout.is_none());
        assert!(settings.serial.is_none());
    }

    #[test]
    fn test_session_error_stage_prefix() {
        let e = SessionError::Usb(common::Error::Usb(common::UsbError::NoDevice));
        assert!(e.to_string().starts_with("usb: "));
        assert!(!e.is_disconnect());

        let e = SessionError::ReadTimeout(Duration::from_secs(3));
        assert!(e.to_string().starts_with("tcp: "));
    }

    #[tokio::test]
    async fn test_new_connection_starts_handshaking() {
        let (bridge, _worker) = create_usb_bridge();
        let (_client, server) = tokio::io::duplex(64);
        let conn = ClientConnection::new("test", server, bridge, settings());
        assert_eq!(conn.state(), SessionState::Handshaking);
    }

    #[tokio::test]
    async fn test_session_over_duplex() {
        let transport = MockTransport::new(vec![MockDevice::fastboot(1)]);
        transport.push_response(b"OKAY");
        let (bridge, worker) = create_usb_bridge();
        let handle =
            spawn_usb_worker(worker, transport.clone(), Duration::from_secs(5)).unwrap();

        let (mut client, server) = tokio::io::duplex(1024);
        let session = tokio::spawn(
            ClientConnection::new("duplex", server, bridge.clone(), settings()).run(),
        );

        client.write_all(&HANDSHAKE).await.unwrap();
        let mut reply = [0u8; 4];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, HANDSHAKE);

        write_frame_async(&mut client, b"getvar:product").await.unwrap();
        assert_eq!(read_frame_async(&mut client).await.unwrap(), b"OKAY");
        assert_eq!(transport.written().concat(), b"getvar:product");

        drop(client);
        session.await.unwrap();
        assert_eq!(transport.stats().releases, 1);

        bridge.shutdown().await.unwrap();
        handle.join().unwrap();
    }

    #[tokio::test]
    async fn test_read_timeout_ends_session() {
        let transport = MockTransport::new(vec![MockDevice::fastboot(1)]);
        let (bridge, worker) = create_usb_bridge();
        let handle =
            spawn_usb_worker(worker, transport.clone(), Duration::from_secs(5)).unwrap();

        let settings = Arc::new(SessionSettings {
            read_timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        });
        let (mut client, server) = tokio::io::duplex(1024);
        let session =
            tokio::spawn(ClientConnection::new("idle", server, bridge.clone(), settings).run());

        client.write_all(&HANDSHAKE).await.unwrap();
        let mut reply = [0u8; 4];
        client.read_exact(&mut reply).await.unwrap();

        // Never send a frame; the server gives up and closes
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        session.await.unwrap();
        assert_eq!(transport.stats().open_handles(), 0);

        bridge.shutdown().await.unwrap();
        handle.join().unwrap();
    }
}
