//! TCP bridge server
//!
//! Accepts clients one at a time and hands each to a [`ClientConnection`].
//! A single-permit semaphore is taken before `accept`, so while a session
//! runs the next client waits in the listen backlog.

use anyhow::{Context, Result};
use common::UsbBridge;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use super::connection::{ClientConnection, SessionSettings};

/// Pause after a failed `accept` before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// TCP server bridging clients to the USB worker
pub struct BridgeServer {
    listener: TcpListener,
    usb_bridge: UsbBridge,
    settings: Arc<SessionSettings>,
    /// One permit: the single live session
    session_slot: Arc<Semaphore>,
}

impl BridgeServer {
    /// Bind the listener
    pub async fn bind(addr: &str, usb_bridge: UsbBridge, settings: SessionSettings) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to listen on {}", addr))?;

        Ok(Self {
            listener,
            usb_bridge,
            settings: Arc::new(settings),
            session_slot: Arc::new(Semaphore::new(1)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to get listener address")
    }

    /// Accept clients until the task is dropped
    ///
    /// Session failures are logged and never end the loop.
    pub async fn run(self) -> Result<()> {
        info!("Waiting for connections on {}", self.local_addr()?);

        loop {
            let permit = self
                .session_slot
                .clone()
                .acquire_owned()
                .await
                .context("Session semaphore closed")?;

            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("tcp: accept failed: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };

            info!("Accepted connection from {}", peer);

            let connection = ClientConnection::new(
                peer.to_string(),
                stream,
                self.usb_bridge.clone(),
                self.settings.clone(),
            );
            let usb_bridge = self.usb_bridge.clone();

            tokio::spawn(async move {
                let session = tokio::spawn(connection.run());
                if let Err(e) = session.await {
                    // The session never reached its Closing state
                    error!("Session for {} aborted: {}", peer, e);
                    if let Err(e) = usb_bridge.release().await {
                        error!("usb: release after aborted session failed: {}", e);
                    }
                }
                drop(permit);
            });
        }
    }
}
