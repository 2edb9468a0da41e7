//! USB session
//!
//! An opened device with interface 0 claimed and its bulk endpoints
//! resolved. Writes are split into max-packet-size chunks, one blocking bulk
//! transfer each; reads are a single bulk transfer into a fixed buffer.

use crate::usb::locator::Candidate;
use common::{BulkHandle, EndpointInfo, SessionInfo, UsbError, UsbTransport};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Interface claimed on the matched device
const INTERFACE: u8 = 0;

/// Default timeout for USB transfers (5 seconds)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default capacity of the response buffer
///
/// A device response longer than this is truncated by the single bulk read.
pub const DEFAULT_RESPONSE_CAPACITY: usize = 256;

/// Number of bulk transfers needed for a payload
///
/// Zero for an empty payload.
pub fn chunk_count(len: usize, max_packet_size: u16) -> usize {
    len.div_ceil(chunk_size(max_packet_size))
}

fn chunk_size(max_packet_size: u16) -> usize {
    // A zero max packet size would be a broken descriptor
    usize::from(max_packet_size).max(1)
}

/// Claimed device plus its bulk endpoints
pub struct UsbSession<H: BulkHandle> {
    /// `None` once closed
    handle: Option<H>,
    endpoint_in: EndpointInfo,
    endpoint_out: EndpointInfo,
    info: SessionInfo,
    timeout: Duration,
}

impl<H: BulkHandle> UsbSession<H> {
    /// Open a located device and claim its interface
    ///
    /// On a claim failure the handle is dropped, which closes the device.
    pub fn open<T>(
        transport: &T,
        candidate: Candidate<T::Device>,
        timeout: Duration,
    ) -> Result<Self, UsbError>
    where
        T: UsbTransport<Handle = H>,
    {
        let mut handle = transport.open(&candidate.device).map_err(UsbError::Open)?;
        handle
            .claim_interface(INTERFACE)
            .map_err(UsbError::Claim)?;

        let descriptor = candidate.descriptor;
        let info = SessionInfo {
            bus_number: descriptor.bus_number,
            address: descriptor.address,
            vendor_id: descriptor.vendor_id,
            product_id: descriptor.product_id,
            endpoint_in: candidate.endpoint_in.address,
            endpoint_out: candidate.endpoint_out.address,
            max_packet_size: candidate.endpoint_out.max_packet_size,
        };

        info!("Opened device {}", info);

        Ok(Self {
            handle: Some(handle),
            endpoint_in: candidate.endpoint_in,
            endpoint_out: candidate.endpoint_out,
            info,
            timeout,
        })
    }

    pub fn info(&self) -> SessionInfo {
        self.info
    }

    fn handle(&self) -> Result<&H, UsbError> {
        self.handle.as_ref().ok_or(UsbError::NoSession)
    }

    /// Write a payload as consecutive bulk transfers
    ///
    /// Stops at the first failed chunk; nothing is retried. An empty payload
    /// issues no transfer at all.
    pub fn write(&self, payload: &[u8]) -> Result<(), UsbError> {
        let handle = self.handle()?;
        let max_packet_size = self.endpoint_out.max_packet_size;
        let chunks = chunk_count(payload.len(), max_packet_size);

        debug!(
            "usb send: {} bytes, {} chunks of {}",
            payload.len(),
            chunks,
            max_packet_size
        );

        for (index, chunk) in payload.chunks(chunk_size(max_packet_size)).enumerate() {
            handle
                .write_bulk(self.endpoint_out.address, chunk, self.timeout)
                .map_err(|source| UsbError::Write {
                    chunk: index + 1,
                    chunks,
                    source,
                })?;
        }

        Ok(())
    }

    /// Read one response with exactly one bulk transfer
    ///
    /// The returned buffer holds what the device sent, at most `capacity`
    /// bytes.
    pub fn read(&self, capacity: usize) -> Result<Vec<u8>, UsbError> {
        let handle = self.handle()?;
        let mut buffer = vec![0u8; capacity];

        let len = handle
            .read_bulk(self.endpoint_in.address, &mut buffer, self.timeout)
            .map_err(UsbError::Read)?;
        buffer.truncate(len);

        debug!("usb recv: {} bytes", len);
        Ok(buffer)
    }

    /// Release the interface and close the device
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            if let Err(e) = handle.release_interface(INTERFACE) {
                warn!("Failed to release interface {}: {}", INTERFACE, e);
            }
            drop(handle);
            info!(
                "Closed device {}:{}",
                self.info.bus_number, self.info.address
            );
        }
    }
}

impl<H: BulkHandle> Drop for UsbSession<H> {
    fn drop(&mut self) {
        self.release();
    }
}
