//! Test utilities for fastboot-bridge
//!
//! Provides an in-memory [`UsbTransport`] with scripted devices and
//! responses, plus helpers for async tests.
//!
//! # Example
//!
//! ```
//! use common::test_utils::{MockDevice, MockTransport};
//! use common::UsbTransport;
//!
//! let transport = MockTransport::new(vec![MockDevice::fastboot(5).with_serial("0123456789")]);
//! let devices = transport.devices().unwrap();
//! assert_eq!(devices.len(), 1);
//! assert_eq!(transport.stats().enumerations, 1);
//! ```

use crate::usb_types::{
    BulkHandle, DeviceDescriptor, Direction, EndpointInfo, FASTBOOT_SIGNATURE, InterfaceInfo,
    InterfaceSignature, TransferKind, TransportError, UsbTransport,
};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Bulk IN endpoint address used by [`MockDevice::fastboot`]
pub const MOCK_ENDPOINT_IN: u8 = 0x81;

/// Bulk OUT endpoint address used by [`MockDevice::fastboot`]
pub const MOCK_ENDPOINT_OUT: u8 = 0x01;

/// Build a fastboot-style interface with one bulk endpoint per direction
pub fn fastboot_interface(max_packet_size: u16) -> InterfaceInfo {
    InterfaceInfo {
        number: 0,
        signature: FASTBOOT_SIGNATURE,
        endpoints: vec![
            EndpointInfo {
                address: MOCK_ENDPOINT_IN,
                direction: Direction::In,
                kind: TransferKind::Bulk,
                max_packet_size,
            },
            EndpointInfo {
                address: MOCK_ENDPOINT_OUT,
                direction: Direction::Out,
                kind: TransferKind::Bulk,
                max_packet_size,
            },
        ],
    }
}

/// A scripted device
#[derive(Debug, Clone)]
pub struct MockDevice {
    pub descriptor: DeviceDescriptor,
    pub serial: Option<String>,
    pub open_error: Option<TransportError>,
    pub claim_error: Option<TransportError>,
}

impl MockDevice {
    /// A single-interface fastboot device on bus 1 at `address`
    pub fn fastboot(address: u8) -> Self {
        Self {
            descriptor: DeviceDescriptor {
                bus_number: 1,
                address,
                vendor_id: 0x18d1,
                product_id: 0x4ee0,
                serial_number_index: None,
                interfaces: vec![fastboot_interface(512)],
            },
            serial: None,
            open_error: None,
            claim_error: None,
        }
    }

    /// A device whose only interface has a different signature
    pub fn with_signature(mut self, signature: InterfaceSignature) -> Self {
        for interface in &mut self.descriptor.interfaces {
            interface.signature = signature;
        }
        self
    }

    pub fn with_serial(mut self, serial: &str) -> Self {
        self.descriptor.serial_number_index = Some(3);
        self.serial = Some(serial.to_string());
        self
    }

    pub fn with_max_packet_size(mut self, max_packet_size: u16) -> Self {
        for interface in &mut self.descriptor.interfaces {
            for endpoint in &mut interface.endpoints {
                endpoint.max_packet_size = max_packet_size;
            }
        }
        self
    }

    /// Replace the endpoint list of every interface
    pub fn with_endpoints(mut self, endpoints: Vec<EndpointInfo>) -> Self {
        for interface in &mut self.descriptor.interfaces {
            interface.endpoints = endpoints.clone();
        }
        self
    }

    /// Add a second interface (e.g. a composite ADB + fastboot device)
    pub fn with_extra_interface(mut self) -> Self {
        let mut extra = fastboot_interface(512);
        extra.number = 1;
        self.descriptor.interfaces.push(extra);
        self
    }

    pub fn with_open_error(mut self, error: TransportError) -> Self {
        self.open_error = Some(error);
        self
    }

    pub fn with_claim_error(mut self, error: TransportError) -> Self {
        self.claim_error = Some(error);
        self
    }
}

/// Counters for every call the mock has seen
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockStats {
    pub enumerations: usize,
    pub opens: usize,
    pub claims: usize,
    pub releases: usize,
    pub closes: usize,
    pub writes: usize,
    pub reads: usize,
}

impl MockStats {
    /// Opened handles that have not been dropped yet
    pub fn open_handles(&self) -> usize {
        self.opens - self.closes
    }
}

#[derive(Debug, Default)]
struct MockState {
    devices: Vec<MockDevice>,
    stats: MockStats,
    written: Vec<Vec<u8>>,
    responses: VecDeque<Result<Vec<u8>, TransportError>>,
    write_error: Option<(usize, TransportError)>,
}

/// In-memory USB transport
///
/// Clones share state, so a test can keep one clone for inspection while the
/// worker thread owns another.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    // A panicking test thread must not hide the counters from the others
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockTransport {
    pub fn new(devices: Vec<MockDevice>) -> Self {
        let transport = Self::default();
        lock(&transport.state).devices = devices;
        transport
    }

    /// Replace the attached devices
    pub fn set_devices(&self, devices: Vec<MockDevice>) {
        lock(&self.state).devices = devices;
    }

    /// Queue the payload returned by the next bulk IN transfer
    pub fn push_response(&self, data: &[u8]) {
        lock(&self.state).responses.push_back(Ok(data.to_vec()));
    }

    /// Queue a failing bulk IN transfer
    pub fn push_read_error(&self, error: TransportError) {
        lock(&self.state).responses.push_back(Err(error));
    }

    /// Fail every bulk OUT transfer after `successful` have gone through
    pub fn fail_writes_after(&self, successful: usize, error: TransportError) {
        lock(&self.state).write_error = Some((successful, error));
    }

    pub fn stats(&self) -> MockStats {
        lock(&self.state).stats.clone()
    }

    /// Payload of every successful bulk OUT transfer, in order
    pub fn written(&self) -> Vec<Vec<u8>> {
        lock(&self.state).written.clone()
    }
}

impl UsbTransport for MockTransport {
    type Device = usize;
    type Handle = MockHandle;

    fn devices(&self) -> Result<Vec<usize>, TransportError> {
        let mut state = lock(&self.state);
        state.stats.enumerations += 1;
        Ok((0..state.devices.len()).collect())
    }

    fn describe(&self, device: &usize) -> Result<DeviceDescriptor, TransportError> {
        lock(&self.state)
            .devices
            .get(*device)
            .map(|d| d.descriptor.clone())
            .ok_or(TransportError::NoDevice)
    }

    fn open(&self, device: &usize) -> Result<MockHandle, TransportError> {
        let mut state = lock(&self.state);
        let mock = state
            .devices
            .get(*device)
            .cloned()
            .ok_or(TransportError::NoDevice)?;
        if let Some(error) = mock.open_error.clone() {
            return Err(error);
        }
        state.stats.opens += 1;

        Ok(MockHandle {
            device: mock,
            state: Arc::clone(&self.state),
            claimed: Vec::new(),
        })
    }
}

/// Opened mock device; dropping it counts as closing
#[derive(Debug)]
pub struct MockHandle {
    device: MockDevice,
    state: Arc<Mutex<MockState>>,
    claimed: Vec<u8>,
}

impl BulkHandle for MockHandle {
    fn read_string_ascii(&self, index: u8) -> Result<String, TransportError> {
        match (self.device.descriptor.serial_number_index, &self.device.serial) {
            (Some(serial_index), Some(serial)) if serial_index == index => Ok(serial.clone()),
            _ => Err(TransportError::Pipe),
        }
    }

    fn claim_interface(&mut self, number: u8) -> Result<(), TransportError> {
        if let Some(error) = self.device.claim_error.clone() {
            return Err(error);
        }
        lock(&self.state).stats.claims += 1;
        self.claimed.push(number);
        Ok(())
    }

    fn release_interface(&mut self, number: u8) -> Result<(), TransportError> {
        let position = self
            .claimed
            .iter()
            .position(|n| *n == number)
            .ok_or(TransportError::NotFound)?;
        self.claimed.remove(position);
        lock(&self.state).stats.releases += 1;
        Ok(())
    }

    fn write_bulk(
        &self,
        endpoint: u8,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize, TransportError> {
        assert_eq!(endpoint & 0x80, 0, "bulk write on an IN endpoint");
        let mut state = lock(&self.state);
        if let Some((successful, error)) = &state.write_error
            && state.stats.writes >= *successful
        {
            return Err(error.clone());
        }
        state.stats.writes += 1;
        state.written.push(data.to_vec());
        Ok(data.len())
    }

    fn read_bulk(
        &self,
        endpoint: u8,
        buffer: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, TransportError> {
        assert_ne!(endpoint & 0x80, 0, "bulk read on an OUT endpoint");
        let mut state = lock(&self.state);
        state.stats.reads += 1;
        let data = state
            .responses
            .pop_front()
            .unwrap_or(Err(TransportError::Timeout))?;
        let len = data.len().min(buffer.len());
        buffer[..len].copy_from_slice(&data[..len]);
        Ok(len)
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        lock(&self.state).stats.closes += 1;
    }
}

/// Run a future with a timeout
///
/// # Example
/// ```
/// use common::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await.unwrap();
/// assert_eq!(result, 42);
/// # });
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}
