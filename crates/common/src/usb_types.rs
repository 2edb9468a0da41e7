//! USB capability boundary
//!
//! The bridge never talks to libusb directly. It is written against the
//! [`UsbTransport`] and [`BulkHandle`] traits defined here: enumerate devices,
//! read their descriptors, open one, claim/release an interface, move bytes
//! over bulk endpoints and read string descriptors. The production
//! implementation wraps rusb; tests use [`crate::test_utils::MockTransport`].

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Class/subclass/protocol triple of a USB interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterfaceSignature {
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
}

impl fmt::Display for InterfaceSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}/{:02x}/{:02x}",
            self.class, self.subclass, self.protocol
        )
    }
}

/// Interface signature of a device in fastboot mode
pub const FASTBOOT_SIGNATURE: InterfaceSignature = InterfaceSignature {
    class: 0xff,
    subclass: 0x42,
    protocol: 0x03,
};

/// Endpoint direction, as seen from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Device to host
    In,
    /// Host to device
    Out,
}

/// Endpoint transfer type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferKind {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

/// One endpoint of an interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointInfo {
    /// Endpoint address including the direction bit
    pub address: u8,
    pub direction: Direction,
    pub kind: TransferKind,
    pub max_packet_size: u16,
}

impl EndpointInfo {
    /// True for a bulk endpoint in the given direction
    pub fn is_bulk(&self, direction: Direction) -> bool {
        self.kind == TransferKind::Bulk && self.direction == direction
    }
}

/// One interface of the active configuration (first alternate setting)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub number: u8,
    pub signature: InterfaceSignature,
    pub endpoints: Vec<EndpointInfo>,
}

/// Discovery-time description of an attached device
///
/// Only used to decide whether a device matches; it is dropped once a
/// session has been established.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub bus_number: u8,
    pub address: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    /// String descriptor index of the serial number, if the device has one
    pub serial_number_index: Option<u8>,
    /// Interfaces of the active configuration
    pub interfaces: Vec<InterfaceInfo>,
}

/// Summary of an established session, for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInfo {
    pub bus_number: u8,
    pub address: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub endpoint_in: u8,
    pub endpoint_out: u8,
    pub max_packet_size: u16,
}

impl fmt::Display for SessionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} ({:04x}:{:04x}, in {:#04x}, out {:#04x}, max packet {})",
            self.bus_number,
            self.address,
            self.vendor_id,
            self.product_id,
            self.endpoint_in,
            self.endpoint_out,
            self.max_packet_size
        )
    }
}

/// Failure reported by the USB transport
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("operation timed out")]
    Timeout,
    #[error("endpoint stalled")]
    Pipe,
    #[error("device disconnected")]
    NoDevice,
    #[error("entity not found")]
    NotFound,
    #[error("resource busy")]
    Busy,
    #[error("access denied")]
    Access,
    #[error("overflow")]
    Overflow,
    #[error("input/output error")]
    Io,
    #[error("{0}")]
    Other(String),
}

/// USB-side failures of the bridge
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsbError {
    /// No attached device matched
    #[error("No appropriate USB device found")]
    NoDevice,

    /// More than one attached device matched; the caller must not guess
    #[error("Found {count} matching USB devices")]
    Ambiguous { count: usize },

    /// The device list could not be read
    #[error("Enumerating USB devices failed: {0}")]
    Enumerate(TransportError),

    /// The matched device could not be opened
    #[error("Open device failed: {0}")]
    Open(TransportError),

    /// The matched device was opened but interface 0 could not be claimed
    #[error("Claim interface failed: {0}")]
    Claim(TransportError),

    /// A bulk OUT transfer failed
    #[error("Write failed on chunk {chunk} of {chunks}: {source}")]
    Write {
        chunk: usize,
        chunks: usize,
        #[source]
        source: TransportError,
    },

    /// The bulk IN transfer failed
    #[error("Read failed: {0}")]
    Read(TransportError),

    /// A session is already open
    #[error("A USB session is already active")]
    SessionActive,

    /// No session is open
    #[error("No USB session is active")]
    NoSession,
}

/// Device enumeration and opening
///
/// One value of this type stands for the process-wide USB context. It is
/// created once at startup and moved into the USB worker thread, which drops
/// it at shutdown.
pub trait UsbTransport: Send + 'static {
    /// An enumerated, not yet opened device
    type Device;
    /// An opened device
    type Handle: BulkHandle;

    /// List the currently attached devices
    fn devices(&self) -> Result<Vec<Self::Device>, TransportError>;

    /// Read the device, configuration and interface descriptors
    fn describe(&self, device: &Self::Device) -> Result<DeviceDescriptor, TransportError>;

    /// Open a device
    fn open(&self, device: &Self::Device) -> Result<Self::Handle, TransportError>;
}

/// Operations on an opened device
///
/// Dropping the handle closes the device.
pub trait BulkHandle {
    /// Read a string descriptor as ASCII
    fn read_string_ascii(&self, index: u8) -> Result<String, TransportError>;

    fn claim_interface(&mut self, number: u8) -> Result<(), TransportError>;

    fn release_interface(&mut self, number: u8) -> Result<(), TransportError>;

    /// One blocking bulk OUT transfer
    fn write_bulk(
        &self,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError>;

    /// One blocking bulk IN transfer
    fn read_bulk(
        &self,
        endpoint: u8,
        buffer: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError>;
}
