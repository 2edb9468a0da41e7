//! rusb-backed USB transport
//!
//! Wraps a `rusb::Context` (the process-wide libusb context) and exposes it
//! through the [`UsbTransport`] / [`BulkHandle`] capability traits.

use common::{
    BulkHandle, DeviceDescriptor, Direction, EndpointInfo, InterfaceInfo, InterfaceSignature,
    TransferKind, TransportError, UsbTransport,
};
use rusb::{Context, Device, DeviceHandle, UsbContext};
use std::time::Duration;
use tracing::{debug, warn};

/// USB transport over the system libusb
pub struct RusbTransport {
    context: Context,
}

impl RusbTransport {
    /// Create the libusb context
    ///
    /// Call once per process. The context is released when the transport is
    /// dropped.
    pub fn new() -> Result<Self, rusb::Error> {
        let context = Context::new()?;
        debug!("USB context created");
        Ok(Self { context })
    }
}

impl UsbTransport for RusbTransport {
    type Device = Device<Context>;
    type Handle = RusbHandle;

    fn devices(&self) -> Result<Vec<Device<Context>>, TransportError> {
        let list = self.context.devices().map_err(map_rusb_error)?;
        Ok(list.iter().collect())
    }

    fn describe(&self, device: &Device<Context>) -> Result<DeviceDescriptor, TransportError> {
        let descriptor = device.device_descriptor().map_err(map_rusb_error)?;
        let config = device
            .active_config_descriptor()
            .map_err(map_rusb_error)?;

        // Only the first alternate setting of each interface is considered
        let interfaces = config
            .interfaces()
            .filter_map(|interface| interface.descriptors().next())
            .map(|alt| InterfaceInfo {
                number: alt.interface_number(),
                signature: InterfaceSignature {
                    class: alt.class_code(),
                    subclass: alt.sub_class_code(),
                    protocol: alt.protocol_code(),
                },
                endpoints: alt
                    .endpoint_descriptors()
                    .map(|ep| EndpointInfo {
                        address: ep.address(),
                        direction: map_direction(ep.direction()),
                        kind: map_transfer_type(ep.transfer_type()),
                        max_packet_size: ep.max_packet_size(),
                    })
                    .collect(),
            })
            .collect();

        Ok(DeviceDescriptor {
            bus_number: device.bus_number(),
            address: device.address(),
            vendor_id: descriptor.vendor_id(),
            product_id: descriptor.product_id(),
            serial_number_index: descriptor.serial_number_string_index(),
            interfaces,
        })
    }

    fn open(&self, device: &Device<Context>) -> Result<RusbHandle, TransportError> {
        let handle = device.open().map_err(map_rusb_error)?;
        Ok(RusbHandle {
            handle,
            detached: DetachedDrivers::default(),
        })
    }
}

/// Interfaces whose kernel driver we detached and must hand back
#[derive(Debug, Default)]
struct DetachedDrivers {
    interfaces: Vec<u8>,
}

impl DetachedDrivers {
    fn record(&mut self, number: u8) {
        if !self.interfaces.contains(&number) {
            self.interfaces.push(number);
        }
    }

    /// Forget `number`, returning whether its driver needs reattaching
    fn take(&mut self, number: u8) -> bool {
        let before = self.interfaces.len();
        self.interfaces.retain(|&n| n != number);
        self.interfaces.len() != before
    }
}

/// Opened rusb device; dropping it closes the device
pub struct RusbHandle {
    handle: DeviceHandle<Context>,
    detached: DetachedDrivers,
}

impl BulkHandle for RusbHandle {
    fn read_string_ascii(&self, index: u8) -> Result<String, TransportError> {
        self.handle
            .read_string_descriptor_ascii(index)
            .map_err(map_rusb_error)
    }

    fn claim_interface(&mut self, number: u8) -> Result<(), TransportError> {
        match self.handle.kernel_driver_active(number) {
            Ok(true) => {
                debug!("Detaching kernel driver from interface {}", number);
                match self.handle.detach_kernel_driver(number) {
                    Ok(()) => self.detached.record(number),
                    // Claiming will most likely fail next and report the error
                    Err(e) => warn!(
                        "Failed to detach kernel driver from interface {}: {}",
                        number, e
                    ),
                }
            }
            Ok(false) => {}
            Err(e) => {
                debug!(
                    "Could not check kernel driver status for interface {}: {}",
                    number, e
                );
            }
        }

        self.handle
            .claim_interface(number)
            .map_err(map_rusb_error)
    }

    /// Release the interface and give it back to its kernel driver
    fn release_interface(&mut self, number: u8) -> Result<(), TransportError> {
        let released = self
            .handle
            .release_interface(number)
            .map_err(map_rusb_error);

        if self.detached.take(number) {
            match self.handle.attach_kernel_driver(number) {
                Ok(()) => debug!("Reattached kernel driver to interface {}", number),
                Err(e) => warn!(
                    "Failed to reattach kernel driver to interface {}: {}",
                    number, e
                ),
            }
        }

        released
    }

    fn write_bulk(
        &self,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        self.handle
            .write_bulk(endpoint, data, timeout)
            .map_err(map_rusb_error)
    }

    fn read_bulk(
        &self,
        endpoint: u8,
        buffer: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        self.handle
            .read_bulk(endpoint, buffer, timeout)
            .map_err(map_rusb_error)
    }
}

fn map_direction(direction: rusb::Direction) -> Direction {
    match direction {
        rusb::Direction::In => Direction::In,
        rusb::Direction::Out => Direction::Out,
    }
}

fn map_transfer_type(transfer_type: rusb::TransferType) -> TransferKind {
    match transfer_type {
        rusb::TransferType::Control => TransferKind::Control,
        rusb::TransferType::Isochronous => TransferKind::Isochronous,
        rusb::TransferType::Bulk => TransferKind::Bulk,
        rusb::TransferType::Interrupt => TransferKind::Interrupt,
    }
}

/// Map rusb::Error to TransportError
pub fn map_rusb_error(err: rusb::Error) -> TransportError {
    match err {
        rusb::Error::Timeout => TransportError::Timeout,
        rusb::Error::Pipe => TransportError::Pipe,
        rusb::Error::NoDevice => TransportError::NoDevice,
        rusb::Error::NotFound => TransportError::NotFound,
        rusb::Error::Busy => TransportError::Busy,
        rusb::Error::Access => TransportError::Access,
        rusb::Error::Overflow => TransportError::Overflow,
        rusb::Error::Io => TransportError::Io,
        _ => TransportError::Other(err.to_string()),
    }
}
