//! USB device locator
//!
//! Scans the attached devices for exactly one device in fastboot mode:
//!
//! 1. its active configuration has exactly one interface,
//! 2. that interface's class/subclass/protocol is ff/42/03,
//! 3. it has a bulk endpoint in each direction,
//! 4. its serial number equals the requested one, if any.
//!
//! Zero and several matches are distinct failures; the locator never
//! guesses between candidates.

use crate::usb::session::UsbSession;
use common::{
    BulkHandle, DeviceDescriptor, Direction, EndpointInfo, FASTBOOT_SIGNATURE, UsbError,
    UsbTransport,
};
use std::time::Duration;
use tracing::{debug, info};

/// A device that passed every filter
pub struct Candidate<D> {
    pub device: D,
    pub descriptor: DeviceDescriptor,
    pub endpoint_in: EndpointInfo,
    pub endpoint_out: EndpointInfo,
}

/// Bulk IN/OUT endpoints of a device exposing the fastboot interface
///
/// Returns `None` for multi-interface devices, a foreign interface
/// signature, or a missing bulk endpoint in either direction. When a
/// direction has several bulk endpoints, the last one listed is used.
pub fn bulk_endpoints(descriptor: &DeviceDescriptor) -> Option<(EndpointInfo, EndpointInfo)> {
    let [interface] = descriptor.interfaces.as_slice() else {
        return None;
    };

    if interface.signature != FASTBOOT_SIGNATURE {
        return None;
    }

    let endpoint_in = interface
        .endpoints
        .iter()
        .rev()
        .find(|ep| ep.is_bulk(Direction::In))?;
    let endpoint_out = interface
        .endpoints
        .iter()
        .rev()
        .find(|ep| ep.is_bulk(Direction::Out))?;

    Some((*endpoint_in, *endpoint_out))
}

/// Open the device just long enough to compare its serial number
///
/// Devices that cannot be opened, have no serial descriptor or fail to
/// return it never match.
fn serial_matches<T: UsbTransport>(
    transport: &T,
    device: &T::Device,
    descriptor: &DeviceDescriptor,
    wanted: &str,
) -> bool {
    let Some(index) = descriptor.serial_number_index else {
        debug!(
            "Device {}:{} has no serial number",
            descriptor.bus_number, descriptor.address
        );
        return false;
    };

    let handle = match transport.open(device) {
        Ok(handle) => handle,
        Err(e) => {
            debug!(
                "Skipping device {}:{}, open failed: {}",
                descriptor.bus_number, descriptor.address, e
            );
            return false;
        }
    };

    match handle.read_string_ascii(index) {
        Ok(serial) => serial == wanted,
        Err(e) => {
            debug!(
                "Skipping device {}:{}, reading serial failed: {}",
                descriptor.bus_number, descriptor.address, e
            );
            false
        }
    }
}

/// Find the single attached device matching the fastboot filters
pub fn find_device<T: UsbTransport>(
    transport: &T,
    serial: Option<&str>,
) -> Result<Candidate<T::Device>, UsbError> {
    let devices = transport.devices().map_err(UsbError::Enumerate)?;
    let mut matches = Vec::new();

    for device in devices {
        let descriptor = match transport.describe(&device) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                debug!("Failed getting device descriptors: {}", e);
                continue;
            }
        };

        let Some((endpoint_in, endpoint_out)) = bulk_endpoints(&descriptor) else {
            continue;
        };

        info!(
            "Found device {}:{}, vendor: {:04x}, product: {:04x}",
            descriptor.bus_number, descriptor.address, descriptor.vendor_id, descriptor.product_id
        );

        if let Some(wanted) = serial
            && !serial_matches(transport, &device, &descriptor, wanted)
        {
            continue;
        }

        matches.push(Candidate {
            device,
            descriptor,
            endpoint_in,
            endpoint_out,
        });
    }

    match matches.len() {
        0 => Err(UsbError::NoDevice),
        1 => matches.pop().ok_or(UsbError::NoDevice),
        count => Err(UsbError::Ambiguous { count }),
    }
}

/// Find the device, open it and claim its interface
pub fn locate<T: UsbTransport>(
    transport: &T,
    serial: Option<&str>,
    timeout: Duration,
) -> Result<UsbSession<T::Handle>, UsbError> {
    let candidate = find_device(transport, serial)?;
    UsbSession::open(transport, candidate, timeout)
}
