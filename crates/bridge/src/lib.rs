//! TCP to USB bridge for devices in fastboot mode
//!
//! Accepts one TCP client at a time, performs the `FB01` handshake and relays
//! length-prefixed frames to the bulk endpoints of the single attached
//! fastboot device.

pub mod config;
pub mod network;
pub mod usb;
