//! Host-controller interface
//!
//! The core never talks to hardware directly. Enumeration, device handles,
//! transfers and interface claims all go through [`HostController`], which a
//! backend (libusb via rusb, or the mock in [`crate::test_utils`]) implements.
//!
//! Every method is synchronous and may block; callers run them on worker
//! threads, never on an async runtime.

use protocol::{
    DeviceIdentity, DeviceKey, DeviceSpeed, EndpointKind, SetupPacket, TransportError,
};
use std::time::Duration;
use thiserror::Error;

/// One entry of the flat device list reported by the host controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    /// Location and descriptor
    pub identity: DeviceIdentity,
    /// Upstream hub, `None` for bus root hubs
    pub parent: Option<DeviceKey>,
    /// Negotiated speed
    pub speed: DeviceSpeed,
}

impl DeviceRecord {
    pub fn key(&self) -> DeviceKey {
        self.identity.key()
    }
}

/// A single device that could not be enumerated
///
/// The rest of the list is still usable; the device is treated as absent for
/// this enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Failed to enumerate device {device}: {error}")]
pub struct EnumerationError {
    pub device: DeviceKey,
    pub error: TransportError,
}

/// Host-controller driver seen by the core
pub trait HostController: Send + Sync {
    /// Report every attached device with its parent linkage
    ///
    /// The outer error means the list itself could not be obtained.
    fn enumerate(&self) -> Result<Vec<Result<DeviceRecord, EnumerationError>>, TransportError>;

    /// Open a handle to the device
    fn open(&self, device: DeviceKey) -> Result<(), TransportError>;

    /// Close the handle; closing an unopened device is a no-op
    fn close(&self, device: DeviceKey);

    /// Run one control transfer on endpoint 0
    ///
    /// `data` is the data stage: filled for IN requests, sent for OUT
    /// requests. Returns the number of bytes transferred.
    fn control_transfer(
        &self,
        device: DeviceKey,
        setup: SetupPacket,
        data: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError>;

    /// Run one bulk or interrupt transfer on a non-default endpoint
    fn data_transfer(
        &self,
        device: DeviceKey,
        endpoint: u8,
        kind: EndpointKind,
        data: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError>;

    /// Ask the driver to abort the transfer in flight on `endpoint`
    fn cancel(&self, device: DeviceKey, endpoint: u8);

    fn claim_interface(&self, device: DeviceKey, interface: u8) -> Result<(), TransportError>;

    fn release_interface(&self, device: DeviceKey, interface: u8) -> Result<(), TransportError>;
}

