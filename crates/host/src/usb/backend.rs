//! libusb host controller
//!
//! [`RusbHostController`] implements [`HostController`] on top of `rusb`.
//! Device handles are kept per bus/address while open and shared by the pipe
//! workers of that device without further locking. Transfers use the
//! synchronous libusb API, so they run to completion or to their timeout on
//! the calling pipe worker.

use common::{DeviceRecord, EnumerationError, HostController};
use protocol::{
    DeviceDescriptor, DeviceIdentity, DeviceKey, DeviceSpeed, Direction, EndpointKind,
    SetupPacket, TransportError,
};
use rusb::{Context, DeviceHandle, UsbContext};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

type Handle = Arc<DeviceHandle<Context>>;

/// Host controller backed by libusb
pub struct RusbHostController {
    context: Context,
    handles: Mutex<HashMap<DeviceKey, Handle>>,
}

impl RusbHostController {
    pub fn new() -> Result<Self, TransportError> {
        let context = Context::new().map_err(map_rusb_error)?;
        Ok(Self {
            context,
            handles: Mutex::new(HashMap::new()),
        })
    }

    fn handles(&self) -> MutexGuard<'_, HashMap<DeviceKey, Handle>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle(&self, device: DeviceKey) -> Result<Handle, TransportError> {
        self.handles()
            .get(&device)
            .cloned()
            .ok_or(TransportError::InvalidParam)
    }

    fn find(&self, device: DeviceKey) -> Result<rusb::Device<Context>, TransportError> {
        self.context
            .devices()
            .map_err(map_rusb_error)?
            .iter()
            .find(|d| device_key(d) == device)
            .ok_or(TransportError::NoDevice)
    }
}

fn device_key(device: &rusb::Device<Context>) -> DeviceKey {
    DeviceKey::new(device.bus_number(), device.address())
}

fn record_for(device: &rusb::Device<Context>) -> Result<DeviceRecord, EnumerationError> {
    let descriptor = device
        .device_descriptor()
        .map_err(|e| EnumerationError {
            device: device_key(device),
            error: map_rusb_error(e),
        })?;

    Ok(DeviceRecord {
        identity: DeviceIdentity::new(
            device.bus_number(),
            device.port_number(),
            device.address(),
            convert_descriptor(&descriptor),
        ),
        parent: device.get_parent().map(|p| device_key(&p)),
        speed: map_device_speed(device.speed()),
    })
}

fn version_to_bcd(version: rusb::Version) -> u16 {
    let major = version.major() as u16;
    ((major / 10) << 12)
        | ((major % 10) << 8)
        | ((version.minor() as u16 & 0x0f) << 4)
        | (version.sub_minor() as u16 & 0x0f)
}

fn convert_descriptor(descriptor: &rusb::DeviceDescriptor) -> DeviceDescriptor {
    DeviceDescriptor {
        usb_version: version_to_bcd(descriptor.usb_version()),
        device_class: descriptor.class_code(),
        device_subclass: descriptor.sub_class_code(),
        device_protocol: descriptor.protocol_code(),
        max_packet_size0: descriptor.max_packet_size(),
        vendor_id: descriptor.vendor_id(),
        product_id: descriptor.product_id(),
        device_version: version_to_bcd(descriptor.device_version()),
        manufacturer_index: descriptor.manufacturer_string_index().unwrap_or(0),
        product_index: descriptor.product_string_index().unwrap_or(0),
        serial_number_index: descriptor.serial_number_string_index().unwrap_or(0),
        num_configurations: descriptor.num_configurations(),
    }
}

impl HostController for RusbHostController {
    fn enumerate(&self) -> Result<Vec<Result<DeviceRecord, EnumerationError>>, TransportError> {
        let devices = self.context.devices().map_err(map_rusb_error)?;
        Ok(devices.iter().map(|d| record_for(&d)).collect())
    }

    fn open(&self, device: DeviceKey) -> Result<(), TransportError> {
        if self.handles().contains_key(&device) {
            return Ok(());
        }

        let handle = self.find(device)?.open().map_err(|e| {
            warn!("Failed to open device {}: {}", device, e);
            map_rusb_error(e)
        })?;

        if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
            debug!("Kernel driver auto-detach unavailable for {}: {}", device, e);
        }

        self.handles()
            .insert(device, Arc::new(handle));
        debug!("Opened device {}", device);
        Ok(())
    }

    fn close(&self, device: DeviceKey) {
        if self.handles().remove(&device).is_some() {
            debug!("Closed device {}", device);
        }
    }

    fn control_transfer(
        &self,
        device: DeviceKey,
        setup: SetupPacket,
        data: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        let handle = self.handle(device)?;

        debug!(
            "Control transfer: request_type={:#x}, request={:#x}, value={:#x}, index={:#x}, data_len={}",
            setup.request_type,
            setup.request,
            setup.value,
            setup.index,
            data.len()
        );

        let result = match setup.direction() {
            Direction::DeviceToHost => handle.read_control(
                setup.request_type,
                setup.request,
                setup.value,
                setup.index,
                data,
                timeout,
            ),
            Direction::HostToDevice => handle.write_control(
                setup.request_type,
                setup.request,
                setup.value,
                setup.index,
                data,
                timeout,
            ),
        };

        result.map_err(|e| {
            warn!("Control transfer on {} failed: {}", device, e);
            map_rusb_error(e)
        })
    }

    fn data_transfer(
        &self,
        device: DeviceKey,
        endpoint: u8,
        kind: EndpointKind,
        data: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        let handle = self.handle(device)?;

        debug!(
            "{:?} transfer: endpoint={:#x}, data_len={}, timeout={}ms",
            kind,
            endpoint,
            data.len(),
            timeout.as_millis()
        );

        let result = match (kind, Direction::of_endpoint(endpoint)) {
            (EndpointKind::Bulk, Direction::DeviceToHost) => {
                handle.read_bulk(endpoint, data, timeout)
            }
            (EndpointKind::Bulk, Direction::HostToDevice) => {
                handle.write_bulk(endpoint, data, timeout)
            }
            (EndpointKind::Interrupt, Direction::DeviceToHost) => {
                handle.read_interrupt(endpoint, data, timeout)
            }
            (EndpointKind::Interrupt, Direction::HostToDevice) => {
                handle.write_interrupt(endpoint, data, timeout)
            }
            (EndpointKind::Control, _) => return Err(TransportError::InvalidParam),
        };

        result.map_err(|e| {
            debug!("{:?} transfer on {} ep {:#04x} failed: {}", kind, device, endpoint, e);
            map_rusb_error(e)
        })
    }

    fn cancel(&self, device: DeviceKey, endpoint: u8) {
        // Synchronous libusb transfers cannot be cancelled individually.
        debug!(
            "Cancel requested on {} ep {:#04x}; transfer runs until its timeout",
            device, endpoint
        );
    }

    fn claim_interface(&self, device: DeviceKey, interface: u8) -> Result<(), TransportError> {
        let handle = self.handle(device)?;
        handle.claim_interface(interface).map_err(|e| {
            warn!("Failed to claim interface {} on {}: {}", interface, device, e);
            map_rusb_error(e)
        })
    }

    fn release_interface(&self, device: DeviceKey, interface: u8) -> Result<(), TransportError> {
        let handle = self.handle(device)?;
        handle.release_interface(interface).map_err(map_rusb_error)
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
        rusb::Error::Overflow => TransportError::Overflow,
        rusb::Error::Io => TransportError::Io,
        rusb::Error::InvalidParam => TransportError::InvalidParam,
        rusb::Error::Access => TransportError::Access,
        rusb::Error::Interrupted => TransportError::Cancelled,
        _ => TransportError::Other {
            message: err.to_string(),
        },
    }
}

/// Map rusb device speed to DeviceSpeed
fn map_device_speed(speed: rusb::Speed) -> DeviceSpeed {
    match speed {
        rusb::Speed::Low => DeviceSpeed::Low,
        rusb::Speed::Full => DeviceSpeed::Full,
        rusb::Speed::High => DeviceSpeed::High,
        rusb::Speed::Super => DeviceSpeed::Super,
        rusb::Speed::SuperPlus => DeviceSpeed::SuperPlus,
        _ => DeviceSpeed::Unknown,
    }
}
