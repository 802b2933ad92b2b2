//! Standard device descriptor

use crate::error::{Result, ValidationError};
use crate::requests::{CLASS_HUB, DESCRIPTOR_DEVICE};
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

/// Length of a standard device descriptor
pub const DEVICE_DESCRIPTOR_LEN: usize = 18;

/// Standard device descriptor as read from the device
///
/// String indices of 0 mean "no string".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// bcdUSB
    pub usb_version: u16,
    /// bDeviceClass
    pub device_class: u8,
    /// bDeviceSubClass
    pub device_subclass: u8,
    /// bDeviceProtocol
    pub device_protocol: u8,
    /// bMaxPacketSize0
    pub max_packet_size0: u8,
    /// idVendor
    pub vendor_id: u16,
    /// idProduct
    pub product_id: u16,
    /// bcdDevice
    pub device_version: u16,
    /// iManufacturer
    pub manufacturer_index: u8,
    /// iProduct
    pub product_index: u8,
    /// iSerialNumber
    pub serial_number_index: u8,
    /// bNumConfigurations
    pub num_configurations: u8,
}

impl DeviceDescriptor {
    /// Parse the raw descriptor returned by GET_DESCRIPTOR(DEVICE)
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < DEVICE_DESCRIPTOR_LEN {
            return Err(ValidationError::BufferTooSmall {
                needed: DEVICE_DESCRIPTOR_LEN,
                available: bytes.len(),
            });
        }
        if bytes[1] != DESCRIPTOR_DEVICE {
            return Err(ValidationError::DescriptorType {
                expected: DESCRIPTOR_DEVICE,
                found: bytes[1],
            });
        }

        Ok(Self {
            usb_version: LittleEndian::read_u16(&bytes[2..4]),
            device_class: bytes[4],
            device_subclass: bytes[5],
            device_protocol: bytes[6],
            max_packet_size0: bytes[7],
            vendor_id: LittleEndian::read_u16(&bytes[8..10]),
            product_id: LittleEndian::read_u16(&bytes[10..12]),
            device_version: LittleEndian::read_u16(&bytes[12..14]),
            manufacturer_index: bytes[14],
            product_index: bytes[15],
            serial_number_index: bytes[16],
            num_configurations: bytes[17],
        })
    }

    /// Whether the device class code marks a hub
    pub fn is_hub(&self) -> bool {
        self.device_class == CLASS_HUB
    }
}
