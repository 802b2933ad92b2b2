//! USB identity and request-type definitions
//!
//! This module defines how devices are identified on the host (bus and
//! address), the device speed, and the three fields packed into
//! `bmRequestType`: direction, request kind and recipient.

use crate::descriptor::DeviceDescriptor;
use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Registry key of a device: bus number plus address on that bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceKey {
    /// Bus number on the host
    pub bus: u8,
    /// Device address on the bus
    pub address: u8,
}

impl DeviceKey {
    pub const fn new(bus: u8, address: u8) -> Self {
        Self { bus, address }
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.bus, self.address)
    }
}

/// Where a device sits on the host, plus its static descriptor
///
/// Two identities are equal when bus number and address match; the port
/// number and descriptor are carried along but do not take part in equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Bus number on the host
    pub bus_number: u8,
    /// Physical port on the parent hub (0 for bus root hubs)
    pub port_number: u8,
    /// Device address on the bus
    pub address: u8,
    /// Standard device descriptor
    pub descriptor: DeviceDescriptor,
}

impl DeviceIdentity {
    pub fn new(bus_number: u8, port_number: u8, address: u8, descriptor: DeviceDescriptor) -> Self {
        Self {
            bus_number,
            port_number,
            address,
            descriptor,
        }
    }

    /// Registry key for this identity
    pub fn key(&self) -> DeviceKey {
        DeviceKey::new(self.bus_number, self.address)
    }
}

impl PartialEq for DeviceIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for DeviceIdentity {}

impl Hash for DeviceIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{:04x}:{:04x}]",
            self.key(),
            self.descriptor.vendor_id,
            self.descriptor.product_id
        )
    }
}

/// USB device speed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DeviceSpeed {
    /// Speed not reported by the host controller
    #[default]
    Unknown,
    /// Low speed - 1.5 Mbps (USB 1.0)
    Low,
    /// Full speed - 12 Mbps (USB 1.1)
    Full,
    /// High speed - 480 Mbps (USB 2.0)
    High,
    /// SuperSpeed - 5 Gbps (USB 3.0)
    Super,
    /// SuperSpeed+ - 10 Gbps (USB 3.1)
    SuperPlus,
}

/// Data stage direction (bit 7 of bmRequestType)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    HostToDevice,
    DeviceToHost,
}

impl Direction {
    pub const MASK: u8 = 0x80;

    pub const fn bits(self) -> u8 {
        match self {
            Direction::HostToDevice => 0x00,
            Direction::DeviceToHost => 0x80,
        }
    }

    pub const fn from_bits(request_type: u8) -> Self {
        if request_type & Self::MASK != 0 {
            Direction::DeviceToHost
        } else {
            Direction::HostToDevice
        }
    }

    /// Direction of an endpoint address (IN endpoints have bit 7 set)
    pub const fn of_endpoint(endpoint: u8) -> Self {
        Self::from_bits(endpoint)
    }
}

/// Request type (bits 5..6 of bmRequestType)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestKind {
    Standard,
    Class,
    Vendor,
    Reserved,
}

impl RequestKind {
    pub const MASK: u8 = 0x60;

    pub const fn bits(self) -> u8 {
        match self {
            RequestKind::Standard => 0x00,
            RequestKind::Class => 0x20,
            RequestKind::Vendor => 0x40,
            RequestKind::Reserved => 0x60,
        }
    }

    pub const fn from_bits(request_type: u8) -> Self {
        match request_type & Self::MASK {
            0x00 => RequestKind::Standard,
            0x20 => RequestKind::Class,
            0x40 => RequestKind::Vendor,
            _ => RequestKind::Reserved,
        }
    }
}

/// Request recipient (bits 0..4 of bmRequestType)
///
/// `Other` is defined by USB 2.0 but is not a valid target for the standard
/// requests; the request builders reject it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Recipient {
    Device,
    Interface,
    Endpoint,
    Other,
}

impl Recipient {
    pub const MASK: u8 = 0x1f;

    pub const fn bits(self) -> u8 {
        match self {
            Recipient::Device => 0x00,
            Recipient::Interface => 0x01,
            Recipient::Endpoint => 0x02,
            Recipient::Other => 0x03,
        }
    }
}

impl TryFrom<u8> for Recipient {
    type Error = ValidationError;

    /// Decode the recipient bits of a bmRequestType value
    fn try_from(request_type: u8) -> Result<Self, Self::Error> {
        match request_type & Self::MASK {
            0x00 => Ok(Recipient::Device),
            0x01 => Ok(Recipient::Interface),
            0x02 => Ok(Recipient::Endpoint),
            0x03 => Ok(Recipient::Other),
            bits => Err(ValidationError::InvalidRecipient(bits)),
        }
    }
}

/// Compose a bmRequestType byte
pub const fn request_type(direction: Direction, kind: RequestKind, recipient: Recipient) -> u8 {
    direction.bits() | kind.bits() | recipient.bits()
}

/// Role of a node in the hub/port tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    /// Function device without downstream ports
    Device,
    /// External or bus root hub with downstream ports
    Hub,
    /// Synthetic top of the tree; one per topology
    RootHub,
}

impl DeviceKind {
    /// Classify an enumerated device by its class code
    pub fn classify(descriptor: &DeviceDescriptor) -> Self {
        if descriptor.is_hub() {
            DeviceKind::Hub
        } else {
            DeviceKind::Device
        }
    }

    /// Whether the node owns downstream ports
    pub fn has_ports(self) -> bool {
        matches!(self, DeviceKind::Hub | DeviceKind::RootHub)
    }
}

/// Transfer type of a non-default endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndpointKind {
    Control,
    Bulk,
    Interrupt,
}
