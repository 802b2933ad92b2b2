//! Control transfer Setup packet
//!
//! The Setup stage of every control transfer carries exactly eight bytes
//! (USB 2.0 §9.3):
//!
//! ```text
//! [bmRequestType: u8][bRequest: u8][wValue: u16 LE][wIndex: u16 LE][wLength: u16 LE]
//! ```

use crate::error::{Result, ValidationError};
use crate::types::{Direction, Recipient, RequestKind};
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

/// Size of a Setup packet on the wire
pub const SETUP_PACKET_LEN: usize = 8;

/// Decoded Setup packet fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SetupPacket {
    /// bmRequestType
    pub request_type: u8,
    /// bRequest
    pub request: u8,
    /// wValue
    pub value: u16,
    /// wIndex
    pub index: u16,
    /// wLength
    pub length: u16,
}

impl SetupPacket {
    /// Serialize to the 8-byte wire form
    pub fn to_bytes(&self) -> [u8; SETUP_PACKET_LEN] {
        let mut bytes = [0u8; SETUP_PACKET_LEN];
        bytes[0] = self.request_type;
        bytes[1] = self.request;
        LittleEndian::write_u16(&mut bytes[2..4], self.value);
        LittleEndian::write_u16(&mut bytes[4..6], self.index);
        LittleEndian::write_u16(&mut bytes[6..8], self.length);
        bytes
    }

    /// Parse the first eight bytes of `bytes`
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < SETUP_PACKET_LEN {
            return Err(ValidationError::BufferTooSmall {
                needed: SETUP_PACKET_LEN,
                available: bytes.len(),
            });
        }

        Ok(Self {
            request_type: bytes[0],
            request: bytes[1],
            value: LittleEndian::read_u16(&bytes[2..4]),
            index: LittleEndian::read_u16(&bytes[4..6]),
            length: LittleEndian::read_u16(&bytes[6..8]),
        })
    }

    pub fn direction(&self) -> Direction {
        Direction::from_bits(self.request_type)
    }

    pub fn kind(&self) -> RequestKind {
        RequestKind::from_bits(self.request_type)
    }

    pub fn recipient(&self) -> Result<Recipient> {
        Recipient::try_from(self.request_type)
    }
}
