//! Standard control request encoder
//!
//! Each function packs one USB 2.0 chapter 9 request into a ready-to-submit
//! [`Irp`]. Nothing here touches the host controller; invalid arguments are
//! rejected with a [`ValidationError`] before an IRP exists.
//!
//! Get requests are `DEVICE_TO_HOST`, set requests `HOST_TO_DEVICE`, and the
//! request kind is always `STANDARD`. Requests whose reply has a fixed size
//! (`GET_STATUS`, `GET_CONFIGURATION`, `GET_INTERFACE`, `SYNCH_FRAME`) refuse
//! short packets.

use crate::usb::irp::Irp;
use byteorder::{ByteOrder, LittleEndian};
use protocol::requests::{
    CLEAR_FEATURE, GET_CONFIGURATION, GET_DESCRIPTOR, GET_INTERFACE, GET_STATUS, SET_ADDRESS,
    SET_CONFIGURATION, SET_DESCRIPTOR, SET_FEATURE, SET_INTERFACE, SYNCH_FRAME,
};
use protocol::{Direction, Recipient, RequestKind, Result, ValidationError, request_type};

fn standard(direction: Direction, recipient: Recipient) -> Result<u8> {
    if recipient == Recipient::Other {
        return Err(ValidationError::InvalidRecipient(recipient.bits()));
    }
    Ok(request_type(direction, RequestKind::Standard, recipient))
}

/// wIndex for a feature/status request; a device recipient must target 0
fn target_index(request: u8, recipient: Recipient, target: u16) -> Result<u16> {
    if recipient == Recipient::Device && target != 0 {
        return Err(ValidationError::NonZeroDeviceTarget { request, target });
    }
    Ok(target)
}

fn descriptor_value(descriptor_type: u8, index: u8) -> u16 {
    (descriptor_type as u16) << 8 | index as u16
}

/// CLEAR_FEATURE
pub fn clear_feature(recipient: Recipient, feature: u16, target: u16) -> Result<Irp> {
    let request_type = standard(Direction::HostToDevice, recipient)?;
    let index = target_index(CLEAR_FEATURE, recipient, target)?;
    Irp::control(request_type, CLEAR_FEATURE, feature, index, Vec::new())
}

/// SET_FEATURE
pub fn set_feature(recipient: Recipient, feature: u16, target: u16) -> Result<Irp> {
    let request_type = standard(Direction::HostToDevice, recipient)?;
    let index = target_index(SET_FEATURE, recipient, target)?;
    Irp::control(request_type, SET_FEATURE, feature, index, Vec::new())
}

/// GET_STATUS, two-byte reply decoded with [`decode_status`]
pub fn get_status(recipient: Recipient, target: u16) -> Result<Irp> {
    let request_type = standard(Direction::DeviceToHost, recipient)?;
    let index = target_index(GET_STATUS, recipient, target)?;
    Ok(Irp::control(request_type, GET_STATUS, 0, index, vec![0; 2])?.with_short_packets(false))
}

/// SET_ADDRESS
pub fn set_address(address: u16) -> Result<Irp> {
    let request_type = standard(Direction::HostToDevice, Recipient::Device)?;
    Irp::control(request_type, SET_ADDRESS, address, 0, Vec::new())
}

/// GET_DESCRIPTOR reading up to `length` bytes
///
/// `wIndex` carries `langid` as given: the language id for string
/// descriptors, 0 for everything else.
pub fn get_descriptor(descriptor_type: u8, index: u8, langid: u16, length: usize) -> Result<Irp> {
    if length > u16::MAX as usize {
        return Err(ValidationError::LengthTooLarge(length));
    }
    let request_type = standard(Direction::DeviceToHost, Recipient::Device)?;
    Irp::control(
        request_type,
        GET_DESCRIPTOR,
        descriptor_value(descriptor_type, index),
        langid,
        vec![0; length],
    )
}

/// SET_DESCRIPTOR sending `data`
pub fn set_descriptor(descriptor_type: u8, index: u8, langid: u16, data: Vec<u8>) -> Result<Irp> {
    let request_type = standard(Direction::HostToDevice, Recipient::Device)?;
    Irp::control(
        request_type,
        SET_DESCRIPTOR,
        descriptor_value(descriptor_type, index),
        langid,
        data,
    )
}

/// GET_CONFIGURATION, one-byte reply
pub fn get_configuration() -> Result<Irp> {
    let request_type = standard(Direction::DeviceToHost, Recipient::Device)?;
    Ok(Irp::control(request_type, GET_CONFIGURATION, 0, 0, vec![0; 1])?.with_short_packets(false))
}

/// SET_CONFIGURATION
pub fn set_configuration(configuration: u16) -> Result<Irp> {
    let request_type = standard(Direction::HostToDevice, Recipient::Device)?;
    Irp::control(request_type, SET_CONFIGURATION, configuration, 0, Vec::new())
}

/// GET_INTERFACE, one-byte reply holding the alternate setting
pub fn get_interface(interface: u16) -> Result<Irp> {
    let request_type = standard(Direction::DeviceToHost, Recipient::Interface)?;
    Ok(
        Irp::control(request_type, GET_INTERFACE, 0, interface, vec![0; 1])?
            .with_short_packets(false),
    )
}

/// SET_INTERFACE
pub fn set_interface(interface: u16, alternate: u16) -> Result<Irp> {
    let request_type = standard(Direction::HostToDevice, Recipient::Interface)?;
    Irp::control(request_type, SET_INTERFACE, alternate, interface, Vec::new())
}

/// SYNCH_FRAME, two-byte frame number reply
pub fn synch_frame(endpoint: u16) -> Result<Irp> {
    let request_type = standard(Direction::DeviceToHost, Recipient::Endpoint)?;
    Ok(Irp::control(request_type, SYNCH_FRAME, 0, endpoint, vec![0; 2])?.with_short_packets(false))
}

/// Decode a little-endian 16-bit status or frame number reply
pub fn decode_status(data: &[u8]) -> Result<u16> {
    if data.len() < 2 {
        return Err(ValidationError::BufferTooSmall {
            needed: 2,
            available: data.len(),
        });
    }
    Ok(LittleEndian::read_u16(data))
}
