//! USB wire-level types for the usb-host core
//!
//! This crate defines the values exchanged with a USB host controller: the
//! 8-byte Setup packet of a control transfer, the standard request, descriptor
//! and feature codes, the standard device descriptor, device identities and the
//! error values that describe why a request was rejected or a transfer failed.
//!
//! Nothing in here performs I/O.
//!
//! # Example
//!
//! ```
//! use protocol::{Direction, Recipient, RequestKind, SetupPacket, request_type};
//! use protocol::requests::GET_DESCRIPTOR;
//!
//! let setup = SetupPacket {
//!     request_type: request_type(Direction::DeviceToHost, RequestKind::Standard, Recipient::Device),
//!     request: GET_DESCRIPTOR,
//!     value: 0x0100,
//!     index: 0,
//!     length: 18,
//! };
//!
//! let bytes = setup.to_bytes();
//! assert_eq!(bytes, [0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x12, 0x00]);
//! assert_eq!(SetupPacket::parse(&bytes).unwrap(), setup);
//! ```

pub mod descriptor;
pub mod error;
pub mod requests;
pub mod setup;
pub mod types;

pub use descriptor::{DEVICE_DESCRIPTOR_LEN, DeviceDescriptor};
pub use error::{ClaimError, Result, TransportError, ValidationError};
pub use setup::{SETUP_PACKET_LEN, SetupPacket};
pub use types::{
    DeviceIdentity, DeviceKey, DeviceKind, DeviceSpeed, Direction, EndpointKind, Recipient,
    RequestKind, request_type,
};
