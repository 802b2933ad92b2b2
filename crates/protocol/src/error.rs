//! Request and transfer error types

use crate::types::DeviceKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A request that was rejected before reaching the host controller
///
/// Validation errors are raised synchronously by request construction and
/// submission; the host controller never sees the offending request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Recipient is not one of device, interface or endpoint
    #[error("Invalid recipient: {0:#04x}")]
    InvalidRecipient(u8),

    /// Device-recipient feature/status requests must target 0
    #[error("Request {request:#04x} to a device recipient requires target 0, got {target}")]
    NonZeroDeviceTarget { request: u8, target: u16 },

    /// Data window does not fit in the buffer
    #[error("Data window out of range: offset {offset} + length {length} exceeds capacity {capacity}")]
    BufferRange {
        offset: usize,
        length: usize,
        capacity: usize,
    },

    /// Control data stage longer than wLength can express
    #[error("Control data length {0} exceeds 65535")]
    LengthTooLarge(usize),

    /// Not enough bytes to parse a structure
    #[error("Buffer too small: needed {needed}, got {available}")]
    BufferTooSmall { needed: usize, available: usize },

    /// Descriptor bytes carry the wrong bDescriptorType
    #[error("Unexpected descriptor type {found:#04x} (expected {expected:#04x})")]
    DescriptorType { expected: u8, found: u8 },

    /// The IRP has already been handed to a pipe
    #[error("IRP has already been submitted")]
    AlreadySubmitted,

    /// Control IRP on a data pipe, or data-only IRP on the control pipe
    #[error("IRP does not match endpoint {endpoint:#04x}: {reason}")]
    EndpointMismatch { endpoint: u8, reason: &'static str },

    /// Pipe handed to a device it does not belong to
    #[error("Pipe of device {pipe} used with device {device}")]
    ForeignPipe { pipe: DeviceKey, device: DeviceKey },
}

/// Failure reported by the host controller for a transfer
///
/// Maps to libusb error codes, plus the failures the transfer queue itself
/// assigns (cancellation and short packets).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum TransportError {
    /// Transfer timed out
    #[error("Transfer timed out")]
    Timeout,
    /// Endpoint stalled (protocol error)
    #[error("Endpoint stalled")]
    Pipe,
    /// Device was disconnected
    #[error("Device disconnected")]
    NoDevice,
    /// Device or endpoint not found
    #[error("Device or endpoint not found")]
    NotFound,
    /// Device is busy
    #[error("Device busy")]
    Busy,
    /// Device returned more data than requested
    #[error("Buffer overflow")]
    Overflow,
    /// I/O error
    #[error("I/O error")]
    Io,
    /// Invalid parameter
    #[error("Invalid parameter")]
    InvalidParam,
    /// Access denied (permissions)
    #[error("Access denied")]
    Access,
    /// Transfer aborted before or during dispatch
    #[error("Transfer cancelled")]
    Cancelled,
    /// Exact-length transfer returned fewer bytes than requested
    #[error("Short packet: expected {expected} bytes, got {actual}")]
    ShortPacket { expected: usize, actual: usize },
    /// Other error with message
    #[error("{message}")]
    Other { message: String },
}

/// Interface claim bookkeeping error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum ClaimError {
    /// Interface is already claimed on this device
    #[error("Interface {0} is already claimed")]
    AlreadyClaimed(u8),
    /// Interface was released without being claimed
    #[error("Interface {0} is not claimed")]
    NotClaimed(u8),
}

/// Type alias for validation results
pub type Result<T> = std::result::Result<T, ValidationError>;
