//! Error type returned by device and pipe operations

use protocol::{ClaimError, DeviceKey, TransportError, ValidationError};
use thiserror::Error;

/// Any failure surfaced by the usb-host core
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsbError {
    /// Request rejected before it reached the host controller
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Host controller reported a transfer failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Interface claim bookkeeping failed
    #[error(transparent)]
    Claim(#[from] ClaimError),

    /// Device is no longer attached
    #[error("Device {0} is disconnected")]
    Disconnected(DeviceKey),

    /// Operation has no meaning for this device
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    /// Pipe was closed before the IRP could be queued
    #[error("Pipe for endpoint {0:#04x} is closed")]
    PipeClosed(u8),

    /// Worker thread could not be started
    #[error("Failed to spawn worker thread: {0}")]
    Thread(String),
}

impl UsbError {
    /// Transport failure carried by this error, if any
    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            UsbError::Transport(e) => Some(e),
            _ => None,
        }
    }
}

/// Type alias for core results
pub type Result<T> = std::result::Result<T, UsbError>;
