//! Common utilities for usb-host
//!
//! This crate provides the seams shared by the core and its backends: the
//! host-controller interface, topology event fan-out, error handling,
//! logging setup and the test doubles used across crates.

pub mod channel;
pub mod error;
pub mod host;
pub mod logging;
pub mod test_utils;

pub use channel::{Subscribers, TopologyEvent};
pub use error::{Error, Result};
pub use host::{DeviceRecord, EnumerationError, HostController};
pub use logging::{LogFormat, setup_logging, setup_logging_with};
