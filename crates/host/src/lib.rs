//! usb-host core
//!
//! Host-independent USB device discovery and control transfers. The
//! [`usb::UsbServices`] facade keeps a hub/port tree in sync with a
//! [`common::HostController`], announces attach and detach events, and hands
//! out [`usb::Device`] handles whose pipes carry [`usb::Irp`]s.
//!
//! # Example
//!
//! ```
//! use common::test_utils::{MockHostController, create_mock_device_record, create_mock_root_hub_record};
//! use host::usb::{ServiceSettings, UsbServices};
//! use std::sync::Arc;
//!
//! let root = create_mock_root_hub_record(1);
//! let disk = create_mock_device_record(1, 2, root.key(), 1);
//! let services = UsbServices::new(
//!     Arc::new(MockHostController::with_devices(vec![root, disk])),
//!     ServiceSettings::default(),
//! );
//!
//! let report = services.scan().unwrap();
//! assert_eq!(report.attached.len(), 2);
//! assert_eq!(services.root_hub().port_count(), 1);
//! ```

pub mod config;
pub mod error;
pub mod usb;

pub use error::{Result, UsbError};
