//! USB subsystem
//!
//! Tracks the devices attached to a host controller and moves control,
//! bulk and interrupt transfers to and from them:
//! - topology model and scanner (hub/port tree, attach/detach events)
//! - standard request encoder
//! - IRPs with blocking and async completion
//! - per-endpoint transfer queues behind pipes
//!
//! Host-controller calls are synchronous and run on dedicated threads (one
//! per open pipe, one for the scanner) so they never block a Tokio runtime.

pub mod backend;
pub mod device;
pub mod irp;
pub mod pipe;
mod queue;
pub mod request;
pub mod scanner;
pub mod services;
pub mod synchronized;
pub mod topology;

// Re-export public types
pub use backend::RusbHostController;
pub use device::Device;
pub use irp::{Completion, Irp, IrpState};
pub use pipe::{CONTROL_ENDPOINT, Pipe};
pub use scanner::{ScanReport, TopologyScanner};
pub use services::{ServiceSettings, UsbServices};
pub use synchronized::SynchronizedDevice;
pub use topology::{Port, ROOT_HUB_KEY, Topology};
