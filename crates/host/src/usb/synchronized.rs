//! Coarse-locked device wrapper
//!
//! [`SynchronizedDevice`] serializes every operation on a device behind one
//! mutex. A synchronous submit keeps the lock until the IRP completes, so at
//! most one caller talks to the device at a time. Plain [`Device`] handles do
//! not lock this way; use the wrapper only where callers need it.

use crate::error::Result;
use crate::usb::device::{Device, lock};
use crate::usb::irp::Irp;
use crate::usb::pipe::Pipe;
use protocol::{EndpointKind, ValidationError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct SynchronizedDevice {
    device: Arc<Device>,
    guard: Mutex<()>,
}

impl SynchronizedDevice {
    pub fn new(device: Arc<Device>) -> Self {
        Self {
            device,
            guard: Mutex::new(()),
        }
    }

    /// Wrapped device, bypassing the lock
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Run `f` with the device lock held
    pub fn with_lock<R>(&self, f: impl FnOnce(&Device) -> R) -> R {
        let _guard = lock(&self.guard);
        f(&self.device)
    }

    pub fn open(&self) -> Result<()> {
        self.with_lock(|d| d.open())
    }

    pub fn close(&self) {
        self.with_lock(|d| d.close())
    }

    pub fn claim_interface(&self, interface: u8) -> Result<()> {
        self.with_lock(|d| d.claim_interface(interface))
    }

    pub fn release_interface(&self, interface: u8) -> Result<()> {
        self.with_lock(|d| d.release_interface(interface))
    }

    pub fn control_pipe(&self) -> Result<Arc<Pipe>> {
        self.with_lock(|d| d.control_pipe())
    }

    pub fn open_pipe(&self, endpoint: u8, kind: EndpointKind) -> Result<Arc<Pipe>> {
        self.with_lock(|d| d.open_pipe(endpoint, kind))
    }

    fn check_owner(&self, pipe: &Pipe) -> Result<()> {
        if pipe.device() != self.device.key() {
            return Err(ValidationError::ForeignPipe {
                pipe: pipe.device(),
                device: self.device.key(),
            }
            .into());
        }
        Ok(())
    }

    /// Submit on `pipe` and wait, holding the lock until completion
    ///
    /// `pipe` must belong to the wrapped device.
    pub fn submit_sync(
        &self,
        pipe: &Pipe,
        irp: &Irp,
        timeout: Option<Duration>,
    ) -> Result<Option<usize>> {
        self.check_owner(pipe)?;
        self.with_lock(|_| pipe.submit_sync(irp, timeout))
    }

    pub fn submit_async(&self, pipe: &Pipe, irp: &Irp) -> Result<()> {
        self.check_owner(pipe)?;
        self.with_lock(|_| pipe.submit_async(irp))
    }

    pub fn abort_all_submissions(&self) -> usize {
        self.with_lock(|d| d.abort_all_submissions())
    }
}
