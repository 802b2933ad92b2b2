//! Endpoint pipes
//!
//! A [`Pipe`] is the submission point for one endpoint of an open device.
//! Endpoint 0 is the control pipe and only accepts IRPs with a Setup packet;
//! bulk and interrupt pipes only accept data-only IRPs.

use crate::error::{Result, UsbError};
use crate::usb::irp::Irp;
use crate::usb::queue::TransferQueue;
use common::HostController;
use protocol::{DeviceKey, Direction, EndpointKind, ValidationError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

/// Address of the default control endpoint
pub const CONTROL_ENDPOINT: u8 = 0x00;

/// Submission handle for one endpoint
pub struct Pipe {
    device: DeviceKey,
    endpoint: u8,
    kind: EndpointKind,
    connected: Arc<AtomicBool>,
    queue: TransferQueue,
}

impl Pipe {
    pub(crate) fn open(
        host: Arc<dyn HostController>,
        device: DeviceKey,
        endpoint: u8,
        kind: EndpointKind,
        connected: Arc<AtomicBool>,
        timeout: Duration,
    ) -> Result<Self> {
        let queue = TransferQueue::spawn(host, device, endpoint, kind, timeout)?;
        Ok(Self {
            device,
            endpoint,
            kind,
            connected,
            queue,
        })
    }

    /// Endpoint address, including the direction bit
    pub fn endpoint(&self) -> u8 {
        self.endpoint
    }

    pub fn kind(&self) -> EndpointKind {
        self.kind
    }

    /// Data direction of a bulk or interrupt pipe, `None` for control
    pub fn direction(&self) -> Option<Direction> {
        match self.kind {
            EndpointKind::Control => None,
            _ => Some(Direction::of_endpoint(self.endpoint)),
        }
    }

    pub fn device(&self) -> DeviceKey {
        self.device
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    /// IRPs queued but not yet dispatched
    pub fn pending(&self) -> usize {
        self.queue.pending()
    }

    fn check(&self, irp: &Irp) -> Result<()> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(UsbError::Disconnected(self.device));
        }
        if self.queue.is_closed() {
            return Err(UsbError::PipeClosed(self.endpoint));
        }

        match (self.kind, irp.is_control()) {
            (EndpointKind::Control, false) => Err(ValidationError::EndpointMismatch {
                endpoint: self.endpoint,
                reason: "control pipe requires a setup packet",
            }
            .into()),
            (EndpointKind::Bulk | EndpointKind::Interrupt, true) => {
                Err(ValidationError::EndpointMismatch {
                    endpoint: self.endpoint,
                    reason: "data pipe does not take a setup packet",
                }
                .into())
            }
            _ => Ok(()),
        }
    }

    /// Queue the IRP and return without waiting
    ///
    /// Completion is observed through [`Irp::wait_until_complete`],
    /// [`Irp::completed`] or [`Irp::result`].
    pub fn submit_async(&self, irp: &Irp) -> Result<()> {
        self.check(irp)?;
        irp.mark_submitted()?;

        if let Some(setup) = irp.setup() {
            debug!(
                "Submitting {} to {}",
                protocol::requests::request_name(setup.request),
                self.device
            );
        } else {
            debug!(
                "Submitting {} bytes to {} ep {:#04x}",
                irp.length(),
                self.device,
                self.endpoint
            );
        }
        self.queue.enqueue(irp.clone())
    }

    /// Queue the IRP and block until it completes or `timeout` elapses
    ///
    /// Returns `Ok(Some(actual_length))` on success, the captured failure as
    /// [`UsbError::Transport`], or `Ok(None)` if the wait elapsed first. An
    /// elapsed wait does not cancel the transfer.
    pub fn submit_sync(&self, irp: &Irp, timeout: Option<Duration>) -> Result<Option<usize>> {
        self.submit_async(irp)?;

        if !irp.wait_until_complete(timeout) {
            return Ok(None);
        }
        match irp.result() {
            Some(Ok(n)) => Ok(Some(n)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    /// Cancel every IRP queued on this pipe and the one in flight
    pub fn abort_all_submissions(&self) -> usize {
        self.queue.abort()
    }

    /// Abort outstanding IRPs and stop the worker; later submits fail
    pub fn close(&self) {
        self.queue.close();
    }

    /// Like [`Pipe::close`] but leaves the worker to finish on its own
    pub(crate) fn shutdown(&self) {
        self.queue.shutdown();
    }
}

impl std::fmt::Debug for Pipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipe")
            .field("device", &self.device)
            .field("endpoint", &self.endpoint)
            .field("kind", &self.kind)
            .field("closed", &self.is_closed())
            .finish()
    }
}
