//! Per-endpoint transfer queue
//!
//! Every open pipe owns one [`TransferQueue`]: an unbounded `async-channel`
//! FIFO drained by a dedicated worker thread. The worker dispatches one IRP at
//! a time to the host controller, applies the short-packet policy and
//! completes the IRP before taking the next one, so IRPs on one endpoint
//! complete in submission order.
//!
//! Aborting bumps the queue epoch. Anything queued under an older epoch is
//! completed with [`TransportError::Cancelled`] instead of being dispatched,
//! and the host controller is asked to cancel the transfer in flight.

use crate::error::{Result, UsbError};
use crate::usb::irp::{Completion, Irp, settle, transfer_direction};
use async_channel::{Receiver, Sender, unbounded};
use common::HostController;
use protocol::{DeviceKey, Direction, EndpointKind, TransportError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace, warn};

struct Queued {
    epoch: u64,
    irp: Irp,
}

#[derive(Default)]
struct QueueState {
    epoch: u64,
    in_flight: Option<Irp>,
}

fn lock_state(state: &Mutex<QueueState>) -> MutexGuard<'_, QueueState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Executes IRPs against the host controller for one endpoint
struct Dispatcher {
    host: Arc<dyn HostController>,
    device: DeviceKey,
    endpoint: u8,
    kind: EndpointKind,
    timeout: Duration,
}

impl Dispatcher {
    fn run(&self, irp: &Irp) -> Completion {
        let mut window = irp.window();
        let requested = window.len();

        let outcome = match irp.setup() {
            Some(setup) => {
                self.host
                    .control_transfer(self.device, setup, &mut window, self.timeout)
            }
            None => self.host.data_transfer(
                self.device,
                self.endpoint,
                self.kind,
                &mut window,
                self.timeout,
            ),
        };

        if outcome.is_ok() && transfer_direction(irp, self.endpoint) == Direction::DeviceToHost {
            irp.store_window(&window);
        }

        let result = settle(requested, irp.accept_short_packet(), outcome);
        match &result {
            Ok(n) => debug!(
                "Transfer on {} ep {:#04x} done: {}/{} bytes",
                self.device, self.endpoint, n, requested
            ),
            Err(e) => debug!(
                "Transfer on {} ep {:#04x} failed: {}",
                self.device, self.endpoint, e
            ),
        }
        result
    }
}

fn run_worker(rx: Receiver<Queued>, state: Arc<Mutex<QueueState>>, dispatcher: Dispatcher) {
    while let Ok(Queued { epoch, irp }) = rx.recv_blocking() {
        {
            let mut state = lock_state(&state);
            if epoch < state.epoch {
                drop(state);
                irp.complete(Err(TransportError::Cancelled));
                continue;
            }
            state.in_flight = Some(irp.clone());
        }

        let result = dispatcher.run(&irp);
        lock_state(&state).in_flight = None;

        if !irp.complete(result) {
            trace!("IRP was completed before dispatch finished");
        }
    }

    debug!(
        "Transfer queue for {} ep {:#04x} stopped",
        dispatcher.device, dispatcher.endpoint
    );
}

/// FIFO of IRPs plus the worker thread draining it
pub(crate) struct TransferQueue {
    device: DeviceKey,
    endpoint: u8,
    tx: Sender<Queued>,
    rx: Receiver<Queued>,
    state: Arc<Mutex<QueueState>>,
    host: Arc<dyn HostController>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TransferQueue {
    /// Create the queue and start its worker thread
    pub(crate) fn spawn(
        host: Arc<dyn HostController>,
        device: DeviceKey,
        endpoint: u8,
        kind: EndpointKind,
        timeout: Duration,
    ) -> Result<Self> {
        let (tx, rx) = unbounded();
        let state = Arc::new(Mutex::new(QueueState::default()));
        let dispatcher = Dispatcher {
            host: host.clone(),
            device,
            endpoint,
            kind,
            timeout,
        };

        let worker = {
            let rx = rx.clone();
            let state = state.clone();
            thread::Builder::new()
                .name(format!("usb-ep-{}-{:02x}", device, endpoint))
                .spawn(move || run_worker(rx, state, dispatcher))
                .map_err(|e| UsbError::Thread(e.to_string()))?
        };

        debug!("Opened transfer queue for {} ep {:#04x}", device, endpoint);

        Ok(Self {
            device,
            endpoint,
            tx,
            rx,
            state,
            host,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Append an already validated IRP
    pub(crate) fn enqueue(&self, irp: Irp) -> Result<()> {
        let epoch = lock_state(&self.state).epoch;
        self.tx.try_send(Queued { epoch, irp }).map_err(|e| {
            e.into_inner().irp.complete(Err(TransportError::Cancelled));
            UsbError::PipeClosed(self.endpoint)
        })
    }

    /// Number of IRPs waiting behind the one in flight
    pub(crate) fn pending(&self) -> usize {
        self.rx.len()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Cancel every queued IRP and the one in flight
    ///
    /// Returns the number of queued IRPs completed with `Cancelled`.
    pub(crate) fn abort(&self) -> usize {
        let in_flight = {
            let mut state = lock_state(&self.state);
            state.epoch += 1;
            state.in_flight.clone()
        };

        let mut cancelled = 0;
        while let Ok(Queued { irp, .. }) = self.rx.try_recv() {
            if irp.complete(Err(TransportError::Cancelled)) {
                cancelled += 1;
            }
        }

        if let Some(irp) = in_flight
            && !irp.is_complete()
        {
            debug!(
                "Cancelling in-flight transfer on {} ep {:#04x}",
                self.device, self.endpoint
            );
            self.host.cancel(self.device, self.endpoint);
        }

        if cancelled > 0 {
            debug!(
                "Aborted {} queued IRPs on {} ep {:#04x}",
                cancelled, self.device, self.endpoint
            );
        }
        cancelled
    }

    fn take_worker(&self) -> Option<JoinHandle<()>> {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Abort outstanding IRPs and close the channel without waiting for the
    /// worker. A transfer the host cannot cancel runs to its timeout on the
    /// detached worker, which then exits.
    pub(crate) fn shutdown(&self) {
        self.tx.close();
        self.abort();

        if self.take_worker().is_some() {
            debug!(
                "Detached transfer worker for {} ep {:#04x}",
                self.device, self.endpoint
            );
        }
    }

    /// Abort outstanding IRPs, close the channel and join the worker
    pub(crate) fn close(&self) {
        self.tx.close();
        self.abort();

        if let Some(handle) = self.take_worker() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!(
                    "Transfer worker for {} ep {:#04x} panicked",
                    self.device, self.endpoint
                );
            }
        }
    }
}

impl Drop for TransferQueue {
    fn drop(&mut self) {
        self.close();
    }
}
