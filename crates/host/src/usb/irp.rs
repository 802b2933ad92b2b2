//! I/O Request Packet
//!
//! An [`Irp`] carries one transfer through its lifetime: built by the caller
//! (or by [`crate::usb::request`]), submitted once to a pipe, dispatched by the
//! pipe's worker thread and completed exactly once.
//!
//! Completion is an explicit state, `Pending` until the first call to
//! [`Irp::complete`], then `Complete` with the transfer outcome. Completing
//! wakes every waiter at once: threads parked in
//! [`Irp::wait_until_complete`] through a condition variable, and tasks
//! awaiting [`Irp::completed`] through a `tokio::sync::Notify`.
//!
//! `Irp` is a cheap handle; clones share the same request.

use protocol::{Direction, SetupPacket, TransportError, ValidationError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::trace;

/// Outcome of a completed transfer: bytes transferred or the failure
pub type Completion = Result<usize, TransportError>;

/// Completion state of an IRP
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IrpState {
    Pending,
    Complete(Completion),
}

impl IrpState {
    pub fn is_pending(&self) -> bool {
        matches!(self, IrpState::Pending)
    }
}

#[derive(Debug)]
struct DataStage {
    buffer: Vec<u8>,
    offset: usize,
    length: usize,
}

#[derive(Debug)]
struct IrpInner {
    setup: Option<SetupPacket>,
    accept_short_packet: AtomicBool,
    submitted: AtomicBool,
    data: Mutex<DataStage>,
    state: Mutex<IrpState>,
    completed: Condvar,
    notify: Notify,
}

/// I/O Request Packet
#[derive(Debug, Clone)]
pub struct Irp {
    inner: Arc<IrpInner>,
}

fn check_window(capacity: usize, offset: usize, length: usize) -> protocol::Result<()> {
    match offset.checked_add(length) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(ValidationError::BufferRange {
            offset,
            length,
            capacity,
        }),
    }
}

impl Irp {
    fn new(setup: Option<SetupPacket>, buffer: Vec<u8>, offset: usize, length: usize) -> Self {
        Self {
            inner: Arc::new(IrpInner {
                setup,
                accept_short_packet: AtomicBool::new(true),
                submitted: AtomicBool::new(false),
                data: Mutex::new(DataStage {
                    buffer,
                    offset,
                    length,
                }),
                state: Mutex::new(IrpState::Pending),
                completed: Condvar::new(),
                notify: Notify::new(),
            }),
        }
    }

    /// Control IRP whose data stage is the whole of `buffer`
    ///
    /// For IN requests the buffer receives the data stage; for OUT requests
    /// its contents are sent. `wLength` is taken from the buffer length.
    pub fn control(
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buffer: Vec<u8>,
    ) -> protocol::Result<Self> {
        let length = buffer.len();
        Self::control_window(request_type, request, value, index, buffer, 0, length)
    }

    /// Control IRP whose data stage is `buffer[offset..offset + length]`
    pub fn control_window(
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buffer: Vec<u8>,
        offset: usize,
        length: usize,
    ) -> protocol::Result<Self> {
        check_window(buffer.len(), offset, length)?;
        let w_length = u16::try_from(length).map_err(|_| ValidationError::LengthTooLarge(length))?;

        let setup = SetupPacket {
            request_type,
            request,
            value,
            index,
            length: w_length,
        };
        Ok(Self::new(Some(setup), buffer, offset, length))
    }

    /// Data-only IRP for a bulk or interrupt pipe
    pub fn data(buffer: Vec<u8>) -> Self {
        let length = buffer.len();
        Self::new(None, buffer, 0, length)
    }

    /// Data-only IRP over `buffer[offset..offset + length]`
    pub fn data_window(buffer: Vec<u8>, offset: usize, length: usize) -> protocol::Result<Self> {
        check_window(buffer.len(), offset, length)?;
        Ok(Self::new(None, buffer, offset, length))
    }

    /// Set whether fewer bytes than requested count as success
    pub fn with_short_packets(self, accept: bool) -> Self {
        self.inner
            .accept_short_packet
            .store(accept, Ordering::Release);
        self
    }

    fn data_stage(&self) -> MutexGuard<'_, DataStage> {
        self.inner
            .data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn state_guard(&self) -> MutexGuard<'_, IrpState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Setup packet, `None` for data-only IRPs
    pub fn setup(&self) -> Option<SetupPacket> {
        self.inner.setup
    }

    pub fn is_control(&self) -> bool {
        self.inner.setup.is_some()
    }

    pub fn accept_short_packet(&self) -> bool {
        self.inner.accept_short_packet.load(Ordering::Acquire)
    }

    /// Start of the data window within the buffer
    pub fn offset(&self) -> usize {
        self.data_stage().offset
    }

    /// Requested data stage length
    pub fn length(&self) -> usize {
        self.data_stage().length
    }

    pub fn is_submitted(&self) -> bool {
        self.inner.submitted.load(Ordering::Acquire)
    }

    /// Flag the IRP as handed to a pipe; fails on the second call
    pub(crate) fn mark_submitted(&self) -> protocol::Result<()> {
        if self.inner.submitted.swap(true, Ordering::AcqRel) {
            return Err(ValidationError::AlreadySubmitted);
        }
        Ok(())
    }

    /// Copy of the data window as currently held
    pub(crate) fn window(&self) -> Vec<u8> {
        let stage = self.data_stage();
        stage.buffer[stage.offset..stage.offset + stage.length].to_vec()
    }

    /// Write received bytes back into the data window
    pub(crate) fn store_window(&self, bytes: &[u8]) {
        let mut stage = self.data_stage();
        let n = bytes.len().min(stage.length);
        let offset = stage.offset;
        stage.buffer[offset..offset + n].copy_from_slice(&bytes[..n]);
    }

    /// Current completion state
    pub fn state(&self) -> IrpState {
        self.state_guard().clone()
    }

    pub fn is_complete(&self) -> bool {
        !self.state_guard().is_pending()
    }

    /// Transfer outcome, `None` while pending
    pub fn result(&self) -> Option<Completion> {
        match &*self.state_guard() {
            IrpState::Pending => None,
            IrpState::Complete(result) => Some(result.clone()),
        }
    }

    /// Captured failure, if the IRP completed with one
    pub fn failure(&self) -> Option<TransportError> {
        match &*self.state_guard() {
            IrpState::Complete(Err(e)) => Some(e.clone()),
            _ => None,
        }
    }

    /// Bytes actually transferred; 0 until successful completion
    pub fn actual_length(&self) -> usize {
        match &*self.state_guard() {
            IrpState::Complete(Ok(n)) => *n,
            _ => 0,
        }
    }

    /// Copy of the transferred part of the data window
    pub fn data_bytes(&self) -> Vec<u8> {
        let actual = self.actual_length();
        let stage = self.data_stage();
        let n = actual.min(stage.length);
        stage.buffer[stage.offset..stage.offset + n].to_vec()
    }

    /// Copy of the whole buffer, including bytes outside the window
    pub fn buffer(&self) -> Vec<u8> {
        self.data_stage().buffer.clone()
    }

    /// Transition to `Complete` and wake every waiter
    ///
    /// Only the first call has an effect; later calls return `false` and
    /// leave the recorded outcome untouched.
    pub fn complete(&self, result: Completion) -> bool {
        {
            let mut state = self.state_guard();
            if !state.is_pending() {
                trace!("Ignoring repeated completion: {:?}", result);
                return false;
            }
            *state = IrpState::Complete(result);
        }

        self.inner.completed.notify_all();
        self.inner.notify.notify_waiters();
        true
    }

    /// Block until the IRP completes or `timeout` elapses
    ///
    /// `None` or a zero timeout waits without bound. Returns whether the IRP
    /// is complete; an elapsed wait leaves the transfer running.
    pub fn wait_until_complete(&self, timeout: Option<Duration>) -> bool {
        let state = self.state_guard();
        match timeout.filter(|t| !t.is_zero()) {
            None => {
                let _state = self
                    .inner
                    .completed
                    .wait_while(state, |s| s.is_pending())
                    .unwrap_or_else(PoisonError::into_inner);
                true
            }
            Some(timeout) => {
                let (state, _) = self
                    .inner
                    .completed
                    .wait_timeout_while(state, timeout, |s| s.is_pending())
                    .unwrap_or_else(PoisonError::into_inner);
                !state.is_pending()
            }
        }
    }

    /// Wait asynchronously for completion and return the outcome
    pub async fn completed(&self) -> Completion {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(result) = self.result() {
                return result;
            }
            notified.await;
        }
    }
}

/// Apply the length policy to a raw host-controller outcome
///
/// More bytes than requested is an overflow. Fewer bytes than requested is a
/// short packet, which fails the IRP unless it accepts short packets.
pub(crate) fn settle(requested: usize, accept_short_packet: bool, outcome: Completion) -> Completion {
    match outcome {
        Ok(actual) if actual > requested => Err(TransportError::Overflow),
        Ok(actual) if actual < requested && !accept_short_packet => {
            Err(TransportError::ShortPacket {
                expected: requested,
                actual,
            })
        }
        other => other,
    }
}

/// Direction of the data stage when sent to `endpoint`
pub(crate) fn transfer_direction(irp: &Irp, endpoint: u8) -> Direction {
    match irp.setup() {
        Some(setup) => setup.direction(),
        None => Direction::of_endpoint(endpoint),
    }
}
