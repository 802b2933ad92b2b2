//! Test utilities for usb-host
//!
//! Provides an in-memory [`MockHostController`] and helpers for building
//! device records, for use in tests across crates.
//!
//! # Example
//!
//! ```
//! use common::HostController;
//! use common::test_utils::{MockHostController, create_mock_root_hub_record};
//!
//! let host = MockHostController::with_devices(vec![create_mock_root_hub_record(1)]);
//! let devices = host.enumerate().unwrap();
//! assert_eq!(devices.len(), 1);
//! ```

use crate::host::{DeviceRecord, EnumerationError, HostController};
use protocol::{
    DeviceDescriptor, DeviceIdentity, DeviceKey, DeviceSpeed, Direction, EndpointKind, SetupPacket,
    TransportError,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a device descriptor with the given ids and class
pub fn create_mock_descriptor(vendor_id: u16, product_id: u16, class: u8) -> DeviceDescriptor {
    DeviceDescriptor {
        usb_version: 0x0200,
        device_class: class,
        max_packet_size0: 64,
        vendor_id,
        product_id,
        device_version: 0x0100,
        num_configurations: 1,
        ..DeviceDescriptor::default()
    }
}

/// Create the record of a bus root hub (address 1, no parent)
pub fn create_mock_root_hub_record(bus: u8) -> DeviceRecord {
    DeviceRecord {
        identity: DeviceIdentity::new(bus, 0, 1, create_mock_descriptor(0x1d6b, 0x0002, 0x09)),
        parent: None,
        speed: DeviceSpeed::High,
    }
}

/// Create the record of an external hub below `parent`
pub fn create_mock_hub_record(bus: u8, address: u8, parent: DeviceKey, port: u8) -> DeviceRecord {
    DeviceRecord {
        identity: DeviceIdentity::new(
            bus,
            port,
            address,
            create_mock_descriptor(0x05e3, 0x0608, 0x09),
        ),
        parent: Some(parent),
        speed: DeviceSpeed::High,
    }
}

/// Create the record of a function device below `parent`
pub fn create_mock_device_record(
    bus: u8,
    address: u8,
    parent: DeviceKey,
    port: u8,
) -> DeviceRecord {
    DeviceRecord {
        identity: DeviceIdentity::new(
            bus,
            port,
            address,
            create_mock_descriptor(0x0781, 0x5580 + address as u16, 0x00),
        ),
        parent: Some(parent),
        speed: DeviceSpeed::Full,
    }
}

/// Create a raw 18-byte device descriptor (GET_DESCRIPTOR Device)
pub fn create_mock_device_descriptor_bytes() -> Vec<u8> {
    vec![
        0x12, // bLength
        0x01, // bDescriptorType (Device)
        0x00, 0x02, // bcdUSB (2.0)
        0x00, // bDeviceClass
        0x00, // bDeviceSubClass
        0x00, // bDeviceProtocol
        0x40, // bMaxPacketSize0 (64)
        0x81, 0x07, // idVendor (0x0781)
        0x81, 0x55, // idProduct (0x5581)
        0x00, 0x01, // bcdDevice (1.0)
        0x01, // iManufacturer
        0x02, // iProduct
        0x03, // iSerialNumber
        0x01, // bNumConfigurations
    ]
}

/// Timeout wrapper for async tests
///
/// Wraps an async operation with a timeout to prevent tests from hanging.
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}

/// Scripted outcome of the next transfer on an endpoint
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Copy these bytes into an IN buffer and report their length
    Data(Vec<u8>),
    /// Report this many bytes without touching the buffer
    Length(usize),
    /// Fail the transfer
    Error(TransportError),
}

/// A transfer as seen by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedTransfer {
    pub device: DeviceKey,
    pub endpoint: u8,
    /// Setup packet for control transfers
    pub setup: Option<SetupPacket>,
    /// Requested data stage length
    pub length: usize,
    /// Bytes sent for OUT transfers
    pub out_data: Vec<u8>,
}

#[derive(Default)]
struct MockState {
    devices: Vec<DeviceRecord>,
    broken: HashSet<DeviceKey>,
    enumeration_failures: VecDeque<TransportError>,
    enumerations: usize,
    enumeration_delay: Duration,
    enumerating: usize,
    max_concurrent_enumerations: usize,
    open: HashSet<DeviceKey>,
    claimed: HashSet<(DeviceKey, u8)>,
    responses: HashMap<(DeviceKey, u8), VecDeque<MockResponse>>,
    transfers: Vec<RecordedTransfer>,
    transfer_delay: Duration,
    held: bool,
    active: HashSet<(DeviceKey, u8)>,
    cancel_requests: HashSet<(DeviceKey, u8)>,
    cancel_count: usize,
    ignore_cancel: bool,
}

/// In-memory host controller
///
/// Devices, enumeration failures and transfer outcomes are scripted by the
/// test. Transfers can be delayed or held until released or cancelled, which
/// lets tests observe in-flight and queued IRPs deterministically.
#[derive(Default)]
pub struct MockHostController {
    state: Mutex<MockState>,
    changed: Condvar,
}

impl MockHostController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_devices(devices: Vec<DeviceRecord>) -> Self {
        let host = Self::new();
        host.set_devices(devices);
        host
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the attached device population
    pub fn set_devices(&self, devices: Vec<DeviceRecord>) {
        self.state().devices = devices;
    }

    pub fn add_device(&self, record: DeviceRecord) {
        self.state().devices.push(record);
    }

    pub fn remove_device(&self, device: DeviceKey) {
        self.state().devices.retain(|r| r.key() != device);
    }

    /// Make enumeration report `device` as a per-device failure
    pub fn break_device(&self, device: DeviceKey) {
        self.state().broken.insert(device);
    }

    pub fn repair_device(&self, device: DeviceKey) {
        self.state().broken.remove(&device);
    }

    /// Fail the next call to `enumerate` as a whole
    pub fn fail_next_enumeration(&self, error: TransportError) {
        self.state().enumeration_failures.push_back(error);
    }

    pub fn enumeration_count(&self) -> usize {
        self.state().enumerations
    }

    /// Make every `enumerate` call take at least `delay`
    pub fn set_enumeration_delay(&self, delay: Duration) {
        self.state().enumeration_delay = delay;
    }

    /// Highest number of `enumerate` calls seen running at once
    pub fn max_concurrent_enumerations(&self) -> usize {
        self.state().max_concurrent_enumerations
    }

    /// Count cancel requests but let transfers run on, as synchronous
    /// libusb transfers do
    pub fn ignore_cancel(&self) {
        self.state().ignore_cancel = true;
    }

    /// Script the outcome of the next transfer on `endpoint`
    pub fn push_response(&self, device: DeviceKey, endpoint: u8, response: MockResponse) {
        self.state()
            .responses
            .entry((device, endpoint))
            .or_default()
            .push_back(response);
    }

    /// Make every transfer take at least `delay`
    pub fn set_transfer_delay(&self, delay: Duration) {
        self.state().transfer_delay = delay;
    }

    /// Block transfers once dispatched until released or cancelled
    pub fn hold_transfers(&self) {
        self.state().held = true;
    }

    pub fn release_transfers(&self) {
        self.state().held = false;
        self.changed.notify_all();
    }

    /// Wait until `count` transfers are in flight
    pub fn wait_for_in_flight(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state();
        while state.active.len() < count {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    /// Every transfer dispatched so far, in dispatch order
    pub fn transfers(&self) -> Vec<RecordedTransfer> {
        self.state().transfers.clone()
    }

    /// Number of `cancel` calls received
    pub fn cancel_count(&self) -> usize {
        self.state().cancel_count
    }

    pub fn is_open(&self, device: DeviceKey) -> bool {
        self.state().open.contains(&device)
    }

    pub fn is_claimed(&self, device: DeviceKey, interface: u8) -> bool {
        self.state().claimed.contains(&(device, interface))
    }

    fn run_transfer(
        &self,
        device: DeviceKey,
        endpoint: u8,
        setup: Option<SetupPacket>,
        direction: Direction,
        data: &mut [u8],
    ) -> Result<usize, TransportError> {
        let mut state = self.state();
        if !state.devices.iter().any(|r| r.key() == device) {
            return Err(TransportError::NoDevice);
        }

        let out_data = match direction {
            Direction::HostToDevice => data.to_vec(),
            Direction::DeviceToHost => Vec::new(),
        };
        state.transfers.push(RecordedTransfer {
            device,
            endpoint,
            setup,
            length: data.len(),
            out_data,
        });
        let response = state
            .responses
            .get_mut(&(device, endpoint))
            .and_then(VecDeque::pop_front);

        let slot = (device, endpoint);
        state.active.insert(slot);
        self.changed.notify_all();

        let deadline = Instant::now() + state.transfer_delay;
        loop {
            if state.cancel_requests.remove(&slot) {
                state.active.remove(&slot);
                self.changed.notify_all();
                return Err(TransportError::Cancelled);
            }

            let now = Instant::now();
            if state.held {
                state = self
                    .changed
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            } else if now < deadline {
                state = self
                    .changed
                    .wait_timeout(state, deadline - now)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            } else {
                break;
            }
        }

        state.active.remove(&slot);
        self.changed.notify_all();
        drop(state);

        match response {
            None => Ok(data.len()),
            Some(MockResponse::Data(bytes)) => {
                if direction == Direction::DeviceToHost {
                    let n = bytes.len().min(data.len());
                    data[..n].copy_from_slice(&bytes[..n]);
                }
                Ok(bytes.len())
            }
            Some(MockResponse::Length(n)) => Ok(n),
            Some(MockResponse::Error(error)) => Err(error),
        }
    }
}

impl HostController for MockHostController {
    fn enumerate(&self) -> Result<Vec<Result<DeviceRecord, EnumerationError>>, TransportError> {
        let delay = {
            let mut state = self.state();
            state.enumerations += 1;
            state.enumerating += 1;
            state.max_concurrent_enumerations =
                state.max_concurrent_enumerations.max(state.enumerating);
            state.enumeration_delay
        };
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let mut state = self.state();
        state.enumerating -= 1;
        if let Some(error) = state.enumeration_failures.pop_front() {
            return Err(error);
        }

        Ok(state
            .devices
            .iter()
            .map(|record| {
                if state.broken.contains(&record.key()) {
                    Err(EnumerationError {
                        device: record.key(),
                        error: TransportError::Io,
                    })
                } else {
                    Ok(record.clone())
                }
            })
            .collect())
    }

    fn open(&self, device: DeviceKey) -> Result<(), TransportError> {
        let mut state = self.state();
        if !state.devices.iter().any(|r| r.key() == device) {
            return Err(TransportError::NoDevice);
        }
        state.open.insert(device);
        Ok(())
    }

    fn close(&self, device: DeviceKey) {
        let mut state = self.state();
        state.open.remove(&device);
        state.claimed.retain(|(key, _)| *key != device);
    }

    fn control_transfer(
        &self,
        device: DeviceKey,
        setup: SetupPacket,
        data: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, TransportError> {
        self.run_transfer(device, 0, Some(setup), setup.direction(), data)
    }

    fn data_transfer(
        &self,
        device: DeviceKey,
        endpoint: u8,
        _kind: EndpointKind,
        data: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, TransportError> {
        self.run_transfer(device, endpoint, None, Direction::of_endpoint(endpoint), data)
    }

    fn cancel(&self, device: DeviceKey, endpoint: u8) {
        let mut state = self.state();
        state.cancel_count += 1;
        if !state.ignore_cancel && state.active.contains(&(device, endpoint)) {
            state.cancel_requests.insert((device, endpoint));
        }
        self.changed.notify_all();
    }

    fn claim_interface(&self, device: DeviceKey, interface: u8) -> Result<(), TransportError> {
        let mut state = self.state();
        if !state.open.contains(&device) {
            return Err(TransportError::InvalidParam);
        }
        if !state.claimed.insert((device, interface)) {
            return Err(TransportError::Busy);
        }
        Ok(())
    }

    fn release_interface(&self, device: DeviceKey, interface: u8) -> Result<(), TransportError> {
        if self.state().claimed.remove(&(device, interface)) {
            Ok(())
        } else {
            Err(TransportError::NotFound)
        }
    }
}
