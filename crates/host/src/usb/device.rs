//! Devices in the hub/port tree
//!
//! Function devices, hubs and the synthetic root hub share one [`Device`]
//! type tagged with a [`DeviceKind`]. Hubs own their ports; a device points
//! back at the port it hangs off through a weak reference, so dropping a
//! subtree never leaves reference cycles behind.
//!
//! Device operations (open, claim, pipes, standard requests) check that the
//! device is still attached and fail with [`UsbError::Disconnected`] once a
//! scan has removed it.

use crate::error::{Result, UsbError};
use crate::usb::irp::Irp;
use crate::usb::pipe::{CONTROL_ENDPOINT, Pipe};
use crate::usb::request;
use crate::usb::topology::Port;
use common::{DeviceRecord, HostController};
use protocol::requests::{DESCRIPTOR_DEVICE, DESCRIPTOR_STRING};
use protocol::{
    ClaimError, DEVICE_DESCRIPTOR_LEN, DeviceDescriptor, DeviceIdentity, DeviceKey, DeviceKind,
    DeviceSpeed, EndpointKind, Recipient, ValidationError,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tracing::debug;

/// Maximum length of a string descriptor
const STRING_DESCRIPTOR_MAX: usize = 255;

#[derive(Default)]
struct DeviceIo {
    open: bool,
    claimed: BTreeSet<u8>,
    pipes: BTreeMap<u8, Arc<Pipe>>,
}

/// A node of the hub/port tree
pub struct Device {
    identity: DeviceIdentity,
    kind: DeviceKind,
    speed: DeviceSpeed,
    pub(crate) parent: Mutex<Option<Weak<Port>>>,
    pub(crate) ports: Mutex<Vec<Arc<Port>>>,
    connected: Arc<AtomicBool>,
    io: Mutex<DeviceIo>,
    host: Arc<dyn HostController>,
    transfer_timeout: Duration,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Device {
    fn with_kind(
        identity: DeviceIdentity,
        kind: DeviceKind,
        speed: DeviceSpeed,
        host: Arc<dyn HostController>,
        transfer_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            identity,
            kind,
            speed,
            parent: Mutex::new(None),
            ports: Mutex::new(Vec::new()),
            connected: Arc::new(AtomicBool::new(true)),
            io: Mutex::new(DeviceIo::default()),
            host,
            transfer_timeout,
        })
    }

    /// Build a device from an enumeration record, classified by class code
    pub(crate) fn from_record(
        record: &DeviceRecord,
        host: Arc<dyn HostController>,
        transfer_timeout: Duration,
    ) -> Arc<Self> {
        let kind = DeviceKind::classify(&record.identity.descriptor);
        Self::with_kind(
            record.identity.clone(),
            kind,
            record.speed,
            host,
            transfer_timeout,
        )
    }

    /// Synthetic top of the tree (bus 0, address 0)
    pub(crate) fn root_hub(host: Arc<dyn HostController>, transfer_timeout: Duration) -> Arc<Self> {
        let identity = DeviceIdentity::new(0, 0, 0, DeviceDescriptor::default());
        Self::with_kind(
            identity,
            DeviceKind::RootHub,
            DeviceSpeed::Unknown,
            host,
            transfer_timeout,
        )
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn key(&self) -> DeviceKey {
        self.identity.key()
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn speed(&self) -> DeviceSpeed {
        self.speed
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.identity.descriptor
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Ports of a hub in port-number order; empty for function devices
    pub fn ports(&self) -> Vec<Arc<Port>> {
        lock(&self.ports).clone()
    }

    pub fn port_count(&self) -> usize {
        lock(&self.ports).len()
    }

    /// Port by 1-based number
    pub fn port(&self, number: u8) -> Option<Arc<Port>> {
        lock(&self.ports)
            .iter()
            .find(|p| p.number() == number)
            .cloned()
    }

    /// Devices currently attached to this hub's ports
    pub fn attached_devices(&self) -> Vec<Arc<Device>> {
        self.ports().iter().filter_map(|p| p.device()).collect()
    }

    /// Port this device hangs off, `None` for the root hub or once detached
    pub fn parent_port(&self) -> Option<Arc<Port>> {
        lock(&self.parent).as_ref().and_then(Weak::upgrade)
    }

    pub fn parent_hub(&self) -> Option<Arc<Device>> {
        self.parent_port().and_then(|p| p.hub())
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.kind == DeviceKind::RootHub {
            return Err(UsbError::Unsupported("root hub has no control endpoint"));
        }
        if !self.is_connected() {
            return Err(UsbError::Disconnected(self.key()));
        }
        Ok(())
    }

    fn open_locked(&self, io: &mut DeviceIo) -> Result<()> {
        if io.open {
            return Ok(());
        }
        self.host.open(self.key())?;
        io.open = true;
        debug!("Opened device {}", self.identity);
        Ok(())
    }

    /// Open a host-controller handle; no-op when already open
    pub fn open(&self) -> Result<()> {
        self.ensure_usable()?;
        self.open_locked(&mut lock(&self.io))
    }

    pub fn is_open(&self) -> bool {
        lock(&self.io).open
    }

    /// Take the pipes and drop claims; returns the pipes and whether the
    /// handle was open
    fn take_io(&self) -> (BTreeMap<u8, Arc<Pipe>>, bool) {
        let mut io = lock(&self.io);
        let pipes = std::mem::take(&mut io.pipes);
        io.claimed.clear();
        (pipes, std::mem::replace(&mut io.open, false))
    }

    /// Close every pipe, drop interface claims and close the handle
    pub fn close(&self) {
        let (pipes, was_open) = self.take_io();

        for pipe in pipes.values() {
            pipe.close();
        }
        if was_open {
            self.host.close(self.key());
            debug!("Closed device {}", self.identity);
        }
    }

    /// Claim an interface, opening the device first if needed
    pub fn claim_interface(&self, interface: u8) -> Result<()> {
        self.ensure_usable()?;
        let mut io = lock(&self.io);
        if io.claimed.contains(&interface) {
            return Err(ClaimError::AlreadyClaimed(interface).into());
        }

        self.open_locked(&mut io)?;
        self.host.claim_interface(self.key(), interface)?;
        io.claimed.insert(interface);
        debug!("Claimed interface {} on {}", interface, self.identity);
        Ok(())
    }

    pub fn release_interface(&self, interface: u8) -> Result<()> {
        self.ensure_usable()?;
        let mut io = lock(&self.io);
        if !io.claimed.contains(&interface) {
            return Err(ClaimError::NotClaimed(interface).into());
        }

        self.host.release_interface(self.key(), interface)?;
        io.claimed.remove(&interface);
        debug!("Released interface {} on {}", interface, self.identity);
        Ok(())
    }

    /// Interfaces currently claimed, ascending
    pub fn claimed_interfaces(&self) -> Vec<u8> {
        lock(&self.io).claimed.iter().copied().collect()
    }

    fn pipe_for(&self, endpoint: u8, kind: EndpointKind) -> Result<Arc<Pipe>> {
        self.ensure_usable()?;
        let mut io = lock(&self.io);
        self.open_locked(&mut io)?;

        if let Some(pipe) = io.pipes.get(&endpoint)
            && !pipe.is_closed()
        {
            return Ok(pipe.clone());
        }

        let pipe = Arc::new(Pipe::open(
            self.host.clone(),
            self.key(),
            endpoint,
            kind,
            self.connected.clone(),
            self.transfer_timeout,
        )?);
        io.pipes.insert(endpoint, pipe.clone());
        Ok(pipe)
    }

    /// Default control pipe (endpoint 0), created on first use
    pub fn control_pipe(&self) -> Result<Arc<Pipe>> {
        self.pipe_for(CONTROL_ENDPOINT, EndpointKind::Control)
    }

    /// Pipe for a bulk or interrupt endpoint
    ///
    /// `endpoint` is the full address including the direction bit. Returns
    /// the existing pipe if one is already open.
    pub fn open_pipe(&self, endpoint: u8, kind: EndpointKind) -> Result<Arc<Pipe>> {
        if endpoint & 0x0f == CONTROL_ENDPOINT {
            return Err(ValidationError::EndpointMismatch {
                endpoint,
                reason: "endpoint 0 is the default control pipe",
            }
            .into());
        }
        if kind == EndpointKind::Control {
            return Err(ValidationError::EndpointMismatch {
                endpoint,
                reason: "only the default endpoint carries control transfers",
            }
            .into());
        }
        self.pipe_for(endpoint, kind)
    }

    /// Open pipe for `endpoint`, if any
    pub fn pipe(&self, endpoint: u8) -> Option<Arc<Pipe>> {
        lock(&self.io).pipes.get(&endpoint).cloned()
    }

    /// Close one pipe, cancelling what it still holds
    pub fn close_pipe(&self, endpoint: u8) {
        let pipe = lock(&self.io).pipes.remove(&endpoint);
        if let Some(pipe) = pipe {
            pipe.close();
        }
    }

    /// Cancel everything queued or in flight on every pipe of this device
    pub fn abort_all_submissions(&self) -> usize {
        let pipes: Vec<_> = lock(&self.io).pipes.values().cloned().collect();
        pipes.iter().map(|p| p.abort_all_submissions()).sum()
    }

    /// Mark the device removed; later operations fail with `Disconnected`
    ///
    /// Returns false if it was already marked.
    pub(crate) fn mark_disconnected(&self) -> bool {
        self.connected.swap(false, Ordering::AcqRel)
    }

    /// Tear down pipes, claims and the handle of a removed device
    ///
    /// Pipe workers are not joined, so a transfer stuck in the host
    /// controller never blocks the caller.
    pub(crate) fn release_removed(&self) {
        let (pipes, was_open) = self.take_io();

        for pipe in pipes.values() {
            pipe.shutdown();
        }
        if was_open {
            self.host.close(self.key());
            debug!("Released removed device {}", self.identity);
        }
    }

    fn submit_control(&self, irp: Irp) -> Result<Irp> {
        let pipe = self.control_pipe()?;
        pipe.submit_sync(&irp, None)?;
        Ok(irp)
    }

    /// GET_STATUS
    pub fn get_status(&self, recipient: Recipient, target: u16) -> Result<u16> {
        let irp = self.submit_control(request::get_status(recipient, target)?)?;
        Ok(request::decode_status(&irp.data_bytes())?)
    }

    /// CLEAR_FEATURE
    pub fn clear_feature(&self, recipient: Recipient, feature: u16, target: u16) -> Result<()> {
        self.submit_control(request::clear_feature(recipient, feature, target)?)?;
        Ok(())
    }

    /// SET_FEATURE
    pub fn set_feature(&self, recipient: Recipient, feature: u16, target: u16) -> Result<()> {
        self.submit_control(request::set_feature(recipient, feature, target)?)?;
        Ok(())
    }

    /// GET_DESCRIPTOR; returns the bytes actually read (at most `length`)
    pub fn get_descriptor(
        &self,
        descriptor_type: u8,
        index: u8,
        langid: u16,
        length: usize,
    ) -> Result<Vec<u8>> {
        let irp = request::get_descriptor(descriptor_type, index, langid, length)?;
        Ok(self.submit_control(irp)?.data_bytes())
    }

    /// Read and parse the device descriptor from the device itself
    pub fn read_device_descriptor(&self) -> Result<DeviceDescriptor> {
        let bytes = self.get_descriptor(DESCRIPTOR_DEVICE, 0, 0, DEVICE_DESCRIPTOR_LEN)?;
        Ok(DeviceDescriptor::parse(&bytes)?)
    }

    /// Read a string descriptor and decode its UTF-16LE payload
    pub fn get_string_descriptor(&self, index: u8, langid: u16) -> Result<String> {
        let bytes = self.get_descriptor(DESCRIPTOR_STRING, index, langid, STRING_DESCRIPTOR_MAX)?;
        if bytes.len() < 2 {
            return Err(ValidationError::BufferTooSmall {
                needed: 2,
                available: bytes.len(),
            }
            .into());
        }
        if bytes[1] != DESCRIPTOR_STRING {
            return Err(ValidationError::DescriptorType {
                expected: DESCRIPTOR_STRING,
                found: bytes[1],
            }
            .into());
        }

        let end = (bytes[0] as usize).clamp(2, bytes.len());
        let units: Vec<u16> = bytes[2..end]
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        Ok(String::from_utf16_lossy(&units))
    }

    /// SET_DESCRIPTOR
    pub fn set_descriptor(
        &self,
        descriptor_type: u8,
        index: u8,
        langid: u16,
        data: Vec<u8>,
    ) -> Result<()> {
        self.submit_control(request::set_descriptor(
            descriptor_type,
            index,
            langid,
            data,
        )?)?;
        Ok(())
    }

    /// GET_CONFIGURATION
    pub fn get_configuration(&self) -> Result<u8> {
        let irp = self.submit_control(request::get_configuration()?)?;
        Ok(irp.data_bytes()[0])
    }

    /// SET_CONFIGURATION
    pub fn set_configuration(&self, configuration: u8) -> Result<()> {
        self.submit_control(request::set_configuration(configuration as u16)?)?;
        Ok(())
    }

    /// GET_INTERFACE; returns the alternate setting
    pub fn get_interface(&self, interface: u8) -> Result<u8> {
        let irp = self.submit_control(request::get_interface(interface as u16)?)?;
        Ok(irp.data_bytes()[0])
    }

    /// SET_INTERFACE
    pub fn set_interface(&self, interface: u8, alternate: u8) -> Result<()> {
        self.submit_control(request::set_interface(
            interface as u16,
            alternate as u16,
        )?)?;
        Ok(())
    }

    /// SYNCH_FRAME; returns the frame number
    pub fn synch_frame(&self, endpoint: u8) -> Result<u16> {
        let irp = self.submit_control(request::synch_frame(endpoint as u16)?)?;
        Ok(request::decode_status(&irp.data_bytes())?)
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        let io = self.io.get_mut().unwrap_or_else(PoisonError::into_inner);
        if io.open {
            debug!("Closing {} on drop", self.identity);
            self.host.close(self.identity.key());
        }
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("identity", &self.identity)
            .field("kind", &self.kind)
            .field("speed", &self.speed)
            .field("connected", &self.is_connected())
            .finish()
    }
}
