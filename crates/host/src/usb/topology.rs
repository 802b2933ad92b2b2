//! Hub/port tree and device registry
//!
//! A [`Topology`] owns the synthetic root hub and the registry of every
//! attached device, keyed by bus and address. The registry holds the strong
//! references; ports only point at devices weakly.
//!
//! Port allocation reuses the lowest-numbered free port before appending a
//! new one, so port numbers on a hub only ever grow.

use crate::usb::device::{Device, lock};
use common::HostController;
use protocol::DeviceKey;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

/// Registry key of the synthetic root hub
pub const ROOT_HUB_KEY: DeviceKey = DeviceKey::new(0, 0);

/// Slot on a hub holding at most one device
pub struct Port {
    number: u8,
    hub: Weak<Device>,
    device: Mutex<Option<Weak<Device>>>,
}

impl Port {
    fn new(number: u8, hub: Weak<Device>) -> Self {
        Self {
            number,
            hub,
            device: Mutex::new(None),
        }
    }

    /// 1-based port number on the hub
    pub fn number(&self) -> u8 {
        self.number
    }

    /// Hub owning this port
    pub fn hub(&self) -> Option<Arc<Device>> {
        self.hub.upgrade()
    }

    /// Device attached to this port
    pub fn device(&self) -> Option<Arc<Device>> {
        lock(&self.device).as_ref().and_then(Weak::upgrade)
    }

    pub fn is_free(&self) -> bool {
        self.device().is_none()
    }
}

impl std::fmt::Debug for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Port")
            .field("number", &self.number)
            .field("device", &self.device().map(|d| d.key()))
            .finish()
    }
}

/// Attach `device` to the first free port of `hub`, appending one if needed
///
/// Returns `None` when every port is taken and no further port number fits
/// in a `u8`.
pub(crate) fn attach(hub: &Arc<Device>, device: &Arc<Device>) -> Option<Arc<Port>> {
    let port = {
        let mut ports = lock(&hub.ports);
        match ports.iter().find(|p| p.is_free()) {
            Some(port) => port.clone(),
            None => {
                let number = u8::try_from(ports.len() + 1).ok()?;
                let port = Arc::new(Port::new(number, Arc::downgrade(hub)));
                ports.push(port.clone());
                port
            }
        }
    };

    *lock(&port.device) = Some(Arc::downgrade(device));
    *lock(&device.parent) = Some(Arc::downgrade(&port));
    Some(port)
}

/// Detach `device` from its port, returning the freed port
pub(crate) fn detach(device: &Device) -> Option<Arc<Port>> {
    let port = lock(&device.parent).take().and_then(|p| p.upgrade())?;
    lock(&port.device).take();
    Some(port)
}

/// Device registry plus the root of the hub/port tree
pub struct Topology {
    root: Arc<Device>,
    registry: Mutex<HashMap<DeviceKey, Arc<Device>>>,
    host: Arc<dyn HostController>,
    transfer_timeout: Duration,
}

impl Topology {
    /// Empty topology; only the root hub exists
    pub fn new(host: Arc<dyn HostController>, transfer_timeout: Duration) -> Self {
        Self {
            root: Device::root_hub(host.clone(), transfer_timeout),
            registry: Mutex::new(HashMap::new()),
            host,
            transfer_timeout,
        }
    }

    pub fn root_hub(&self) -> Arc<Device> {
        self.root.clone()
    }

    /// Every registered device, ordered by bus and address
    pub fn devices(&self) -> Vec<Arc<Device>> {
        let mut devices: Vec<_> = lock(&self.registry).values().cloned().collect();
        devices.sort_by_key(|d| d.key());
        devices
    }

    pub fn find(&self, key: DeviceKey) -> Option<Arc<Device>> {
        lock(&self.registry).get(&key).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.registry).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn host(&self) -> &Arc<dyn HostController> {
        &self.host
    }

    pub(crate) fn transfer_timeout(&self) -> Duration {
        self.transfer_timeout
    }

    /// Registry guard held by a scan for its whole pass
    pub(crate) fn registry(&self) -> MutexGuard<'_, HashMap<DeviceKey, Arc<Device>>> {
        lock(&self.registry)
    }
}
