//! Entry point tying topology, scanner and events together

use crate::error::{Result, UsbError};
use crate::usb::device::Device;
use crate::usb::scanner::{ScanReport, TopologyScanner};
use crate::usb::topology::Topology;
use async_channel::Receiver;
use common::{HostController, Subscribers, TopologyEvent};
use protocol::{DeviceKey, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Runtime settings for [`UsbServices`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSettings {
    /// Background scan interval; zero disables periodic scanning
    pub scan_interval: Duration,
    /// Run one scan synchronously in [`UsbServices::start`]
    pub scan_on_start: bool,
    /// Host-controller timeout for each transfer
    pub transfer_timeout: Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(1),
            scan_on_start: true,
            transfer_timeout: Duration::from_secs(5),
        }
    }
}

/// USB services for one host controller
///
/// Owns the device topology, the scanner and the event fan-out. Creating it
/// has no side effects; nothing is enumerated until [`UsbServices::scan`] or
/// [`UsbServices::start`].
pub struct UsbServices {
    topology: Arc<Topology>,
    events: Arc<Subscribers<TopologyEvent>>,
    scanner: TopologyScanner,
    settings: ServiceSettings,
}

impl UsbServices {
    pub fn new(host: Arc<dyn HostController>, settings: ServiceSettings) -> Self {
        let topology = Arc::new(Topology::new(host, settings.transfer_timeout));
        let events = Arc::new(Subscribers::new());
        let scanner = TopologyScanner::new(topology.clone(), events.clone(), settings.scan_interval);

        Self {
            topology,
            events,
            scanner,
            settings,
        }
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    pub fn root_hub(&self) -> Arc<Device> {
        self.topology.root_hub()
    }

    /// Attached devices ordered by bus and address
    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.topology.devices()
    }

    pub fn find_device(&self, key: DeviceKey) -> Result<Arc<Device>> {
        self.topology
            .find(key)
            .ok_or(UsbError::Disconnected(key))
    }

    /// Receive every attach and detach from now on
    pub fn subscribe(&self) -> Receiver<TopologyEvent> {
        self.events.subscribe()
    }

    pub fn scan(&self) -> std::result::Result<ScanReport, TransportError> {
        self.scanner.scan()
    }

    /// Optionally scan once, then start periodic scanning
    pub fn start(&self) -> common::Result<()> {
        if self.settings.scan_on_start
            && let Err(e) = self.scanner.scan()
        {
            warn!("Initial topology scan failed: {}", e);
        }
        self.scanner.start()?;
        info!("USB services started");
        Ok(())
    }

    /// Stop the scanner; attached devices stay registered
    pub fn stop(&self) {
        self.scanner.stop();
        info!("USB services stopped");
    }

    pub fn is_running(&self) -> bool {
        self.scanner.is_running()
    }
}
