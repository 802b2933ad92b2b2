//! Topology scanner
//!
//! Reconciles the host controller's flat device list against the hub/port
//! tree. Each pass runs a removal pass then an addition pass, both depth-first
//! from the root hub:
//!
//! - removal: any attached device no longer reported (or reported under a
//!   different parent) is detached together with its whole subtree, deepest
//!   first, and a `Detached` event is emitted for each
//! - addition: reported devices not yet attached are attached below their
//!   parent in `(port_number, bus, address)` order; a new hub is populated
//!   before its next sibling, and existing hubs are revisited so new
//!   grandchildren are found
//!
//! A pass holds the registry lock throughout, so concurrent scans serialize.
//! Removed devices are marked disconnected during the pass; their pipes and
//! handles are released after the lock is dropped. A scanner can also run on
//! its own thread at a fixed interval.

use crate::usb::device::{Device, lock};
use crate::usb::topology::{self, ROOT_HUB_KEY, Topology};
use common::{DeviceRecord, HostController, Subscribers, TopologyEvent};
use protocol::{DeviceIdentity, DeviceKey, TransportError};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of one scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Devices attached by this scan, in attach order
    pub attached: Vec<DeviceIdentity>,
    /// Devices detached by this scan, in detach order
    pub detached: Vec<DeviceIdentity>,
    /// Entries that failed to enumerate or whose parent was absent
    pub skipped: usize,
}

impl ScanReport {
    /// No attach or detach happened
    pub fn is_unchanged(&self) -> bool {
        self.attached.is_empty() && self.detached.is_empty()
    }
}

type Registry = HashMap<DeviceKey, Arc<Device>>;

fn parent_of(record: &DeviceRecord) -> DeviceKey {
    record.parent.unwrap_or(ROOT_HUB_KEY)
}

fn event_parent(hub: &Device) -> Option<DeviceKey> {
    (hub.key() != ROOT_HUB_KEY).then(|| hub.key())
}

/// State shared between the scanner handle and its background thread
struct ScanContext {
    topology: Arc<Topology>,
    events: Arc<Subscribers<TopologyEvent>>,
}

/// One reconciliation pass over a locked registry
struct Pass<'a> {
    registry: &'a mut Registry,
    records: HashMap<DeviceKey, DeviceRecord>,
    children: HashMap<DeviceKey, Vec<DeviceKey>>,
    host: &'a Arc<dyn HostController>,
    transfer_timeout: Duration,
    events: &'a Subscribers<TopologyEvent>,
    report: ScanReport,
    removed: Vec<Arc<Device>>,
}

impl Pass<'_> {
    fn remove_absent(&mut self, hub: &Arc<Device>) {
        for child in hub.attached_devices() {
            let still_here = self
                .records
                .get(&child.key())
                .is_some_and(|r| parent_of(r) == hub.key());

            if !still_here {
                self.detach_subtree(hub, &child);
            } else if child.kind().has_ports() {
                self.remove_absent(&child);
            }
        }
    }

    fn detach_subtree(&mut self, hub: &Arc<Device>, device: &Arc<Device>) {
        for child in device.attached_devices() {
            self.detach_subtree(device, &child);
        }

        let port = topology::detach(device).map(|p| p.number()).unwrap_or(0);
        self.registry.remove(&device.key());
        device.mark_disconnected();

        debug!("Detached {} from port {} of {}", device.identity(), port, hub.key());
        self.events.emit(TopologyEvent::Detached {
            identity: device.identity().clone(),
            kind: device.kind(),
            parent: event_parent(hub),
            port,
        });
        self.report.detached.push(device.identity().clone());
        self.removed.push(device.clone());
    }

    fn add_present(&mut self, hub: &Arc<Device>) {
        let existing: Vec<_> = hub
            .attached_devices()
            .into_iter()
            .filter(|d| d.kind().has_ports())
            .collect();

        let children = self.children.get(&hub.key()).cloned().unwrap_or_default();
        for key in children {
            if self.registry.contains_key(&key) {
                continue;
            }
            let Some(record) = self.records.get(&key) else {
                continue;
            };

            let device = Device::from_record(record, self.host.clone(), self.transfer_timeout);
            let Some(port) = topology::attach(hub, &device) else {
                warn!("No free port number on {} for {}", hub.key(), device.identity());
                continue;
            };
            self.registry.insert(key, device.clone());

            debug!(
                "Attached {} to port {} of {}",
                device.identity(),
                port.number(),
                hub.key()
            );
            self.events.emit(TopologyEvent::Attached {
                identity: device.identity().clone(),
                kind: device.kind(),
                parent: event_parent(hub),
                port: port.number(),
            });
            self.report.attached.push(device.identity().clone());

            if device.kind().has_ports() {
                self.add_present(&device);
            }
        }

        for child in existing {
            self.add_present(&child);
        }
    }
}

impl ScanContext {
    fn scan(&self) -> Result<ScanReport, TransportError> {
        let host = self.topology.host();
        let mut registry = self.topology.registry();

        let entries = host.enumerate()?;

        let mut report = ScanReport::default();
        let mut records = HashMap::new();
        for entry in entries {
            match entry {
                Ok(record) => {
                    records.insert(record.key(), record);
                }
                Err(e) => {
                    warn!("Skipping device: {}", e);
                    report.skipped += 1;
                }
            }
        }

        let mut children: HashMap<DeviceKey, Vec<DeviceKey>> = HashMap::new();
        let mut ordered: Vec<&DeviceRecord> = records.values().collect();
        ordered.sort_by_key(|r| (r.identity.port_number, r.identity.bus_number, r.identity.address));
        for record in ordered {
            children.entry(parent_of(record)).or_default().push(record.key());
        }

        let root = self.topology.root_hub();
        let mut pass = Pass {
            registry: &mut registry,
            records,
            children,
            host,
            transfer_timeout: self.topology.transfer_timeout(),
            events: &self.events,
            report,
            removed: Vec::new(),
        };
        pass.remove_absent(&root);
        pass.add_present(&root);

        let orphans: HashSet<DeviceKey> = pass
            .records
            .keys()
            .filter(|key| !pass.registry.contains_key(key))
            .copied()
            .collect();
        for key in &orphans {
            debug!("Skipping {}: not attached to the tree", key);
        }
        pass.report.skipped += orphans.len();

        let Pass { report, removed, .. } = pass;
        drop(registry);

        for device in &removed {
            device.release_removed();
        }
        Ok(report)
    }
}

struct ScanWorker {
    stop: Arc<(Mutex<bool>, Condvar)>,
    handle: JoinHandle<()>,
}

/// Reconciles the topology against the host controller
///
/// Construction has no side effects; call [`TopologyScanner::scan`] for a
/// single pass or [`TopologyScanner::start`] to scan periodically.
pub struct TopologyScanner {
    context: Arc<ScanContext>,
    interval: Duration,
    worker: Mutex<Option<ScanWorker>>,
}

impl TopologyScanner {
    /// `interval` of zero disables the background thread
    pub fn new(
        topology: Arc<Topology>,
        events: Arc<Subscribers<TopologyEvent>>,
        interval: Duration,
    ) -> Self {
        Self {
            context: Arc::new(ScanContext { topology, events }),
            interval,
            worker: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one reconciliation pass
    ///
    /// Fails only when the device list itself cannot be obtained, in which
    /// case the topology is left untouched.
    pub fn scan(&self) -> Result<ScanReport, TransportError> {
        let report = self.context.scan()?;
        if !report.is_unchanged() {
            info!(
                "Topology scan: {} attached, {} detached, {} skipped",
                report.attached.len(),
                report.detached.len(),
                report.skipped
            );
        }
        Ok(report)
    }

    pub fn is_running(&self) -> bool {
        lock(&self.worker).is_some()
    }

    /// Start scanning every `interval` on a background thread
    ///
    /// A no-op when already running or when the interval is zero.
    pub fn start(&self) -> common::Result<()> {
        if self.interval.is_zero() {
            info!("Periodic topology scanning disabled");
            return Ok(());
        }

        let mut worker = lock(&self.worker);
        if worker.is_some() {
            return Ok(());
        }

        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let handle = {
            let context = self.context.clone();
            let stop = stop.clone();
            let interval = self.interval;
            thread::Builder::new()
                .name("usb-scanner".to_string())
                .spawn(move || run_scanner(context, stop, interval))?
        };

        info!("Topology scanner started (interval {:?})", self.interval);
        *worker = Some(ScanWorker { stop, handle });
        Ok(())
    }

    /// Signal the background thread and wait for it to exit
    pub fn stop(&self) {
        let Some(worker) = lock(&self.worker).take() else {
            return;
        };

        {
            let (stopped, wake) = &*worker.stop;
            *lock(stopped) = true;
            wake.notify_all();
        }

        if worker.handle.join().is_err() {
            warn!("Topology scanner thread panicked");
        }
        info!("Topology scanner stopped");
    }
}

impl Drop for TopologyScanner {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_scanner(context: Arc<ScanContext>, stop: Arc<(Mutex<bool>, Condvar)>, interval: Duration) {
    let (stopped, wake) = &*stop;
    loop {
        {
            let guard = lock(stopped);
            let (guard, _) = wake
                .wait_timeout_while(guard, interval, |stopped| !*stopped)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if *guard {
                break;
            }
        }

        match context.scan() {
            Ok(report) if !report.is_unchanged() => debug!(
                "Background scan: {} attached, {} detached",
                report.attached.len(),
                report.detached.len()
            ),
            Ok(_) => {}
            Err(e) => warn!("Topology scan failed: {}", e),
        }
    }
}
