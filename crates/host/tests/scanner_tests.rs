//! Topology Scanner Integration Tests
//!
//! Drives the scanner against a scripted host controller.
//!
//! # Test Scenarios
//! - Steady state: repeated scans change nothing
//! - Attach order across hubs and port allocation
//! - Detach of devices and whole subtrees, port reuse
//! - Enumeration failures, skipped entries and relocated devices
//! - Background scanning lifecycle
//! - Concurrent scans and removal of busy devices
//!
//! Run with: `cargo test -p host --test scanner_tests`

use async_channel::Receiver;
use common::TopologyEvent;
use common::test_utils::{
    DEFAULT_TEST_TIMEOUT, MockHostController, create_mock_device_record, create_mock_hub_record,
    create_mock_root_hub_record, with_timeout,
};
use host::UsbError;
use host::usb::{Irp, ROOT_HUB_KEY, ServiceSettings, UsbServices};
use protocol::{DeviceKey, DeviceKind, TransportError};
use std::sync::{Arc, Barrier, mpsc};
use std::thread;
use std::time::{Duration, Instant};

fn services_with(mock: &Arc<MockHostController>, interval: Duration) -> UsbServices {
    UsbServices::new(
        mock.clone(),
        ServiceSettings {
            scan_interval: interval,
            scan_on_start: false,
            transfer_timeout: DEFAULT_TEST_TIMEOUT,
        },
    )
}

fn drain(events: &Receiver<TopologyEvent>) -> Vec<TopologyEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

fn keys(events: &[TopologyEvent]) -> Vec<(bool, DeviceKey)> {
    events
        .iter()
        .map(|e| (e.is_attached(), e.identity().key()))
        .collect()
}

// ============================================================================
// Steady State Tests
// ============================================================================

mod steady_state {
    use super::*;

    #[test]
    fn test_empty_scan() {
        let mock = Arc::new(MockHostController::new());
        let services = services_with(&mock, Duration::ZERO);
        let events = services.subscribe();

        let report = services.scan().unwrap();

        assert!(report.is_unchanged());
        assert_eq!(report.skipped, 0);
        assert!(drain(&events).is_empty());
        assert_eq!(services.root_hub().port_count(), 0);
    }

    #[test]
    fn test_noop_scan_emits_nothing() {
        let root = create_mock_root_hub_record(1);
        let hub = create_mock_hub_record(1, 2, root.key(), 1);
        let device = create_mock_device_record(1, 3, hub.key(), 2);
        let mock = Arc::new(MockHostController::with_devices(vec![root, hub, device]));
        let services = services_with(&mock, Duration::ZERO);
        let events = services.subscribe();

        services.scan().unwrap();
        assert_eq!(drain(&events).len(), 3);
        let before: Vec<_> = services.devices().iter().map(|d| d.key()).collect();

        let report = services.scan().unwrap();

        assert!(report.is_unchanged());
        assert!(drain(&events).is_empty());
        let after: Vec<_> = services.devices().iter().map(|d| d.key()).collect();
        assert_eq!(before, after);
        assert_eq!(mock.enumeration_count(), 2);
    }
}

// ============================================================================
// Attach Tests
// ============================================================================

mod attach {
    use super::*;

    #[test]
    fn test_hub_then_device_order() {
        let mock = Arc::new(MockHostController::new());
        let services = services_with(&mock, Duration::ZERO);
        let events = services.subscribe();
        services.scan().unwrap();
        let ports_before = services.root_hub().port_count();

        let hub = create_mock_hub_record(1, 4, DeviceKey::new(1, 1), 1);
        let hub_key = hub.key();
        let mut hub_at_root = hub.clone();
        hub_at_root.parent = None;
        let device = create_mock_device_record(1, 5, hub_key, 1);
        mock.set_devices(vec![hub_at_root, device.clone()]);

        let report = services.scan().unwrap();
        let events = drain(&events);

        assert_eq!(report.attached.len(), 2);
        assert_eq!(
            events,
            vec![
                TopologyEvent::Attached {
                    identity: hub.identity.clone(),
                    kind: DeviceKind::Hub,
                    parent: None,
                    port: 1,
                },
                TopologyEvent::Attached {
                    identity: device.identity.clone(),
                    kind: DeviceKind::Device,
                    parent: Some(hub_key),
                    port: 1,
                },
            ]
        );
        assert_eq!(services.root_hub().port_count(), ports_before + 1);
    }

    #[test]
    fn test_siblings_attach_in_port_order() {
        let root = create_mock_root_hub_record(1);
        let mock = Arc::new(MockHostController::with_devices(vec![
            create_mock_device_record(1, 7, root.key(), 3),
            create_mock_device_record(1, 8, root.key(), 1),
            create_mock_device_record(1, 6, root.key(), 2),
            root.clone(),
        ]));
        let services = services_with(&mock, Duration::ZERO);
        let events = services.subscribe();

        services.scan().unwrap();

        assert_eq!(
            keys(&drain(&events)),
            vec![
                (true, root.key()),
                (true, DeviceKey::new(1, 8)),
                (true, DeviceKey::new(1, 6)),
                (true, DeviceKey::new(1, 7)),
            ]
        );

        let root_hub = services.find_device(root.key()).unwrap();
        let ports: Vec<_> = root_hub
            .ports()
            .iter()
            .map(|p| (p.number(), p.device().unwrap().key()))
            .collect();
        assert_eq!(
            ports,
            vec![
                (1, DeviceKey::new(1, 8)),
                (2, DeviceKey::new(1, 6)),
                (3, DeviceKey::new(1, 7)),
            ]
        );
    }

    #[test]
    fn test_new_hub_populated_before_next_sibling() {
        let root = create_mock_root_hub_record(1);
        let hub = create_mock_hub_record(1, 2, root.key(), 1);
        let below_hub = create_mock_device_record(1, 3, hub.key(), 1);
        let sibling = create_mock_device_record(1, 4, root.key(), 2);
        let mock = Arc::new(MockHostController::with_devices(vec![
            sibling.clone(),
            below_hub.clone(),
            hub.clone(),
            root.clone(),
        ]));
        let services = services_with(&mock, Duration::ZERO);
        let events = services.subscribe();

        services.scan().unwrap();

        assert_eq!(
            keys(&drain(&events)),
            vec![
                (true, root.key()),
                (true, hub.key()),
                (true, below_hub.key()),
                (true, sibling.key()),
            ]
        );
    }

    #[test]
    fn test_grandchild_of_existing_hub() {
        let root = create_mock_root_hub_record(1);
        let hub = create_mock_hub_record(1, 2, root.key(), 1);
        let mock = Arc::new(MockHostController::with_devices(vec![
            root.clone(),
            hub.clone(),
        ]));
        let services = services_with(&mock, Duration::ZERO);
        services.scan().unwrap();
        let events = services.subscribe();

        mock.add_device(create_mock_device_record(1, 9, hub.key(), 4));
        let report = services.scan().unwrap();

        assert_eq!(report.attached.len(), 1);
        assert_eq!(
            keys(&drain(&events)),
            vec![(true, DeviceKey::new(1, 9))]
        );

        let device = services.find_device(DeviceKey::new(1, 9)).unwrap();
        assert_eq!(device.parent_hub().unwrap().key(), hub.key());
        assert_eq!(device.parent_port().unwrap().number(), 1);
    }

    #[test]
    fn test_tree_links() {
        let root = create_mock_root_hub_record(1);
        let hub = create_mock_hub_record(1, 2, root.key(), 1);
        let device = create_mock_device_record(1, 3, hub.key(), 1);
        let mock = Arc::new(MockHostController::with_devices(vec![
            root.clone(),
            hub.clone(),
            device.clone(),
        ]));
        let services = services_with(&mock, Duration::ZERO);
        services.scan().unwrap();

        let bus_root = services.find_device(root.key()).unwrap();
        assert_eq!(bus_root.kind(), DeviceKind::Hub);
        assert_eq!(bus_root.parent_hub().unwrap().key(), ROOT_HUB_KEY);
        assert_eq!(services.root_hub().kind(), DeviceKind::RootHub);

        let hub_device = services.find_device(hub.key()).unwrap();
        let children = hub_device.attached_devices();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].key(), device.key());
        assert!(children[0].ports().is_empty());
    }
}

// ============================================================================
// Detach Tests
// ============================================================================

mod detach {
    use super::*;

    #[test]
    fn test_device_removed_port_reused() {
        let root = create_mock_root_hub_record(1);
        let hub = create_mock_hub_record(1, 2, root.key(), 1);
        let b = create_mock_device_record(1, 3, hub.key(), 1);
        let mock = Arc::new(MockHostController::with_devices(vec![
            root.clone(),
            hub.clone(),
            b.clone(),
        ]));
        let services = services_with(&mock, Duration::ZERO);
        services.scan().unwrap();
        let events = services.subscribe();

        mock.remove_device(b.key());
        let report = services.scan().unwrap();

        assert_eq!(report.detached, vec![b.identity.clone()]);
        assert_eq!(
            drain(&events),
            vec![TopologyEvent::Detached {
                identity: b.identity.clone(),
                kind: DeviceKind::Device,
                parent: Some(hub.key()),
                port: 1,
            }]
        );
        let hub_device = services.find_device(hub.key()).unwrap();
        assert!(hub_device.is_connected());
        assert!(hub_device.port(1).unwrap().is_free());

        mock.add_device(create_mock_device_record(1, 4, hub.key(), 3));
        services.scan().unwrap();

        let attached = services.find_device(DeviceKey::new(1, 4)).unwrap();
        assert_eq!(attached.parent_port().unwrap().number(), 1);
        assert_eq!(hub_device.port_count(), 1);
    }

    #[test]
    fn test_subtree_detached_deepest_first() {
        let root = create_mock_root_hub_record(1);
        let hub = create_mock_hub_record(1, 2, root.key(), 1);
        let inner_hub = create_mock_hub_record(1, 3, hub.key(), 1);
        let leaf = create_mock_device_record(1, 4, inner_hub.key(), 1);
        let other = create_mock_device_record(1, 5, hub.key(), 2);
        let mock = Arc::new(MockHostController::with_devices(vec![
            root.clone(),
            hub.clone(),
            inner_hub.clone(),
            leaf.clone(),
            other.clone(),
        ]));
        let services = services_with(&mock, Duration::ZERO);
        services.scan().unwrap();
        let events = services.subscribe();
        let removed_leaf = services.find_device(leaf.key()).unwrap();

        mock.set_devices(vec![root.clone()]);
        services.scan().unwrap();

        assert_eq!(
            keys(&drain(&events)),
            vec![
                (false, leaf.key()),
                (false, inner_hub.key()),
                (false, other.key()),
                (false, hub.key()),
            ]
        );
        assert_eq!(services.devices().len(), 1);
        assert!(!removed_leaf.is_connected());
        assert!(removed_leaf.parent_port().is_none());
    }

    #[test]
    fn test_removed_device_is_disconnected() {
        let root = create_mock_root_hub_record(1);
        let device = create_mock_device_record(1, 2, root.key(), 1);
        let mock = Arc::new(MockHostController::with_devices(vec![
            root.clone(),
            device.clone(),
        ]));
        let services = services_with(&mock, Duration::ZERO);
        services.scan().unwrap();

        let handle = services.find_device(device.key()).unwrap();
        handle.open().unwrap();
        let pipe = handle.control_pipe().unwrap();

        mock.remove_device(device.key());
        services.scan().unwrap();

        assert!(!mock.is_open(device.key()));
        assert!(pipe.is_closed());
        assert_eq!(
            handle.open().unwrap_err(),
            UsbError::Disconnected(device.key())
        );
        assert_eq!(
            services.find_device(device.key()).unwrap_err(),
            UsbError::Disconnected(device.key())
        );
    }

    #[test]
    fn test_relocated_device_is_readded() {
        let root = create_mock_root_hub_record(1);
        let hub = create_mock_hub_record(1, 2, root.key(), 1);
        let device = create_mock_device_record(1, 3, hub.key(), 1);
        let mock = Arc::new(MockHostController::with_devices(vec![
            root.clone(),
            hub.clone(),
            device.clone(),
        ]));
        let services = services_with(&mock, Duration::ZERO);
        services.scan().unwrap();
        let events = services.subscribe();

        let mut moved = device.clone();
        moved.parent = Some(root.key());
        mock.set_devices(vec![root.clone(), hub.clone(), moved]);
        services.scan().unwrap();

        assert_eq!(
            keys(&drain(&events)),
            vec![(false, device.key()), (true, device.key())]
        );
        let relocated = services.find_device(device.key()).unwrap();
        assert_eq!(relocated.parent_hub().unwrap().key(), root.key());
    }
}

// ============================================================================
// Failure Tests
// ============================================================================

mod failures {
    use super::*;

    #[test]
    fn test_enumeration_failure_leaves_topology() {
        let root = create_mock_root_hub_record(1);
        let device = create_mock_device_record(1, 2, root.key(), 1);
        let mock = Arc::new(MockHostController::with_devices(vec![
            root.clone(),
            device.clone(),
        ]));
        let services = services_with(&mock, Duration::ZERO);
        services.scan().unwrap();
        let events = services.subscribe();

        mock.set_devices(Vec::new());
        mock.fail_next_enumeration(TransportError::Io);

        assert_eq!(services.scan().unwrap_err(), TransportError::Io);
        assert!(drain(&events).is_empty());
        assert_eq!(services.devices().len(), 2);
    }

    #[test]
    fn test_broken_entry_skipped() {
        let root = create_mock_root_hub_record(1);
        let good = create_mock_device_record(1, 2, root.key(), 1);
        let broken = create_mock_device_record(1, 3, root.key(), 2);
        let mock = Arc::new(MockHostController::with_devices(vec![
            root.clone(),
            good.clone(),
            broken.clone(),
        ]));
        mock.break_device(broken.key());
        let services = services_with(&mock, Duration::ZERO);

        let report = services.scan().unwrap();

        assert_eq!(report.attached.len(), 2);
        assert_eq!(report.skipped, 1);
        assert!(services.find_device(broken.key()).is_err());

        mock.repair_device(broken.key());
        let report = services.scan().unwrap();
        assert_eq!(report.attached, vec![broken.identity.clone()]);
    }

    #[test]
    fn test_broken_hub_hides_children() {
        let root = create_mock_root_hub_record(1);
        let hub = create_mock_hub_record(1, 2, root.key(), 1);
        let child = create_mock_device_record(1, 3, hub.key(), 1);
        let mock = Arc::new(MockHostController::with_devices(vec![
            root.clone(),
            hub.clone(),
            child.clone(),
        ]));
        mock.break_device(hub.key());
        let services = services_with(&mock, Duration::ZERO);

        let report = services.scan().unwrap();

        assert_eq!(report.attached, vec![root.identity.clone()]);
        assert_eq!(report.skipped, 2);
    }
}

// ============================================================================
// Background Scanning Tests
// ============================================================================

mod background {
    use super::*;

    #[tokio::test]
    async fn test_background_scan_reports_attach() {
        let mock = Arc::new(MockHostController::new());
        let services = services_with(&mock, Duration::from_millis(20));
        let events = services.subscribe();

        services.start().unwrap();
        assert!(services.is_running());

        mock.add_device(create_mock_root_hub_record(2));
        let event = with_timeout(DEFAULT_TEST_TIMEOUT, events.recv())
            .await
            .expect("no attach event")
            .unwrap();

        assert!(event.is_attached());
        assert_eq!(event.identity().key(), DeviceKey::new(2, 1));

        services.stop();
        assert!(!services.is_running());
    }

    #[test]
    fn test_zero_interval_disables_thread() {
        let mock = Arc::new(MockHostController::with_devices(vec![
            create_mock_root_hub_record(1),
        ]));
        let services = services_with(&mock, Duration::ZERO);

        services.start().unwrap();

        assert!(!services.is_running());
        assert_eq!(services.scan().unwrap().attached.len(), 1);
    }

    #[test]
    fn test_start_twice_and_stop() {
        let mock = Arc::new(MockHostController::new());
        let services = services_with(&mock, Duration::from_millis(10));

        services.start().unwrap();
        services.start().unwrap();
        assert!(services.is_running());

        services.stop();
        services.stop();
        assert!(!services.is_running());
    }

    #[test]
    fn test_scan_on_start() {
        let mock = Arc::new(MockHostController::with_devices(vec![
            create_mock_root_hub_record(1),
        ]));
        let services = UsbServices::new(
            mock.clone(),
            ServiceSettings {
                scan_interval: Duration::ZERO,
                scan_on_start: true,
                transfer_timeout: DEFAULT_TEST_TIMEOUT,
            },
        );

        services.start().unwrap();

        assert_eq!(mock.enumeration_count(), 1);
        assert_eq!(services.devices().len(), 1);
    }
}

// ============================================================================
// Concurrency Tests
// ============================================================================

mod concurrency {
    use super::*;

    #[test]
    fn test_concurrent_scans_serialize() {
        let root = create_mock_root_hub_record(1);
        let hub = create_mock_hub_record(1, 2, root.key(), 1);
        let a = create_mock_device_record(1, 3, hub.key(), 1);
        let b = create_mock_device_record(1, 4, root.key(), 2);
        let mock = Arc::new(MockHostController::with_devices(vec![root, hub, a, b]));
        mock.set_enumeration_delay(Duration::from_millis(20));
        let services = Arc::new(services_with(&mock, Duration::ZERO));
        let events = services.subscribe();

        let start = Arc::new(Barrier::new(6));
        let scans: Vec<_> = (0..6)
            .map(|_| {
                let services = services.clone();
                let start = start.clone();
                thread::spawn(move || {
                    start.wait();
                    services.scan()
                })
            })
            .collect();

        let attached: usize = scans
            .into_iter()
            .map(|scan| scan.join().unwrap().unwrap().attached.len())
            .sum();

        assert_eq!(attached, 4);
        assert_eq!(mock.max_concurrent_enumerations(), 1);
        assert_eq!(mock.enumeration_count(), 6);
        assert_eq!(services.devices().len(), 4);

        let emitted = drain(&events);
        assert_eq!(emitted.len(), 4);
        assert!(emitted.iter().all(|e| e.is_attached()));
    }

    #[test]
    fn test_removal_not_blocked_by_stuck_transfer() {
        let root = create_mock_root_hub_record(1);
        let record = create_mock_device_record(1, 2, root.key(), 1);
        let key = record.key();
        let mock = Arc::new(MockHostController::with_devices(vec![root, record]));
        let services = Arc::new(services_with(&mock, Duration::ZERO));
        services.scan().unwrap();

        let device = services.find_device(key).unwrap();
        let pipe = device.control_pipe().unwrap();
        mock.hold_transfers();
        mock.ignore_cancel();
        let irp = Irp::control(0x80, 0x08, 0, 0, vec![0; 1]).unwrap();
        pipe.submit_async(&irp).unwrap();
        assert!(mock.wait_for_in_flight(1, DEFAULT_TEST_TIMEOUT));

        mock.remove_device(key);
        let (done, finished) = mpsc::channel();
        let scan = {
            let services = services.clone();
            thread::spawn(move || {
                let report = services.scan();
                let _ = done.send(());
                report
            })
        };

        let scanned = finished.recv_timeout(Duration::from_secs(1));
        let lookup = Instant::now();
        let remaining = services.devices();
        let lookup = lookup.elapsed();
        let transfer_still_running = !irp.is_complete();
        mock.release_transfers();

        assert!(scanned.is_ok(), "scan waited for the stuck transfer");
        assert!(lookup < Duration::from_secs(1));
        assert!(transfer_still_running);
        assert!(remaining.is_empty());

        let report = scan.join().unwrap().unwrap();
        assert_eq!(report.detached.len(), 1);
        assert_eq!(report.detached[0].key(), key);
        assert!(!device.is_connected());
        assert!(pipe.is_closed());
        assert!(mock.cancel_count() >= 1);

        assert!(irp.wait_until_complete(Some(DEFAULT_TEST_TIMEOUT)));
        let late = Irp::control(0x80, 0x08, 0, 0, vec![0; 1]).unwrap();
        assert_eq!(
            pipe.submit_async(&late),
            Err(UsbError::Disconnected(key))
        );
    }
}
