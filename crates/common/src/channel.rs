//! Topology event fan-out
//!
//! Listeners subscribe with [`Subscribers::subscribe`] and get their own
//! unbounded `async-channel` receiver. The scanner thread emits without
//! blocking; consumers may read blocking (`recv_blocking`) from a plain thread
//! or `.await` from a Tokio task.

use async_channel::{Receiver, Sender, TrySendError, unbounded};
use protocol::{DeviceIdentity, DeviceKey, DeviceKind};
use std::sync::{Mutex, PoisonError};

/// Attach/detach notification emitted by a topology scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyEvent {
    /// Device attached to a hub port
    Attached {
        /// Location and descriptor of the new device
        identity: DeviceIdentity,
        /// Device or hub
        kind: DeviceKind,
        /// Hub the device hangs off, `None` for the root hub
        parent: Option<DeviceKey>,
        /// Port slot on the parent hub
        port: u8,
    },

    /// Device detached from its port
    Detached {
        /// Identity of the removed device
        identity: DeviceIdentity,
        /// Device or hub
        kind: DeviceKind,
        /// Hub the device hung off, `None` for the root hub
        parent: Option<DeviceKey>,
        /// Port slot that became free
        port: u8,
    },
}

impl TopologyEvent {
    pub fn identity(&self) -> &DeviceIdentity {
        match self {
            TopologyEvent::Attached { identity, .. } | TopologyEvent::Detached { identity, .. } => {
                identity
            }
        }
    }

    pub fn is_attached(&self) -> bool {
        matches!(self, TopologyEvent::Attached { .. })
    }
}

/// Mutex-guarded list of listener channels
pub struct Subscribers<T> {
    senders: Mutex<Vec<Sender<T>>>,
}

impl<T: Clone> Subscribers<T> {
    pub fn new() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
        }
    }

    /// Register a new listener
    pub fn subscribe(&self) -> Receiver<T> {
        let (tx, rx) = unbounded();
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Deliver `event` to every live listener
    ///
    /// Listeners whose receiver has been dropped are pruned. Returns the
    /// number of listeners that got the event.
    pub fn emit(&self, event: T) -> usize {
        let mut senders = self.senders.lock().unwrap_or_else(PoisonError::into_inner);
        senders.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Closed(_)) => false,
        });
        senders.len()
    }

    /// Number of registered listeners (including ones not yet pruned)
    pub fn len(&self) -> usize {
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> Default for Subscribers<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::DeviceDescriptor;

    fn attached(address: u8) -> TopologyEvent {
        TopologyEvent::Attached {
            identity: DeviceIdentity::new(1, 1, address, DeviceDescriptor::default()),
            kind: DeviceKind::Device,
            parent: None,
            port: 1,
        }
    }

    #[test]
    fn test_every_listener_receives() {
        let subscribers = Subscribers::new();
        let first = subscribers.subscribe();
        let second = subscribers.subscribe();

        assert_eq!(subscribers.emit(attached(2)), 2);

        assert_eq!(first.try_recv().unwrap(), attached(2));
        assert_eq!(second.try_recv().unwrap(), attached(2));
    }

    #[test]
    fn test_dropped_listener_is_pruned() {
        let subscribers = Subscribers::new();
        let kept = subscribers.subscribe();
        drop(subscribers.subscribe());

        assert_eq!(subscribers.emit(attached(3)), 1);
        assert_eq!(subscribers.len(), 1);
        assert!(kept.try_recv().unwrap().is_attached());
    }

    #[tokio::test]
    async fn test_async_listener() {
        let subscribers = Subscribers::new();
        let rx = subscribers.subscribe();

        let handle = std::thread::spawn(move || {
            subscribers.emit(attached(4));
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.identity().address, 4);
        handle.join().unwrap();
    }
}
