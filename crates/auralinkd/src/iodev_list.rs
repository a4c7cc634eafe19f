//! Main-thread device list: the enumeration of known devices, their selection
//! state, and an observer list for reattach notifications.
//!
//! This is the "selection policy input" spec.md §3 "Device (`IoDev`)"
//! treats as external to the engine core — the engine only ever sees a
//! `DeviceId` once `IoDevList` hands one to it via `EngineRequest::AddDevice`
//!. Device *selection policy* (which device is
//! "default") stays out of scope per spec.md §1; this module only tracks
//! what exists and notifies observers when that changes.

use auralink_engine::DeviceId;
use auralink_iodev::Direction;

/// What the main thread knows about one registered device, independent of
/// the engine's own internal `DeviceSlot` bookkeeping.
#[derive(Debug, Clone)]
pub struct IoDevInfo {
    pub id: DeviceId,
    pub name: String,
    pub direction: Direction,
}

/// Events an `IoDevList` observer may receive, delivered synchronously
/// from the main thread when device state changes.
#[derive(Debug, Clone)]
pub enum ObserverEvent {
    DeviceAdded(IoDevInfo),
    /// A device was removed while streams may still have been attached
    ///; observers use this to trigger
    /// `STREAM_REATTACH` fan-out to affected clients.
    DeviceRemoved(DeviceId),
}

/// Owned, main-thread-only registry of known devices.
#[derive(Default)]
pub struct IoDevList {
    devices: Vec<IoDevInfo>,
    observers: Vec<Box<dyn Fn(&ObserverEvent) + Send>>,
}

impl IoDevList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_observer(&mut self, observer: Box<dyn Fn(&ObserverEvent) + Send>) {
        self.observers.push(observer);
    }

    pub fn register(&mut self, info: IoDevInfo) {
        tracing::info!(device_id = info.id.0, name = %info.name, "device registered");
        let event = ObserverEvent::DeviceAdded(info.clone());
        self.devices.push(info);
        self.notify(&event);
    }

    pub fn unregister(&mut self, id: DeviceId) {
        self.devices.retain(|d| d.id != id);
        tracing::info!(device_id = id.0, "device unregistered");
        self.notify(&ObserverEvent::DeviceRemoved(id));
    }

    pub fn devices(&self) -> &[IoDevInfo] {
        &self.devices
    }

    /// Devices matching `direction`, in registration order — the only
    /// observable property of this list.
    pub fn by_direction(&self, direction: Direction) -> impl Iterator<Item = &IoDevInfo> {
        self.devices.iter().filter(move |d| d.direction == direction)
    }

    fn notify(&self, event: &ObserverEvent) {
        for observer in &self.observers {
            observer(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn info(id: u32, direction: Direction) -> IoDevInfo {
        IoDevInfo {
            id: DeviceId(id),
            name: format!("dev-{id}"),
            direction,
        }
    }

    #[test]
    fn register_preserves_insertion_order() {
        let mut list = IoDevList::new();
        list.register(info(2, Direction::Out));
        list.register(info(1, Direction::Out));
        let ids: Vec<_> = list.devices().iter().map(|d| d.id.0).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn unregister_notifies_observers() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = seen.clone();
        let mut list = IoDevList::new();
        list.add_observer(Box::new(move |event| {
            seen_cb.lock().unwrap().push(format!("{event:?}"));
        }));
        list.register(info(5, Direction::In));
        list.unregister(DeviceId(5));
        assert!(list.devices().is_empty());
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn by_direction_filters() {
        let mut list = IoDevList::new();
        list.register(info(1, Direction::Out));
        list.register(info(2, Direction::In));
        let outs: Vec<_> = list.by_direction(Direction::Out).map(|d| d.id.0).collect();
        assert_eq!(outs, vec![1]);
    }
}
