//! Registry bookkeeping and observer dispatch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tethercap_common::error::TethercapResult;

use crate::backend::{DeviceBackend, DeviceEvent};
use crate::device::Device;

/// Observer contract for device lifecycle transitions.
///
/// Callbacks fire exactly once per eligible transition, after the
/// registry's own bookkeeping has been updated and outside its lock, so
/// an observer reading back through the registry always sees consistent
/// state.
pub trait DeviceObserver: Send + Sync {
    fn attached(&self, device: &Device);
    fn detached(&self, device: &Device);
}

/// Tracks the set of currently-attached eligible devices.
///
/// Cloning is cheap; all clones share the same underlying state.
#[derive(Clone)]
pub struct DeviceRegistry {
    shared: Arc<Shared>,
}

struct Shared {
    /// Devices with an unmatched Found, keyed by stable id.
    known: Mutex<HashMap<String, Device>>,
    observers: Mutex<Vec<Arc<dyn DeviceObserver>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                known: Mutex::new(HashMap::new()),
                observers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register an observer for subsequent Found/Lost events. Additive.
    pub fn subscribe(&self, observer: Arc<dyn DeviceObserver>) {
        self.shared.observers.lock().unwrap().push(observer);
    }

    /// Remove a previously registered observer (matched by identity).
    pub fn unsubscribe(&self, observer: &Arc<dyn DeviceObserver>) {
        self.shared
            .observers
            .lock()
            .unwrap()
            .retain(|o| !Arc::ptr_eq(o, observer));
    }

    /// Snapshot of currently attached eligible devices.
    pub fn attached(&self) -> Vec<Device> {
        self.shared.known.lock().unwrap().values().cloned().collect()
    }

    /// Activate the registry against a platform backend.
    ///
    /// Runs the idempotent allow-capture step, seeds the registry from the
    /// devices already attached (emitting one Found each), then forwards
    /// hot-plug events for as long as the backend produces them. The
    /// backend is moved into the forwarding task to keep its watch alive.
    pub fn activate(&self, mut backend: Box<dyn DeviceBackend>) -> TethercapResult<()> {
        if let Err(e) = backend.allow_capture_devices() {
            // Non-fatal: enumeration proceeds, eligible devices may just
            // not show up in it.
            tracing::warn!(error = %e, "Allow-capture platform step failed");
        }

        for device in backend.enumerate()? {
            self.handle_event(DeviceEvent::Found(device));
        }

        let mut events = backend.watch()?;
        let registry = self.clone();
        tokio::spawn(async move {
            let _backend = backend;
            while let Some(event) = events.recv().await {
                registry.handle_event(event);
            }
            tracing::debug!("Device backend event stream closed");
        });

        Ok(())
    }

    /// Apply one raw backend event: filter, de-duplicate, dispatch.
    pub(crate) fn handle_event(&self, event: DeviceEvent) {
        match event {
            DeviceEvent::Found(device) => {
                if !device.is_eligible() {
                    tracing::trace!(%device, model = %device.model, "Ignoring ineligible device");
                    return;
                }
                {
                    let mut known = self.shared.known.lock().unwrap();
                    if known.contains_key(&device.id) {
                        tracing::debug!(%device, "Duplicate Found for known device, ignoring");
                        return;
                    }
                    known.insert(device.id.clone(), device.clone());
                }
                tracing::info!(%device, "Device attached");
                for observer in self.observers_snapshot() {
                    observer.attached(&device);
                }
            }
            DeviceEvent::Lost(device) => {
                let removed = self.shared.known.lock().unwrap().remove(&device.id);
                if removed.is_none() {
                    // Detach of a device never reported Found. Swallowed.
                    tracing::debug!(%device, "Spurious Lost event, ignoring");
                    return;
                }
                tracing::info!(%device, "Device detached");
                for observer in self.observers_snapshot() {
                    observer.detached(&device);
                }
            }
        }
    }

    fn observers_snapshot(&self) -> Vec<Arc<dyn DeviceObserver>> {
        self.shared.observers.lock().unwrap().clone()
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
