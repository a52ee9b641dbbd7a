//! Platform backend interface for device discovery.

use tethercap_common::error::TethercapResult;
use tokio::sync::mpsc;

use crate::device::Device;

/// An attach/detach transition as reported by the platform.
///
/// Backends emit these raw and unfiltered; the registry applies the
/// eligibility filter and de-duplication before anything reaches an
/// observer.
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    Found(Device),
    Lost(Device),
}

impl DeviceEvent {
    pub fn device(&self) -> &Device {
        match self {
            DeviceEvent::Found(d) | DeviceEvent::Lost(d) => d,
        }
    }
}

/// Platform integration for enumerating and watching capture devices.
pub trait DeviceBackend: Send + 'static {
    /// One-time platform step that makes screen-capture-class devices
    /// visible to enumeration. Idempotent; safe to call repeatedly.
    ///
    /// Failure is non-fatal: enumeration still proceeds, but eligible
    /// devices may not appear in it.
    fn allow_capture_devices(&mut self) -> TethercapResult<()>;

    /// All capture devices currently attached, eligible or not.
    fn enumerate(&mut self) -> TethercapResult<Vec<Device>>;

    /// Begin watching for hot-plug transitions.
    ///
    /// The backend must stay alive for the stream to keep producing;
    /// [`crate::DeviceRegistry::activate`] takes ownership for exactly
    /// that reason.
    fn watch(&mut self) -> TethercapResult<mpsc::UnboundedReceiver<DeviceEvent>>;
}
