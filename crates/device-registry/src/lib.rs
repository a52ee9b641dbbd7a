//! Tethercap Device Registry
//!
//! Tracks the set of currently-attached tethered capture devices and
//! surfaces attach/detach transitions to observers. The registry owns the
//! bookkeeping; platform specifics live behind the [`DeviceBackend`] trait,
//! with a GStreamer `DeviceMonitor` implementation for real hot-plug.
//!
//! Only devices whose reported model matches [`ELIGIBLE_MODEL_ID`] are
//! tracked; everything else attached to the machine is invisible to this
//! crate's consumers.

pub mod backend;
pub mod device;
pub mod monitor;
pub mod registry;

pub use backend::{DeviceBackend, DeviceEvent};
pub use device::{Device, ELIGIBLE_MODEL_ID};
pub use monitor::GstDeviceBackend;
pub use registry::{DeviceObserver, DeviceRegistry};
