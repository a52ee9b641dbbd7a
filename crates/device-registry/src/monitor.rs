//! GStreamer `DeviceMonitor` backend.
//!
//! Enumerates video sources through the GStreamer device provider system
//! and forwards `DEVICE_ADDED`/`DEVICE_REMOVED` bus messages as hot-plug
//! events. The monitor's bus is drained on a dedicated thread since
//! `timed_pop` blocks.

use std::sync::OnceLock;

use gst::prelude::*;
use gstreamer as gst;
use tethercap_common::error::{TethercapError, TethercapResult};
use tokio::sync::mpsc;

use crate::backend::{DeviceBackend, DeviceEvent};
use crate::device::Device;

pub struct GstDeviceBackend {
    monitor: gst::DeviceMonitor,
    started: bool,
}

impl GstDeviceBackend {
    pub fn new() -> TethercapResult<Self> {
        ensure_gst_init()?;
        Ok(Self {
            monitor: gst::DeviceMonitor::new(),
            started: false,
        })
    }

    fn ensure_started(&mut self) -> TethercapResult<()> {
        if self.started {
            return Ok(());
        }
        self.monitor.add_filter(Some("Video/Source"), None);
        self.monitor
            .start()
            .map_err(|e| TethercapError::platform(format!("Failed to start device monitor: {e}")))?;
        self.started = true;
        Ok(())
    }
}

impl DeviceBackend for GstDeviceBackend {
    fn allow_capture_devices(&mut self) -> TethercapResult<()> {
        ensure_gst_init()?;
        // Screen-capture-class sources are hidden from enumeration unless
        // show-all is set on the monitor. Repeating the call is harmless.
        self.monitor.set_show_all_devices(true);
        Ok(())
    }

    fn enumerate(&mut self) -> TethercapResult<Vec<Device>> {
        self.ensure_started()?;
        Ok(self
            .monitor
            .devices()
            .iter()
            .map(device_from_gst)
            .collect())
    }

    fn watch(&mut self) -> TethercapResult<mpsc::UnboundedReceiver<DeviceEvent>> {
        self.ensure_started()?;
        let bus = self.monitor.bus();
        let (tx, rx) = mpsc::unbounded_channel();

        std::thread::Builder::new()
            .name("tethercap-devmon".into())
            .spawn(move || loop {
                let Some(msg) = bus.timed_pop(gst::ClockTime::NONE) else {
                    continue;
                };
                let event = match msg.view() {
                    gst::MessageView::DeviceAdded(added) => {
                        DeviceEvent::Found(device_from_gst(&added.device()))
                    }
                    gst::MessageView::DeviceRemoved(removed) => {
                        DeviceEvent::Lost(device_from_gst(&removed.device()))
                    }
                    _ => continue,
                };
                if tx.send(event).is_err() {
                    // Registry dropped; stop draining.
                    break;
                }
            })?;

        Ok(rx)
    }
}

fn device_from_gst(device: &gst::Device) -> Device {
    let props = device.properties();
    let id = props
        .as_ref()
        .and_then(|p| p.get::<String>("device.path").ok())
        .or_else(|| {
            props
                .as_ref()
                .and_then(|p| p.get::<String>("device.serial").ok())
        })
        .unwrap_or_else(|| device.display_name().to_string());
    let model = props
        .as_ref()
        .and_then(|p| p.get::<String>("device.product.name").ok())
        .unwrap_or_else(|| device.device_class().to_string());

    Device::new(id, device.display_name(), model)
}

fn ensure_gst_init() -> TethercapResult<()> {
    static GST_INIT: OnceLock<Result<(), String>> = OnceLock::new();
    let init_res = GST_INIT.get_or_init(|| gst::init().map_err(|e| e.to_string()));
    match init_res {
        Ok(()) => Ok(()),
        Err(e) => Err(TethercapError::platform(format!(
            "Failed to initialize GStreamer: {e}"
        ))),
    }
}
