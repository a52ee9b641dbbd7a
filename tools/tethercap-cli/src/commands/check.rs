//! Check platform capabilities.

use tethercap_device_registry::{DeviceBackend, GstDeviceBackend};

pub fn run() -> anyhow::Result<()> {
    println!("Tethercap system check");

    match GstDeviceBackend::new() {
        Ok(mut backend) => {
            println!("  GStreamer: ok");

            match backend.allow_capture_devices() {
                Ok(()) => println!("  Allow-capture step: ok"),
                Err(e) => println!("  Allow-capture step: failed ({e})"),
            }

            match backend.enumerate() {
                Ok(devices) => {
                    let eligible = devices.iter().filter(|d| d.is_eligible()).count();
                    println!("  Video sources visible: {}", devices.len());
                    println!("  Eligible tethered devices: {eligible}");
                }
                Err(e) => println!("  Enumeration failed: {e}"),
            }
        }
        Err(e) => println!("  GStreamer: unavailable ({e})"),
    }

    Ok(())
}
