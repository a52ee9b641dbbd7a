//! List attached devices, optionally streaming hot-plug events.

use std::sync::Arc;

use tethercap_device_registry::{Device, DeviceObserver, DeviceRegistry, GstDeviceBackend};

struct Printer;

impl DeviceObserver for Printer {
    fn attached(&self, device: &Device) {
        println!("+ {device}");
    }
    fn detached(&self, device: &Device) {
        println!("- {device}");
    }
}

pub async fn run(watch: bool, json: bool) -> anyhow::Result<()> {
    let registry = DeviceRegistry::new();
    registry.activate(Box::new(GstDeviceBackend::new()?))?;

    let attached = registry.attached();
    if json {
        println!("{}", serde_json::to_string_pretty(&attached)?);
    } else if attached.is_empty() {
        println!("No eligible devices attached.");
    } else {
        for device in &attached {
            println!("{}  {}", device.id, device.name);
        }
    }

    if watch {
        registry.subscribe(Arc::new(Printer));
        println!();
        println!("Watching for device changes. Press Ctrl+C to exit.");
        tokio::signal::ctrl_c().await?;
    }

    Ok(())
}
