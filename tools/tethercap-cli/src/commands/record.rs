//! Record a device's screen until Ctrl+C.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tethercap_capture_engine::{
    CaptureSessionController, GstCapturePipeline, RecorderObserver, RecordingError,
};
use tethercap_common::config::AppConfig;
use tethercap_common::paths::PathGenerator;
use tethercap_device_registry::{Device, DeviceObserver, DeviceRegistry, GstDeviceBackend};
use tokio::sync::Notify;

/// Prints milestones and signals `done` on the terminal callback.
struct CliObserver {
    done: Arc<Notify>,
}

impl RecorderObserver for CliObserver {
    fn started_preparing(&self, device: &Device) {
        println!("Preparing {} ...", device.name);
    }
    fn ended_preparing(&self) {
        println!("Recording. Press Ctrl+C to stop.");
    }
    fn finished(&self, output: &Path) {
        println!("Recording saved to {}", output.display());
        self.done.notify_one();
    }
    fn failed(&self, error: &RecordingError) {
        eprintln!("Recording failed: {error}");
        self.done.notify_one();
    }
}

/// Forwards detach events of the active device into the controller.
struct LostForwarder {
    controller: CaptureSessionController,
}

impl DeviceObserver for LostForwarder {
    fn attached(&self, device: &Device) {
        tracing::info!(%device, "Device attached");
    }
    fn detached(&self, device: &Device) {
        self.controller.handle_device_lost(device);
    }
}

pub async fn run(
    device_id: Option<String>,
    output: Option<PathBuf>,
    still_image: bool,
) -> anyhow::Result<()> {
    let config = AppConfig::load();
    let paths = PathGenerator::new(output.unwrap_or_else(|| config.recordings_dir.clone()));
    paths.ensure_output_dir()?;

    let registry = DeviceRegistry::new();
    registry.activate(Box::new(GstDeviceBackend::new()?))?;

    let attached = registry.attached();
    let device = match device_id {
        Some(id) => attached
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("No attached eligible device with id {id}"))?,
        None => match attached.as_slice() {
            [] => anyhow::bail!("No eligible devices attached"),
            [only] => only.clone(),
            _ => anyhow::bail!(
                "Multiple devices attached; pick one with --device:\n{}",
                attached
                    .iter()
                    .map(|d| format!("  {d}"))
                    .collect::<Vec<_>>()
                    .join("\n")
            ),
        },
    };

    let done = Arc::new(Notify::new());
    let observer = Arc::new(CliObserver { done: done.clone() });
    let controller = CaptureSessionController::new(
        Box::new(GstCapturePipeline::new()),
        observer,
        paths,
        &config.recording,
    );

    if still_image || config.recording.still_image {
        controller.attach_still_image_capability();
    }

    // Losing the recorded device mid-session must stop the recording.
    registry.subscribe(Arc::new(LostForwarder {
        controller: controller.clone(),
    }));

    controller.toggle_recording(&device);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            println!();
            controller.toggle_recording(&device);
            done.notified().await;
        }
        // Start failed or the session ended on its own.
        _ = done.notified() => {}
    }

    Ok(())
}
