//! Capture pipeline interface and GStreamer implementation.
//!
//! The session controller only ever talks to the [`CapturePipeline`]
//! trait; how frames get from the device into the container is opaque to
//! it. Confirmation that writing actually started, and the eventual end of
//! the write, arrive asynchronously as [`PipelineEvent`]s.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use gst::prelude::*;
use gstreamer as gst;
use tethercap_common::error::{TethercapError, TethercapResult};
use tethercap_device_registry::Device;
use tokio::sync::mpsc;

/// Most platform sessions accept a video file sink plus one extra output.
pub const MAX_SESSION_OUTPUTS: usize = 2;

/// Asynchronous notifications from the pipeline back to the controller.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// The sink confirmed that frames are being written.
    WriteStarted,

    /// Writing ended, cleanly or with an error.
    WriteFinished { error: Option<String> },
}

pub type PipelineEventSender = mpsc::UnboundedSender<PipelineEvent>;

/// Encoding for the optional still-image sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StillImageFormat {
    Jpeg,
}

/// A media capture pipeline: one device input, a file sink, and
/// optionally a still-image sink.
pub trait CapturePipeline: Send {
    /// Wire a device as the pipeline's input.
    fn attach_input(&mut self, device: &Device) -> TethercapResult<()>;

    /// Detach the current input, if any.
    fn detach_input(&mut self);

    /// Attach the file-output sink. Fails if the session has no output
    /// capacity left.
    fn attach_file_sink(&mut self) -> TethercapResult<()>;

    /// Detach the file-output sink, freeing its capacity.
    fn detach_file_sink(&mut self);

    /// Start the pipeline. Input and file sink must be attached.
    fn start(&mut self) -> TethercapResult<()>;

    /// Stop the pipeline and release the device.
    fn stop(&mut self) -> TethercapResult<()>;

    /// Request that the sink begin writing to `path`.
    ///
    /// Returns as soon as the request is submitted; `WriteStarted` (or a
    /// `WriteFinished` carrying an error) arrives later on `events`.
    fn begin_writing(&mut self, path: &Path, events: PipelineEventSender) -> TethercapResult<()>;

    /// Request that the sink finish writing and finalize the output.
    fn end_writing(&mut self);

    /// Whether the sink currently reports active recording. This is the
    /// flag the controller gates toggles on.
    fn is_writing(&self) -> bool;

    /// Whether the session accepts another output.
    fn can_add_output(&self) -> bool;

    /// Attach a still-image sink. Returns false (a no-op, not an error)
    /// if the session has no capacity left.
    fn attach_still_sink(&mut self, format: StillImageFormat) -> bool;
}

/// GStreamer-backed pipeline writing H.264 into a Matroska container.
pub struct GstCapturePipeline {
    device: Option<Device>,
    pipeline: Option<gst::Pipeline>,
    writing: Arc<AtomicBool>,
    draining: Arc<AtomicBool>,
    running: bool,
    file_sink: bool,
    still_sink: bool,
    outputs: usize,
}

impl GstCapturePipeline {
    pub fn new() -> Self {
        Self {
            device: None,
            pipeline: None,
            writing: Arc::new(AtomicBool::new(false)),
            draining: Arc::new(AtomicBool::new(false)),
            running: false,
            file_sink: false,
            still_sink: false,
            outputs: 0,
        }
    }

    fn build_launch(&self, device: &Device, path: &Path) -> String {
        let location = escape_path(path);
        // queue leaky=downstream decouples the device source from the
        // encoder so momentary encoder stalls don't back up the source.
        let main = format!(
            "queue max-size-buffers=200 leaky=downstream ! videoconvert ! x264enc tune=zerolatency speed-preset=veryfast ! h264parse ! queue max-size-buffers=8 ! matroskamux ! filesink location=\"{location}\""
        );
        let source = format!("v4l2src device=\"{}\" do-timestamp=true", device.id);

        if self.still_sink {
            let still = escape_path(&path.with_extension("jpg"));
            format!(
                "{source} ! tee name=t  t. ! {main}  t. ! queue max-size-buffers=1 leaky=downstream ! videoconvert ! jpegenc ! multifilesink location=\"{still}\""
            )
        } else {
            format!("{source} ! {main}")
        }
    }
}

impl Default for GstCapturePipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl CapturePipeline for GstCapturePipeline {
    fn attach_input(&mut self, device: &Device) -> TethercapResult<()> {
        if !Path::new(&device.id).exists() {
            return Err(TethercapError::device(format!(
                "Capture node {} does not exist",
                device.id
            )));
        }
        self.device = Some(device.clone());
        Ok(())
    }

    fn detach_input(&mut self) {
        self.device = None;
    }

    fn attach_file_sink(&mut self) -> TethercapResult<()> {
        if self.outputs >= MAX_SESSION_OUTPUTS {
            return Err(TethercapError::capture("Session has no output capacity left"));
        }
        self.outputs += 1;
        self.file_sink = true;
        Ok(())
    }

    fn detach_file_sink(&mut self) {
        if self.file_sink {
            self.outputs -= 1;
            self.file_sink = false;
        }
    }

    fn start(&mut self) -> TethercapResult<()> {
        ensure_gst_init()?;
        if self.device.is_none() {
            return Err(TethercapError::capture("No input attached"));
        }
        if !self.file_sink {
            return Err(TethercapError::capture("No file sink attached"));
        }
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> TethercapResult<()> {
        self.running = false;
        // The bus watcher owns pipeline shutdown once a write started;
        // dropping our handle here is enough. If no write ever started,
        // there is no pipeline to tear down.
        if let Some(pipeline) = self.pipeline.take() {
            if !self.writing.load(Ordering::SeqCst) && !self.draining.load(Ordering::SeqCst) {
                let _ = pipeline.set_state(gst::State::Null);
            }
        }
        Ok(())
    }

    fn begin_writing(&mut self, path: &Path, events: PipelineEventSender) -> TethercapResult<()> {
        let device = self
            .device
            .clone()
            .ok_or_else(|| TethercapError::capture("No input attached"))?;
        if !self.running {
            return Err(TethercapError::capture("Pipeline not started"));
        }

        let launch = self.build_launch(&device, path);
        tracing::debug!(%launch, "Building capture pipeline");

        let element = gst::parse::launch(&launch)
            .map_err(|e| TethercapError::capture(format!("Failed to build pipeline: {e}")))?;
        let pipeline = element
            .dynamic_cast::<gst::Pipeline>()
            .map_err(|_| TethercapError::capture("Launch string did not produce a pipeline"))?;

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| TethercapError::capture(format!("Failed to start pipeline: {e:?}")))?;

        let bus = pipeline
            .bus()
            .ok_or_else(|| TethercapError::capture("Pipeline has no bus"))?;

        self.draining.store(false, Ordering::SeqCst);
        self.pipeline = Some(pipeline.clone());

        let writing = self.writing.clone();
        let draining = self.draining.clone();
        std::thread::Builder::new()
            .name("tethercap-pipeline".into())
            .spawn(move || {
                watch_pipeline(pipeline, bus, writing, draining, events);
            })?;

        Ok(())
    }

    fn end_writing(&mut self) {
        self.draining.store(true, Ordering::SeqCst);
        if let Some(pipeline) = &self.pipeline {
            // EOS lets the encoder and muxer flush buffered frames before
            // the file is finalized; the bus watcher completes shutdown.
            if !pipeline.send_event(gst::event::Eos::new()) {
                tracing::warn!("Failed to send EOS event; output may be truncated");
                let _ = pipeline.set_state(gst::State::Null);
                self.writing.store(false, Ordering::SeqCst);
            }
        }
    }

    fn is_writing(&self) -> bool {
        self.writing.load(Ordering::SeqCst)
    }

    fn can_add_output(&self) -> bool {
        self.outputs < MAX_SESSION_OUTPUTS
    }

    fn attach_still_sink(&mut self, format: StillImageFormat) -> bool {
        if !self.can_add_output() {
            return false;
        }
        debug_assert_eq!(format, StillImageFormat::Jpeg);
        self.outputs += 1;
        self.still_sink = true;
        true
    }
}

/// Drive one write session: confirm the Playing transition, then drain
/// the bus until EOS or an error finalizes the output.
fn watch_pipeline(
    pipeline: gst::Pipeline,
    bus: gst::Bus,
    writing: Arc<AtomicBool>,
    draining: Arc<AtomicBool>,
    events: PipelineEventSender,
) {
    match pipeline.state(gst::ClockTime::from_seconds(10)) {
        (Ok(_), gst::State::Playing, _) => {
            writing.store(true, Ordering::SeqCst);
            let _ = events.send(PipelineEvent::WriteStarted);
        }
        (Ok(_), state, _) => {
            // Not fatal yet; the controller's prepare timeout decides.
            tracing::warn!(?state, "Pipeline did not reach Playing state within timeout");
        }
        (Err(e), _, _) => {
            let _ = pipeline.set_state(gst::State::Null);
            writing.store(false, Ordering::SeqCst);
            let _ = events.send(PipelineEvent::WriteFinished {
                error: Some(format!("Pipeline failed to reach Playing state: {e:?}")),
            });
            return;
        }
    }

    let mut drain_deadline: Option<Instant> = None;
    loop {
        if drain_deadline.is_none() && draining.load(Ordering::SeqCst) {
            drain_deadline = Some(Instant::now() + Duration::from_secs(10));
        }
        if let Some(deadline) = drain_deadline {
            if Instant::now() >= deadline {
                tracing::warn!("EOS drain timed out after 10s; output may be truncated");
                let _ = pipeline.set_state(gst::State::Null);
                writing.store(false, Ordering::SeqCst);
                let _ = events.send(PipelineEvent::WriteFinished { error: None });
                return;
            }
        }

        let Some(msg) = bus.timed_pop(gst::ClockTime::from_seconds(1)) else {
            continue;
        };
        match msg.view() {
            gst::MessageView::Eos(_) => {
                tracing::debug!("EOS received; pipeline drained");
                let _ = pipeline.set_state(gst::State::Null);
                writing.store(false, Ordering::SeqCst);
                let _ = events.send(PipelineEvent::WriteFinished { error: None });
                return;
            }
            gst::MessageView::Error(e) => {
                tracing::warn!(error = %e.error(), "Pipeline error");
                let _ = pipeline.set_state(gst::State::Null);
                writing.store(false, Ordering::SeqCst);
                let _ = events.send(PipelineEvent::WriteFinished {
                    error: Some(e.error().to_string()),
                });
                return;
            }
            _ => {}
        }
    }
}

fn ensure_gst_init() -> TethercapResult<()> {
    static GST_INIT: OnceLock<Result<(), String>> = OnceLock::new();
    let init_res = GST_INIT.get_or_init(|| gst::init().map_err(|e| e.to_string()));
    match init_res {
        Ok(()) => Ok(()),
        Err(e) => Err(TethercapError::capture(format!(
            "Failed to initialize GStreamer: {e}"
        ))),
    }
}

fn escape_path(path: &Path) -> String {
    path.to_string_lossy().replace('"', "\\\"")
}
