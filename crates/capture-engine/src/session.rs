//! Recording session control.
//!
//! A single toggle entry point drives the session through
//! `Idle → Preparing → Recording → StopScheduled → Idle`. The two
//! transient phases exist because the pipeline confirms writes
//! asynchronously and stops are delayed by a grace period; external
//! observers only ever see the `started_preparing` / `ended_preparing` /
//! `finished` milestones (plus a dedicated failure callback).

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tethercap_common::config::RecordingDefaults;
use tethercap_common::paths::PathGenerator;
use tethercap_device_registry::Device;
use tokio::sync::mpsc;

use crate::pipeline::{CapturePipeline, PipelineEvent, StillImageFormat};

/// Delay between a stop request and actual pipeline teardown.
///
/// Gives in-flight media a moment to settle before the sink is detached.
/// Tunable in source only; not exposed through configuration.
pub const STOP_GRACE_PERIOD: Duration = Duration::from_secs(3);

/// How long a start may sit unconfirmed before it is rolled back.
///
/// The platform gives no upper bound on sink confirmation; without this
/// the session would hang in Preparing forever if the pipeline stalls.
pub const PREPARE_TIMEOUT: Duration = Duration::from_secs(10);

/// Failures surfaced through [`RecorderObserver::failed`].
#[derive(Debug, thiserror::Error)]
pub enum RecordingError {
    /// The device no longer exists or could not be opened as an input.
    #[error("Device {device} unavailable: {message}")]
    DeviceUnavailable { device: String, message: String },

    /// The pipeline refused the output sink (capacity already used).
    #[error("Output sink rejected: {message}")]
    SinkAttachRejected { message: String },

    /// The pipeline reported an error when the write ended.
    #[error("Recording finished with error: {message}")]
    FinishedWithError { message: String },

    /// The pipeline never confirmed the write start within
    /// [`PREPARE_TIMEOUT`].
    #[error("Pipeline did not confirm write start in time")]
    PrepareTimedOut,

    /// The active device detached mid-recording.
    #[error("Device {device} detached mid-recording")]
    DeviceLost { device: String },
}

/// Observer contract for recording lifecycle milestones.
///
/// For every recording instance the callbacks are strictly ordered:
/// `started_preparing`, then `ended_preparing`, then exactly one of
/// `finished` or `failed`. A new instance's `started_preparing` never
/// arrives before the prior instance's terminal callback.
pub trait RecorderObserver: Send + Sync {
    fn started_preparing(&self, device: &Device);
    fn ended_preparing(&self);
    fn finished(&self, output: &Path);
    fn failed(&self, error: &RecordingError);
}

/// Session phase. `Preparing` and `StopScheduled` are the transient
/// windows in which `active_device` is set while the sink is not writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Preparing,
    Recording,
    StopScheduled,
}

enum Notification {
    StartedPreparing(Device),
    EndedPreparing,
    Finished(PathBuf),
    Failed(RecordingError),
}

/// Owns the capture pipeline and enforces the at-most-one-active-recording
/// invariant.
///
/// Cloning is cheap; all clones drive the same session. Every state
/// transition happens under one internal lock, and observer callbacks are
/// delivered in transition order by a dedicated task, never from inside
/// the lock.
#[derive(Clone)]
pub struct CaptureSessionController {
    inner: Arc<Mutex<SessionInner>>,
    events_tx: mpsc::UnboundedSender<(u64, PipelineEvent)>,
}

struct SessionInner {
    pipeline: Box<dyn CapturePipeline>,
    paths: PathGenerator,
    file_prefix: String,
    file_extension: String,
    phase: SessionPhase,
    active_device: Option<Device>,
    output_file: Option<PathBuf>,
    /// Toggle arrived during Preparing; becomes a stop once Recording.
    stop_pending: bool,
    /// Bumped on every start so stale timers from a previous recording
    /// instance recognize themselves and no-op.
    generation: u64,
    notifications: mpsc::UnboundedSender<Notification>,
}

impl CaptureSessionController {
    pub fn new(
        pipeline: Box<dyn CapturePipeline>,
        observer: Arc<dyn RecorderObserver>,
        paths: PathGenerator,
        defaults: &RecordingDefaults,
    ) -> Self {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<(u64, PipelineEvent)>();
        let (notes_tx, mut notes_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(Mutex::new(SessionInner {
            pipeline,
            paths,
            file_prefix: defaults.file_prefix.clone(),
            file_extension: defaults.file_extension.clone(),
            phase: SessionPhase::Idle,
            active_device: None,
            output_file: None,
            stop_pending: false,
            generation: 0,
            notifications: notes_tx,
        }));

        // Single delivery task keeps observer callbacks in transition
        // order without holding the session lock across them.
        tokio::spawn(async move {
            while let Some(note) = notes_rx.recv().await {
                match note {
                    Notification::StartedPreparing(device) => observer.started_preparing(&device),
                    Notification::EndedPreparing => observer.ended_preparing(),
                    Notification::Finished(path) => observer.finished(&path),
                    Notification::Failed(error) => observer.failed(&error),
                }
            }
        });

        let shared = inner.clone();
        tokio::spawn(async move {
            while let Some((generation, event)) = events_rx.recv().await {
                Self::on_pipeline_event(&shared, generation, event);
            }
        });

        Self { inner, events_tx }
    }

    /// Start or stop recording on `device`. Returns immediately; progress
    /// is reported through the observer.
    pub fn toggle_recording(&self, device: &Device) {
        let mut inner = self.inner.lock().unwrap();
        match inner.phase {
            SessionPhase::Idle => {
                Self::start_locked(&mut inner, &self.inner, device, self.events_tx.clone());
            }
            SessionPhase::Preparing => {
                if inner.pipeline.is_writing() {
                    // Confirmation raced ahead of its event; already
                    // recording in practice. The milestone still comes
                    // before the stop so the observer sees the usual
                    // prepared-then-finished order.
                    inner.phase = SessionPhase::Recording;
                    let _ = inner.notifications.send(Notification::EndedPreparing);
                    Self::schedule_stop_locked(&mut inner, &self.inner);
                } else {
                    tracing::debug!("Toggle during Preparing; will stop once recording starts");
                    inner.stop_pending = true;
                }
            }
            SessionPhase::Recording => {
                Self::schedule_stop_locked(&mut inner, &self.inner);
            }
            SessionPhase::StopScheduled => {
                tracing::debug!("Toggle while stop already scheduled; ignoring");
            }
        }
    }

    /// Attach a still-image sink alongside the video path, if the session
    /// has output capacity left. No-op otherwise.
    pub fn attach_still_image_capability(&self) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.pipeline.can_add_output() {
            tracing::info!("Session has no output capacity; still-image sink not attached");
            return;
        }
        if inner.pipeline.attach_still_sink(StillImageFormat::Jpeg) {
            tracing::info!("Still-image sink attached");
        } else {
            tracing::info!("Still-image sink rejected by pipeline");
        }
    }

    /// React to an eligible device detaching. If it is the active one the
    /// session is torn down immediately (no grace period) and the loss is
    /// reported as a failure.
    pub fn handle_device_lost(&self, device: &Device) {
        let mut inner = self.inner.lock().unwrap();
        let is_active = inner
            .active_device
            .as_ref()
            .is_some_and(|active| active.id == device.id);
        if !is_active || inner.phase == SessionPhase::Idle {
            return;
        }

        tracing::warn!(%device, "Active device lost; forcing stop");
        Self::teardown_locked(&mut inner);
        let _ = inner
            .notifications
            .send(Notification::Failed(RecordingError::DeviceLost {
                device: device.id.clone(),
            }));
    }

    pub fn phase(&self) -> SessionPhase {
        self.inner.lock().unwrap().phase
    }

    pub fn active_device(&self) -> Option<Device> {
        self.inner.lock().unwrap().active_device.clone()
    }

    pub fn output_file(&self) -> Option<PathBuf> {
        self.inner.lock().unwrap().output_file.clone()
    }

    pub fn is_recording(&self) -> bool {
        self.inner.lock().unwrap().pipeline.is_writing()
    }

    // Transitions. All take the lock already held.

    fn start_locked(
        inner: &mut SessionInner,
        shared: &Arc<Mutex<SessionInner>>,
        device: &Device,
        events_tx: mpsc::UnboundedSender<(u64, PipelineEvent)>,
    ) {
        tracing::info!(%device, "Starting recording");

        if let Err(e) = inner.pipeline.attach_input(device) {
            let _ = inner
                .notifications
                .send(Notification::Failed(RecordingError::DeviceUnavailable {
                    device: device.id.clone(),
                    message: e.to_string(),
                }));
            return;
        }
        if let Err(e) = inner.pipeline.attach_file_sink() {
            inner.pipeline.detach_input();
            let _ = inner
                .notifications
                .send(Notification::Failed(RecordingError::SinkAttachRejected {
                    message: e.to_string(),
                }));
            return;
        }
        if let Err(e) = inner.pipeline.start() {
            inner.pipeline.detach_file_sink();
            inner.pipeline.detach_input();
            let _ = inner
                .notifications
                .send(Notification::Failed(RecordingError::DeviceUnavailable {
                    device: device.id.clone(),
                    message: e.to_string(),
                }));
            return;
        }

        let path = inner
            .paths
            .generate(&inner.file_prefix, &inner.file_extension);
        tracing::info!(path = %path.display(), "Recording to");

        // Optimistic: set session state and report Preparing before the
        // sink confirms, so callers can reflect it immediately. Rolled
        // back if the start fails asynchronously.
        inner.generation += 1;
        let generation = inner.generation;
        inner.active_device = Some(device.clone());
        inner.output_file = Some(path.clone());
        inner.phase = SessionPhase::Preparing;
        inner.stop_pending = false;
        let _ = inner
            .notifications
            .send(Notification::StartedPreparing(device.clone()));

        // Events from the pipeline are tagged with this write's generation
        // so a stale watcher from a rolled-back start can never confirm or
        // finish a later recording instance.
        let (write_tx, mut write_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(event) = write_rx.recv().await {
                if events_tx.send((generation, event)).is_err() {
                    break;
                }
            }
        });

        if let Err(e) = inner.pipeline.begin_writing(&path, write_tx) {
            Self::teardown_locked(inner);
            let _ = inner
                .notifications
                .send(Notification::Failed(RecordingError::DeviceUnavailable {
                    device: device.id.clone(),
                    message: e.to_string(),
                }));
            return;
        }

        let shared = shared.clone();
        tokio::spawn(async move {
            tokio::time::sleep(PREPARE_TIMEOUT).await;
            let mut inner = shared.lock().unwrap();
            if inner.generation != generation || inner.phase != SessionPhase::Preparing {
                return;
            }
            tracing::warn!("Sink never confirmed write start; rolling back");
            Self::teardown_locked(&mut inner);
            let _ = inner
                .notifications
                .send(Notification::Failed(RecordingError::PrepareTimedOut));
        });
    }

    fn schedule_stop_locked(inner: &mut SessionInner, shared: &Arc<Mutex<SessionInner>>) {
        tracing::info!(delay = ?STOP_GRACE_PERIOD, "Stop requested; tearing down after grace period");
        inner.phase = SessionPhase::StopScheduled;
        inner.stop_pending = false;
        let generation = inner.generation;

        let shared = shared.clone();
        tokio::spawn(async move {
            tokio::time::sleep(STOP_GRACE_PERIOD).await;
            let mut inner = shared.lock().unwrap();
            if inner.generation != generation || inner.phase != SessionPhase::StopScheduled {
                return;
            }
            let output = Self::teardown_locked(&mut inner);
            if let Some(path) = output {
                let _ = inner.notifications.send(Notification::Finished(path));
            }
        });
    }

    /// Detach everything, stop the pipeline, and reset to Idle. Returns
    /// the output path the session was writing to, if any.
    fn teardown_locked(inner: &mut SessionInner) -> Option<PathBuf> {
        inner.pipeline.end_writing();
        inner.pipeline.detach_input();
        if let Err(e) = inner.pipeline.stop() {
            tracing::warn!(error = %e, "Pipeline stop failed during teardown");
        }
        inner.pipeline.detach_file_sink();
        inner.phase = SessionPhase::Idle;
        inner.active_device = None;
        inner.stop_pending = false;
        inner.output_file.take()
    }

    fn on_pipeline_event(shared: &Arc<Mutex<SessionInner>>, generation: u64, event: PipelineEvent) {
        let mut inner = shared.lock().unwrap();
        if inner.generation != generation {
            tracing::debug!(?event, "Dropping pipeline event from a previous recording instance");
            return;
        }
        match event {
            PipelineEvent::WriteStarted => {
                if inner.phase != SessionPhase::Preparing {
                    tracing::debug!(phase = ?inner.phase, "Spurious write-start confirmation");
                    return;
                }
                tracing::info!("Sink confirmed recording");
                inner.phase = SessionPhase::Recording;
                let _ = inner.notifications.send(Notification::EndedPreparing);
                if inner.stop_pending {
                    Self::schedule_stop_locked(&mut inner, shared);
                }
            }
            PipelineEvent::WriteFinished { error: None } => {
                if inner.phase == SessionPhase::Idle {
                    // Normal: the scheduled stop already tore down and
                    // reported; this is the sink finalizing behind it.
                    tracing::debug!("Write finished after teardown");
                    return;
                }
                tracing::info!("Sink finished on its own");
                let output = Self::teardown_locked(&mut inner);
                if let Some(path) = output {
                    let _ = inner.notifications.send(Notification::Finished(path));
                }
            }
            PipelineEvent::WriteFinished { error: Some(message) } => {
                if inner.phase == SessionPhase::Idle {
                    tracing::warn!(%message, "Write error reported after teardown");
                    return;
                }
                tracing::warn!(%message, "Recording finished with error");
                Self::teardown_locked(&mut inner);
                let _ = inner
                    .notifications
                    .send(Notification::Failed(RecordingError::FinishedWithError {
                        message,
                    }));
            }
        }
    }
}
