//! Session state machine scenarios driven through a scripted pipeline.
//!
//! Time is paused and advanced manually so the grace period and prepare
//! timeout are deterministic.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tethercap_capture_engine::{
    CapturePipeline, CaptureSessionController, PipelineEvent, PipelineEventSender, RecorderObserver,
    RecordingError, SessionPhase, StillImageFormat, PREPARE_TIMEOUT, STOP_GRACE_PERIOD,
};
use tethercap_common::config::RecordingDefaults;
use tethercap_common::error::{TethercapError, TethercapResult};
use tethercap_common::paths::PathGenerator;
use tethercap_device_registry::{Device, ELIGIBLE_MODEL_ID};

fn device(id: &str) -> Device {
    Device::new(id, format!("Device {id}"), ELIGIBLE_MODEL_ID)
}

#[derive(Default)]
struct MockState {
    writing: AtomicBool,
    outputs: AtomicUsize,
    capacity: usize,
    fail_attach_input: bool,
    fail_attach_sink: bool,
    events: Mutex<Vec<PipelineEventSender>>,
    calls: Mutex<Vec<&'static str>>,
}

impl MockState {
    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }

    /// Event sender handed to the nth `begin_writing` call.
    fn sender(&self, index: usize) -> PipelineEventSender {
        self.events.lock().unwrap()[index].clone()
    }

    /// Platform confirms frames are hitting the sink.
    fn confirm(&self) {
        self.writing.store(true, Ordering::SeqCst);
        let events = self.events.lock().unwrap();
        events
            .last()
            .expect("begin_writing not called")
            .send(PipelineEvent::WriteStarted)
            .unwrap();
    }

    /// Platform reports the write died (e.g., disk full).
    fn fail_write(&self, message: &str) {
        self.writing.store(false, Ordering::SeqCst);
        let events = self.events.lock().unwrap();
        events
            .last()
            .expect("begin_writing not called")
            .send(PipelineEvent::WriteFinished {
                error: Some(message.to_string()),
            })
            .unwrap();
    }

    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }
}

struct MockPipeline {
    state: Arc<MockState>,
}

impl CapturePipeline for MockPipeline {
    fn attach_input(&mut self, _device: &Device) -> TethercapResult<()> {
        self.state.record("attach_input");
        if self.state.fail_attach_input {
            return Err(TethercapError::device("node gone"));
        }
        Ok(())
    }

    fn detach_input(&mut self) {
        self.state.record("detach_input");
    }

    fn attach_file_sink(&mut self) -> TethercapResult<()> {
        self.state.record("attach_file_sink");
        if self.state.fail_attach_sink
            || self.state.outputs.load(Ordering::SeqCst) >= self.state.capacity
        {
            return Err(TethercapError::capture("no output capacity"));
        }
        self.state.outputs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn detach_file_sink(&mut self) {
        self.state.record("detach_file_sink");
        self.state.outputs.fetch_sub(1, Ordering::SeqCst);
    }

    fn start(&mut self) -> TethercapResult<()> {
        self.state.record("start");
        Ok(())
    }

    fn stop(&mut self) -> TethercapResult<()> {
        self.state.record("stop");
        Ok(())
    }

    fn begin_writing(&mut self, _path: &Path, events: PipelineEventSender) -> TethercapResult<()> {
        self.state.record("begin_writing");
        self.state.events.lock().unwrap().push(events);
        Ok(())
    }

    fn end_writing(&mut self) {
        self.state.record("end_writing");
        self.state.writing.store(false, Ordering::SeqCst);
    }

    fn is_writing(&self) -> bool {
        self.state.writing.load(Ordering::SeqCst)
    }

    fn can_add_output(&self) -> bool {
        self.state.outputs.load(Ordering::SeqCst) < self.state.capacity
    }

    fn attach_still_sink(&mut self, _format: StillImageFormat) -> bool {
        self.state.record("attach_still_sink");
        if !self.can_add_output() {
            return false;
        }
        self.state.outputs.fetch_add(1, Ordering::SeqCst);
        true
    }
}

#[derive(Default)]
struct ObserverLog {
    entries: Mutex<Vec<String>>,
}

impl ObserverLog {
    fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }
}

impl RecorderObserver for ObserverLog {
    fn started_preparing(&self, device: &Device) {
        self.entries
            .lock()
            .unwrap()
            .push(format!("preparing:{}", device.id));
    }
    fn ended_preparing(&self) {
        self.entries.lock().unwrap().push("recording".to_string());
    }
    fn finished(&self, output: &Path) {
        self.entries.lock().unwrap().push(format!(
            "finished:{}",
            output.file_name().unwrap().to_string_lossy()
        ));
    }
    fn failed(&self, error: &RecordingError) {
        let tag = match error {
            RecordingError::DeviceUnavailable { .. } => "device-unavailable",
            RecordingError::SinkAttachRejected { .. } => "sink-rejected",
            RecordingError::FinishedWithError { .. } => "finished-with-error",
            RecordingError::PrepareTimedOut => "prepare-timeout",
            RecordingError::DeviceLost { .. } => "device-lost",
        };
        self.entries.lock().unwrap().push(format!("failed:{tag}"));
    }
}

fn controller_with(
    state: MockState,
) -> (CaptureSessionController, Arc<MockState>, Arc<ObserverLog>) {
    let state = Arc::new(state);
    let log = Arc::new(ObserverLog::default());
    let controller = CaptureSessionController::new(
        Box::new(MockPipeline {
            state: state.clone(),
        }),
        log.clone(),
        PathGenerator::new("/tmp/tethercap-tests"),
        &RecordingDefaults::default(),
    );
    (controller, state, log)
}

fn default_controller() -> (CaptureSessionController, Arc<MockState>, Arc<ObserverLog>) {
    controller_with(MockState {
        capacity: 2,
        ..MockState::default()
    })
}

/// Let spawned tasks (event loop, notifier) catch up without letting the
/// paused clock auto-advance.
async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

async fn elapse(duration: Duration) {
    tokio::time::advance(duration + Duration::from_millis(1)).await;
    settle().await;
}

fn assert_recording_filename(entry: &str) {
    let name = entry.strip_prefix("finished:").expect("a finished entry");
    let stamp = name
        .strip_prefix("device-recording-")
        .and_then(|rest| rest.strip_suffix(".mkv"))
        .unwrap_or_else(|| panic!("unexpected filename {name}"));
    // MMdd-HHmmss
    assert_eq!(stamp.len(), 11, "unexpected stamp {stamp}");
    assert_eq!(stamp.as_bytes()[4], b'-');
    assert!(stamp
        .chars()
        .enumerate()
        .all(|(i, c)| i == 4 || c.is_ascii_digit()));
}

#[tokio::test(start_paused = true)]
async fn happy_path_reports_milestones_in_order() {
    let (controller, state, log) = default_controller();
    let d1 = device("usb-1");

    controller.toggle_recording(&d1);
    settle().await;
    assert_eq!(controller.phase(), SessionPhase::Preparing);
    assert_eq!(controller.active_device(), Some(d1.clone()));
    let path = controller.output_file().expect("output path set eagerly");
    assert_eq!(log.entries(), vec!["preparing:usb-1"]);

    state.confirm();
    settle().await;
    assert_eq!(controller.phase(), SessionPhase::Recording);
    assert_eq!(log.entries(), vec!["preparing:usb-1", "recording"]);

    controller.toggle_recording(&d1);
    settle().await;
    assert_eq!(controller.phase(), SessionPhase::StopScheduled);

    elapse(STOP_GRACE_PERIOD).await;
    let entries = log.entries();
    assert_eq!(entries.len(), 3);
    assert_recording_filename(&entries[2]);
    assert!(entries[2].contains(&*path.file_name().unwrap().to_string_lossy()));
    assert_eq!(controller.phase(), SessionPhase::Idle);
    assert_eq!(controller.active_device(), None);
    assert_eq!(controller.output_file(), None);

    // Teardown released everything in order.
    let calls = state.calls();
    let tail = calls[calls.len() - 4..].to_vec();
    assert_eq!(
        tail,
        vec!["end_writing", "detach_input", "stop", "detach_file_sink"]
    );
}

#[tokio::test(start_paused = true)]
async fn rapid_double_toggle_becomes_one_start_and_one_stop() {
    let (controller, state, log) = default_controller();
    let d1 = device("usb-1");

    controller.toggle_recording(&d1);
    controller.toggle_recording(&d1);
    settle().await;

    // Second toggle did not fire a second start.
    assert_eq!(
        state.calls().iter().filter(|c| **c == "begin_writing").count(),
        1
    );
    assert_eq!(controller.phase(), SessionPhase::Preparing);

    // Once the sink confirms, the queued toggle becomes the stop.
    state.confirm();
    settle().await;
    assert_eq!(controller.phase(), SessionPhase::StopScheduled);

    elapse(STOP_GRACE_PERIOD).await;
    let entries = log.entries();
    assert_eq!(entries[0], "preparing:usb-1");
    assert_eq!(entries[1], "recording");
    assert_recording_filename(&entries[2]);
    assert_eq!(entries.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn toggle_while_stop_scheduled_is_ignored() {
    let (controller, state, log) = default_controller();
    let d1 = device("usb-1");

    controller.toggle_recording(&d1);
    settle().await;
    state.confirm();
    settle().await;
    controller.toggle_recording(&d1);
    settle().await;
    assert_eq!(controller.phase(), SessionPhase::StopScheduled);

    // Extra toggles during the grace window change nothing.
    controller.toggle_recording(&d1);
    controller.toggle_recording(&d1);
    settle().await;
    assert_eq!(controller.phase(), SessionPhase::StopScheduled);

    elapse(STOP_GRACE_PERIOD).await;
    assert_eq!(controller.phase(), SessionPhase::Idle);
    assert_eq!(log.entries().len(), 3);
    assert_eq!(
        state.calls().iter().filter(|c| **c == "begin_writing").count(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn second_device_cannot_start_while_first_is_active() {
    let (controller, state, log) = default_controller();
    let d1 = device("usb-1");
    let d2 = device("usb-2");

    controller.toggle_recording(&d1);
    settle().await;
    state.confirm();
    settle().await;

    // A toggle for another device while one is active is a stop request,
    // never a second concurrent start.
    controller.toggle_recording(&d2);
    settle().await;
    assert_eq!(controller.active_device(), Some(d1.clone()));
    assert_eq!(controller.phase(), SessionPhase::StopScheduled);

    elapse(STOP_GRACE_PERIOD).await;
    assert_eq!(controller.phase(), SessionPhase::Idle);

    // Now the second device can record; its preparing milestone comes
    // strictly after the first instance's finished.
    controller.toggle_recording(&d2);
    settle().await;
    let entries = log.entries();
    assert_eq!(entries[0], "preparing:usb-1");
    assert_eq!(entries[1], "recording");
    assert_recording_filename(&entries[2]);
    assert_eq!(entries[3], "preparing:usb-2");
}

#[tokio::test(start_paused = true)]
async fn device_lost_mid_recording_forces_failure_stop() {
    let (controller, state, log) = default_controller();
    let d1 = device("usb-1");

    controller.toggle_recording(&d1);
    settle().await;
    state.confirm();
    settle().await;
    assert_eq!(controller.phase(), SessionPhase::Recording);

    controller.handle_device_lost(&d1);
    settle().await;

    assert_eq!(controller.phase(), SessionPhase::Idle);
    assert_eq!(controller.active_device(), None);
    assert_eq!(controller.output_file(), None);
    assert_eq!(
        log.entries(),
        vec!["preparing:usb-1", "recording", "failed:device-lost"]
    );
    assert!(state.calls().contains(&"detach_input"));
}

#[tokio::test(start_paused = true)]
async fn losing_an_inactive_device_does_not_touch_the_session() {
    let (controller, state, _log) = default_controller();
    let d1 = device("usb-1");

    controller.toggle_recording(&d1);
    settle().await;
    state.confirm();
    settle().await;

    controller.handle_device_lost(&device("usb-other"));
    settle().await;
    assert_eq!(controller.phase(), SessionPhase::Recording);
    assert_eq!(controller.active_device(), Some(d1));
}

#[tokio::test(start_paused = true)]
async fn unavailable_device_aborts_start_with_error() {
    let (controller, state, log) = controller_with(MockState {
        capacity: 2,
        fail_attach_input: true,
        ..MockState::default()
    });

    controller.toggle_recording(&device("usb-1"));
    settle().await;

    assert_eq!(controller.phase(), SessionPhase::Idle);
    assert_eq!(controller.active_device(), None);
    assert_eq!(log.entries(), vec!["failed:device-unavailable"]);
    assert!(!state.calls().contains(&"begin_writing"));
}

#[tokio::test(start_paused = true)]
async fn sink_rejection_rolls_back_the_input() {
    let (controller, state, log) = controller_with(MockState {
        capacity: 2,
        fail_attach_sink: true,
        ..MockState::default()
    });

    controller.toggle_recording(&device("usb-1"));
    settle().await;

    assert_eq!(controller.phase(), SessionPhase::Idle);
    assert_eq!(log.entries(), vec!["failed:sink-rejected"]);
    // The input wired before the sink rejection was released again.
    assert_eq!(
        state.calls(),
        vec!["attach_input", "attach_file_sink", "detach_input"]
    );
}

#[tokio::test(start_paused = true)]
async fn write_error_clears_state_and_reports_failure() {
    let (controller, state, log) = default_controller();
    let d1 = device("usb-1");

    controller.toggle_recording(&d1);
    settle().await;
    state.confirm();
    settle().await;

    state.fail_write("disk full");
    settle().await;

    assert_eq!(controller.phase(), SessionPhase::Idle);
    assert!(!controller.is_recording());
    assert_eq!(controller.output_file(), None);
    assert_eq!(
        log.entries(),
        vec!["preparing:usb-1", "recording", "failed:finished-with-error"]
    );
}

#[tokio::test(start_paused = true)]
async fn unconfirmed_start_times_out_and_rolls_back() {
    let (controller, _state, log) = default_controller();

    controller.toggle_recording(&device("usb-1"));
    settle().await;
    assert_eq!(controller.phase(), SessionPhase::Preparing);

    elapse(PREPARE_TIMEOUT).await;

    assert_eq!(controller.phase(), SessionPhase::Idle);
    assert_eq!(controller.active_device(), None);
    assert_eq!(
        log.entries(),
        vec!["preparing:usb-1", "failed:prepare-timeout"]
    );
}

#[tokio::test(start_paused = true)]
async fn stale_watcher_cannot_touch_a_later_recording_instance() {
    let (controller, state, log) = default_controller();

    controller.toggle_recording(&device("usb-1"));
    settle().await;
    let stale = state.sender(0);

    elapse(PREPARE_TIMEOUT).await;
    assert_eq!(controller.phase(), SessionPhase::Idle);

    controller.toggle_recording(&device("usb-2"));
    settle().await;
    assert_eq!(controller.phase(), SessionPhase::Preparing);

    // The first instance's watcher wakes up late. Its confirmation must
    // not promote the new instance, and its finish must not tear it down.
    stale.send(PipelineEvent::WriteStarted).unwrap();
    settle().await;
    assert_eq!(controller.phase(), SessionPhase::Preparing);

    stale
        .send(PipelineEvent::WriteFinished { error: None })
        .unwrap();
    settle().await;
    assert_eq!(controller.phase(), SessionPhase::Preparing);
    assert_eq!(controller.active_device(), Some(device("usb-2")));

    // The new instance still confirms through its own channel.
    state.confirm();
    settle().await;
    assert_eq!(controller.phase(), SessionPhase::Recording);
    assert_eq!(
        log.entries(),
        vec![
            "preparing:usb-1",
            "failed:prepare-timeout",
            "preparing:usb-2",
            "recording"
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn toggle_after_raced_confirmation_still_reports_ended_preparing() {
    let (controller, state, log) = default_controller();
    let d1 = device("usb-1");

    controller.toggle_recording(&d1);
    settle().await;
    assert_eq!(controller.phase(), SessionPhase::Preparing);

    // The sink flips its writing flag before the confirmation event is
    // processed, so the next toggle sees an already-writing pipeline.
    state.writing.store(true, Ordering::SeqCst);
    controller.toggle_recording(&d1);
    settle().await;
    assert_eq!(controller.phase(), SessionPhase::StopScheduled);
    assert_eq!(log.entries(), vec!["preparing:usb-1", "recording"]);

    elapse(STOP_GRACE_PERIOD).await;
    let entries = log.entries();
    assert_eq!(entries.len(), 3);
    assert_recording_filename(&entries[2]);
}

#[tokio::test(start_paused = true)]
async fn still_image_attach_is_a_noop_without_capacity() {
    let (controller, state, _log) = controller_with(MockState {
        capacity: 1,
        ..MockState::default()
    });

    // The lone output slot goes to the file sink.
    controller.toggle_recording(&device("usb-1"));
    settle().await;

    controller.attach_still_image_capability();
    assert!(!state.calls().contains(&"attach_still_sink"));

    // With spare capacity the sink is attached.
    let (controller, state, _log) = default_controller();
    controller.toggle_recording(&device("usb-1"));
    settle().await;
    controller.attach_still_image_capability();
    assert!(state.calls().contains(&"attach_still_sink"));
}
