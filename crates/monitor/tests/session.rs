use std::{
    collections::BTreeMap,
    fs,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::Result;
use chrono::Utc;
use image::RgbImage;
use ml_core::{Mask, SegmentationModel, Segment};
use monitor::{
    ChartArtists, ClassKind, FsPersistenceSink, ImageRole, MeasurementRow, Metric,
    PersistenceSink, PresentationSurface, RecordingSession, RunPermission, SessionConfig,
    SessionError, SessionState, Status, StatusState, TickOutcome, ToleranceSpec, TriggerSignal,
    pipeline::MetricOptions,
};
use video_ingest::{
    CaptureError, ConnectionState, DeviceInfo, Frame, FrameFormat, GrabOutcome, SensorDriver,
};

const WIDTH: u32 = 16;
const HEIGHT: u32 = 12;
const DEADLINE: Duration = Duration::from_secs(10);
/// Sensor clock at the first grab; each later grab adds one millisecond.
const GRAB_EPOCH_MS: i64 = 1_700_000_000_000;

#[derive(Default)]
struct SensorScript {
    grabs: AtomicUsize,
    timeouts_left: AtomicUsize,
    disconnected: AtomicBool,
    exposures: Mutex<Vec<u32>>,
}

struct ScriptedSensor {
    script: Arc<SensorScript>,
}

impl SensorDriver for ScriptedSensor {
    fn open(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }

    fn set_exposure(&mut self, micros: u32) -> Result<(), CaptureError> {
        if self.script.disconnected.load(Ordering::SeqCst) {
            return Err(CaptureError::Disconnected);
        }
        self.script.exposures.lock().unwrap().push(micros);
        Ok(())
    }

    fn grab_frame(&mut self, _timeout_ms: u64) -> Result<GrabOutcome, CaptureError> {
        let grab = self.script.grabs.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(2));
        if self.script.disconnected.load(Ordering::SeqCst) {
            return Err(CaptureError::Disconnected);
        }
        let pending = self.script.timeouts_left.load(Ordering::SeqCst);
        if pending > 0 {
            self.script.timeouts_left.store(pending - 1, Ordering::SeqCst);
            return Ok(GrabOutcome::Timeout);
        }
        Ok(GrabOutcome::Frame(Frame {
            data: vec![40; (WIDTH * HEIGHT * 3) as usize],
            width: WIDTH as i32,
            height: HEIGHT as i32,
            timestamp_ms: GRAB_EPOCH_MS + grab as i64,
            format: FrameFormat::Rgb8,
        }))
    }

    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            model: "scripted".into(),
            connection: if self.script.disconnected.load(Ordering::SeqCst) {
                ConnectionState::Disconnected
            } else {
                ConnectionState::Connected
            },
        }
    }
}

/// Reports one welding wire instance covering x 2..=5, y 3..=6.
struct WireModel {
    calls: Arc<AtomicUsize>,
}

impl SegmentationModel for WireModel {
    fn infer(&mut self, image: &RgbImage) -> Result<Vec<Segment>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (w, h) = image.dimensions();
        let bits = (0..h)
            .flat_map(|y| (0..w).map(move |x| (2..=5).contains(&x) && (3..=6).contains(&y)))
            .collect();
        Ok(vec![Segment {
            class_id: 0,
            score: 0.9,
            mask: Mask::from_bits(w, h, bits).unwrap(),
            bbox: [2.0, 3.0, 5.0, 6.0],
        }])
    }
}

#[derive(Default)]
struct MemorySink {
    rows: Mutex<Vec<(u64, usize)>>,
    stamps: Mutex<Vec<i64>>,
    images: Mutex<Vec<(u64, ImageRole)>>,
    video: Mutex<Vec<(u64, ImageRole)>>,
    charts: Mutex<Vec<(ClassKind, Metric, usize)>>,
    flushed: AtomicBool,
}

impl PersistenceSink for MemorySink {
    fn write_image(&self, frame_index: u64, role: ImageRole, _image: &RgbImage) -> Result<()> {
        self.images.lock().unwrap().push((frame_index, role));
        Ok(())
    }

    fn write_video_frame(&self, frame_index: u64, role: ImageRole, _image: &RgbImage) -> Result<()> {
        self.video.lock().unwrap().push((frame_index, role));
        Ok(())
    }

    fn write_chart(&self, artists: &ChartArtists) -> Result<()> {
        self.charts
            .lock()
            .unwrap()
            .push((artists.class, artists.metric, artists.line.len()));
        Ok(())
    }

    fn write_measurement_row(&self, row: &MeasurementRow) -> Result<()> {
        self.stamps.lock().unwrap().push(row.timestamp.timestamp_millis());
        self.rows
            .lock()
            .unwrap()
            .push((row.frame_index, row.measurements.detected()));
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.flushed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct MemorySurface {
    statuses: Mutex<Vec<Status>>,
    connections: Mutex<Vec<bool>>,
    previews: Mutex<Vec<ImageRole>>,
    charts: AtomicUsize,
}

impl MemorySurface {
    fn saw_state(&self, state: StatusState) -> bool {
        self.statuses.lock().unwrap().iter().any(|s| s.state == state)
    }

    fn last_status(&self) -> Option<Status> {
        self.statuses.lock().unwrap().last().cloned()
    }
}

impl PresentationSurface for MemorySurface {
    fn update_preview(&self, role: ImageRole, _image: &RgbImage) {
        self.previews.lock().unwrap().push(role);
    }

    fn update_status(&self, status: &Status) {
        self.statuses.lock().unwrap().push(status.clone());
    }

    fn update_chart(&self, _artists: &ChartArtists) {
        self.charts.fetch_add(1, Ordering::SeqCst);
    }

    fn update_connection(&self, connected: bool) {
        self.connections.lock().unwrap().push(connected);
    }
}

struct Harness {
    session: RecordingSession,
    script: Arc<SensorScript>,
    model_calls: Arc<AtomicUsize>,
    sink: Arc<MemorySink>,
    surface: Arc<MemorySurface>,
}

impl Harness {
    fn new(config: SessionConfig) -> Self {
        let surface = Arc::new(MemorySurface::default());
        let session = RecordingSession::from_config(&config, surface.clone()).unwrap();
        Self {
            session,
            script: Arc::new(SensorScript::default()),
            model_calls: Arc::new(AtomicUsize::new(0)),
            sink: Arc::new(MemorySink::default()),
            surface,
        }
    }

    fn start(&mut self, permission: RunPermission) {
        let sensor = Box::new(ScriptedSensor {
            script: self.script.clone(),
        });
        let model = Box::new(WireModel {
            calls: self.model_calls.clone(),
        });
        self.session
            .start(sensor, Some(model), Some(self.sink.clone()), permission)
            .unwrap();
    }

    /// Tick the session until `done` holds; false on deadline.
    fn tick_until(&mut self, mut done: impl FnMut(&Self) -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < DEADLINE {
            self.session.tick();
            if done(self) {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    fn rows(&self) -> Vec<(u64, usize)> {
        self.sink.rows.lock().unwrap().clone()
    }
}

fn config() -> SessionConfig {
    let mut config = SessionConfig::default();
    config.grab_timeout_ms = 200;
    config.recording.save_location = Some(std::env::temp_dir());
    config
}

#[test]
fn manual_session_persists_every_frame_in_order() {
    let mut harness = Harness::new(config());
    harness.start(RunPermission::Manual);

    assert!(harness.tick_until(|h| h.rows().len() >= 5 && h.sink.images.lock().unwrap().len() >= 5));
    let summary = harness.session.stop().unwrap();

    let rows = harness.rows();
    let indices: Vec<u64> = rows.iter().map(|(index, _)| *index).collect();
    let expected: Vec<u64> = (1..=indices.len() as u64).collect();
    assert_eq!(indices, expected);
    assert!(rows.iter().all(|(_, detected)| *detected == 1));

    let images = harness.sink.images.lock().unwrap().clone();
    assert!(images.iter().all(|(_, role)| *role == ImageRole::Raw));
    assert!(images.windows(2).all(|pair| pair[0].0 < pair[1].0));

    assert!(summary.frames >= rows.len() as u64);
    assert_eq!(summary.grab_failures, 0);
    assert!(harness.sink.flushed.load(Ordering::SeqCst));
    assert!(harness.surface.previews.lock().unwrap().contains(&ImageRole::Annotated));
    assert_eq!(harness.script.exposures.lock().unwrap().as_slice(), &[1_000]);
}

#[test]
fn rows_carry_the_sensor_grab_time() {
    let mut harness = Harness::new(config());
    harness.start(RunPermission::Manual);

    assert!(harness.tick_until(|h| h.rows().len() >= 3));
    harness.session.stop().unwrap();

    let stamps = harness.sink.stamps.lock().unwrap().clone();
    let expected: Vec<i64> = (0..stamps.len() as i64).map(|i| GRAB_EPOCH_MS + i).collect();
    assert_eq!(stamps, expected);
}

#[test]
fn video_roles_receive_every_recorded_frame() {
    let mut config = config();
    config.recording.video_raw = true;
    config.recording.video_segmented = true;
    let mut harness = Harness::new(config);
    harness.start(RunPermission::Manual);

    assert!(harness.tick_until(|h| h.sink.video.lock().unwrap().len() >= 6));
    harness.session.stop().unwrap();

    let video = harness.sink.video.lock().unwrap().clone();
    for role in [ImageRole::Raw, ImageRole::Segmented] {
        let frames: Vec<u64> = video.iter().filter(|(_, r)| *r == role).map(|(i, _)| *i).collect();
        assert!(!frames.is_empty(), "{role}");
        assert!(frames.windows(2).all(|pair| pair[0] < pair[1]));
    }
    assert!(video.iter().all(|(_, role)| *role != ImageRole::Annotated));
}

#[test]
fn final_charts_are_saved_when_the_session_stops() {
    let mut config = config();
    config.charts.save_charts = true;
    config.metrics = Metric::ALL
        .into_iter()
        .map(|metric| {
            let options = MetricOptions {
                enabled: metric == Metric::ClassArea,
                window: 1,
            };
            (metric, options)
        })
        .collect();
    let mut harness = Harness::new(config);
    harness.start(RunPermission::Manual);

    assert!(harness.tick_until(|h| h.rows().len() >= 3));
    assert!(harness.sink.charts.lock().unwrap().is_empty());
    harness.session.stop().unwrap();

    let charts = harness.sink.charts.lock().unwrap().clone();
    assert!(!charts.is_empty());
    assert!(charts.iter().all(|(_, metric, points)| *metric == Metric::ClassArea && *points > 0));
    assert!(charts.iter().any(|(class, _, _)| *class == ClassKind::WeldingWire));
}

#[test]
fn automatic_session_waits_for_signal_and_stops_when_it_drops() {
    let mut harness = Harness::new(config());
    let signal = TriggerSignal::new();
    harness.start(RunPermission::Automatic(signal.clone()));

    thread::sleep(Duration::from_millis(150));
    harness.session.tick();
    assert_eq!(harness.script.grabs.load(Ordering::SeqCst), 0);
    assert_eq!(
        harness.session.shared().status().get().state,
        StatusState::WaitingForTrigger
    );

    signal.set(true);
    assert!(harness.tick_until(|h| h.session.shared().frames() >= 3));
    assert!(harness.surface.saw_state(StatusState::Recording));

    signal.set(false);
    let start = Instant::now();
    let mut outcome = harness.session.tick();
    while outcome != TickOutcome::StopRequested && start.elapsed() < DEADLINE {
        thread::sleep(Duration::from_millis(2));
        outcome = harness.session.tick();
    }
    assert_eq!(outcome, TickOutcome::StopRequested);

    let summary = harness.session.stop().unwrap();
    assert!(summary.frames >= 3);
    assert_eq!(harness.session.state(), SessionState::Stopped);
}

#[test]
fn grab_timeouts_are_counted_and_recording_continues() {
    let mut harness = Harness::new(config());
    harness.script.timeouts_left.store(3, Ordering::SeqCst);
    harness.start(RunPermission::Manual);

    assert!(harness.tick_until(|h| h.session.shared().frames() >= 2));
    let summary = harness.session.stop().unwrap();

    assert_eq!(summary.grab_failures, 3);
    assert!(summary.frames >= 2);
    assert_eq!(harness.rows().first().map(|(index, _)| *index), Some(1));
}

#[test]
fn disconnects_reach_the_surface_and_exposure_is_reapplied() {
    let mut harness = Harness::new(config());
    harness.start(RunPermission::Manual);
    assert!(harness.tick_until(|h| h.session.shared().frames() >= 1));

    harness.script.disconnected.store(true, Ordering::SeqCst);
    assert!(harness.tick_until(|h| h.surface.connections.lock().unwrap().last() == Some(&false)));

    harness.script.disconnected.store(false, Ordering::SeqCst);
    assert!(harness.tick_until(|h| h.surface.connections.lock().unwrap().last() == Some(&true)));
    let summary = harness.session.stop().unwrap();

    assert!(summary.grab_failures >= 1);
    assert_eq!(harness.script.exposures.lock().unwrap().as_slice(), &[1_000, 1_000]);
}

#[test]
fn stop_joins_every_thread_and_rejects_reuse() {
    let mut harness = Harness::new(config());
    harness.start(RunPermission::Manual);
    assert!(harness.tick_until(|h| h.session.shared().frames() >= 1));

    harness.session.stop().unwrap();
    // The acquisition thread dropped its sensor on exit.
    assert_eq!(Arc::strong_count(&harness.script), 1);
    assert_eq!(harness.session.tick(), TickOutcome::Inactive);
    assert_eq!(harness.session.pending(), 0);
    assert_eq!(
        harness.surface.last_status().map(|s| s.state),
        Some(StatusState::Idle)
    );

    let grabs = harness.script.grabs.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(harness.script.grabs.load(Ordering::SeqCst), grabs);

    assert!(matches!(
        harness.session.stop(),
        Err(SessionError::InvalidState("stopped", "recording"))
    ));
    let restart = harness.session.start(
        Box::new(ScriptedSensor {
            script: harness.script.clone(),
        }),
        None,
        None,
        RunPermission::Manual,
    );
    assert!(matches!(
        restart,
        Err(SessionError::InvalidState("stopped", "idle"))
    ));
}

#[test]
fn disabled_segmentation_never_runs_the_model() {
    let mut config = config();
    config.segmentation.apply_segmentation = false;
    let mut harness = Harness::new(config);
    harness.start(RunPermission::Manual);

    assert!(harness.tick_until(|h| h.rows().len() >= 3));
    harness.session.stop().unwrap();

    assert_eq!(harness.model_calls.load(Ordering::SeqCst), 0);
    assert!(harness.rows().iter().all(|(_, detected)| *detected == 0));
}

#[test]
fn out_of_tolerance_windows_raise_a_tolerance_error() {
    let mut config = config();
    config.segmentation.compare_values = true;
    config.metrics = Metric::ALL
        .into_iter()
        .map(|metric| {
            let options = MetricOptions {
                enabled: metric == Metric::XMinimum,
                window: 2,
            };
            (metric, options)
        })
        .collect();
    let spec = ToleranceSpec {
        desired: 0.0,
        positive: 1.0,
        negative: 1.0,
    };
    let per_class = ClassKind::ALL
        .into_iter()
        .map(|class| (class, BTreeMap::from([(Metric::XMinimum, spec)])))
        .collect();
    config.material = Some("steel".into());
    config.materials = BTreeMap::from([("steel".to_string(), per_class)]);

    let mut harness = Harness::new(config);
    harness.start(RunPermission::Manual);
    assert!(harness.tick_until(|h| h.surface.saw_state(StatusState::ToleranceError)));
    let summary = harness.session.stop().unwrap();

    assert_eq!(summary.final_status.state, StatusState::ToleranceError);
    let detail = summary.final_status.detail.unwrap_or_default();
    assert!(detail.contains("Welding Wire"), "{detail}");
    assert!(harness.surface.charts.load(Ordering::SeqCst) > 0);
}

#[test]
fn undetected_classes_never_raise_a_tolerance_error() {
    let mut config = config();
    config.segmentation.compare_values = true;
    config.metrics = Metric::ALL
        .into_iter()
        .map(|metric| {
            let options = MetricOptions {
                enabled: metric == Metric::ClassArea,
                window: 2,
            };
            (metric, options)
        })
        .collect();
    let band = |desired| ToleranceSpec {
        desired,
        positive: 100.0,
        negative: 100.0,
    };
    // The wire covers 16 pixels; the other classes are never segmented.
    let per_class = ClassKind::ALL
        .into_iter()
        .map(|class| {
            let desired = if class == ClassKind::WeldingWire { 16.0 } else { 500.0 };
            (class, BTreeMap::from([(Metric::ClassArea, band(desired))]))
        })
        .collect();
    config.material = Some("steel".into());
    config.materials = BTreeMap::from([("steel".to_string(), per_class)]);

    let mut harness = Harness::new(config);
    harness.start(RunPermission::Manual);
    assert!(harness.tick_until(|h| h.rows().len() >= 6));
    let summary = harness.session.stop().unwrap();

    assert!(!harness.surface.saw_state(StatusState::ToleranceError));
    assert_eq!(summary.final_status.state, StatusState::Recording);
}

#[test]
fn filesystem_sink_writes_images_and_a_measurement_log() {
    let root = tempfile::tempdir().unwrap();
    let mut config = config();
    config.recording.save_location = Some(root.path().to_path_buf());
    config.recording.image_annotated = true;
    config.context = BTreeMap::from([("job".to_string(), "J-17".to_string())]);

    let surface = Arc::new(MemorySurface::default());
    let mut session = RecordingSession::from_config(&config, surface).unwrap();
    let sink = Arc::new(FsPersistenceSink::create(root.path(), Utc::now()).unwrap());
    let dir = sink.session_dir().to_path_buf();
    let raw_path = sink.image_path(ImageRole::Raw, 1);
    let annotated_path = sink.image_path(ImageRole::Annotated, 1);

    let script = Arc::new(SensorScript::default());
    session
        .start(
            Box::new(ScriptedSensor { script }),
            Some(Box::new(WireModel {
                calls: Arc::new(AtomicUsize::new(0)),
            })),
            Some(sink),
            RunPermission::Manual,
        )
        .unwrap();

    let log = dir.join("measurements.jsonl");
    let start = Instant::now();
    while start.elapsed() < DEADLINE {
        session.tick();
        let lines = fs::read_to_string(&log).map(|t| t.lines().count()).unwrap_or(0);
        if lines >= 2 && annotated_path.exists() {
            break;
        }
        thread::sleep(Duration::from_millis(2));
    }
    session.stop().unwrap();

    assert!(raw_path.exists());
    assert!(annotated_path.exists());
    let text = fs::read_to_string(&log).unwrap();
    let first: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
    assert_eq!(first["frame_index"], 1);
    assert_eq!(first["context"]["job"], "J-17");
    assert_eq!(first["measurements"]["Welding Wire"]["x_min"], 2);
    assert!(first["measurements"]["Arc Flash"].is_null());
}
