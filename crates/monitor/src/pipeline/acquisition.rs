//! Frame acquisition worker.
//!
//! One dedicated thread owns the sensor, the measurement engine and all
//! aggregation state. Each iteration applies the scheduled exposure, grabs
//! with a bounded timeout, measures the frame synchronously and hands the
//! finished record to the dispatcher.

use std::{
    collections::VecDeque,
    sync::{Arc, Condvar, Mutex},
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use crossbeam_channel::Sender;
use tracing::{debug, info, info_span, warn};
use video_ingest::{CaptureError, ConnectionState, GrabOutcome, SensorDriver};

use crate::{
    aggregate::{MetricAggregator, SeriesPoint},
    annotation::{self, OverlayInfo},
    measurement::{Measured, MeasurementEngine},
    model::ClassMetricTable,
    pipeline::{
        config::SessionPlan,
        data::{FrameRecord, SharedRecord},
    },
    sink::ImageRole,
    status::{SharedState, Status, StatusState},
    tolerance::ToleranceMonitor,
};

/// How often a blocked trigger wait re-checks the recording flag.
const TRIGGER_POLL: Duration = Duration::from_millis(100);

/// Frame rate measured over the most recent grabs.
#[derive(Default)]
pub(crate) struct FrameRate {
    stamps: VecDeque<Instant>,
}

impl FrameRate {
    const SPAN: usize = 30;

    pub(crate) fn tick(&mut self, now: Instant) -> Option<f64> {
        if self.stamps.len() == Self::SPAN {
            self.stamps.pop_front();
        }
        self.stamps.push_back(now);
        let first = *self.stamps.front()?;
        let span = now.duration_since(first).as_secs_f64();
        (self.stamps.len() > 1 && span > 0.0).then(|| (self.stamps.len() - 1) as f64 / span)
    }
}

/// External run input for automatic mode. Cloning shares the same signal.
#[derive(Clone, Default)]
pub struct TriggerSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl TriggerSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, run: bool) {
        let (lock, changed) = &*self.inner;
        let mut state = match lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *state = run;
        changed.notify_all();
    }

    pub fn is_set(&self) -> bool {
        let (lock, _) = &*self.inner;
        match lock.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Block until the signal reads run, or `timeout` passes. Returns the
    /// state observed on wake-up.
    pub fn wait_for_run(&self, timeout: Duration) -> bool {
        let (lock, changed) = &*self.inner;
        let guard = match lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let result = changed.wait_timeout_while(guard, timeout, |run| !*run);
        match result {
            Ok((guard, _)) => *guard,
            Err(poisoned) => *poisoned.into_inner().0,
        }
    }
}

/// Whether the worker may grab freely or must follow an external signal.
#[derive(Clone, Default)]
pub enum RunPermission {
    #[default]
    Manual,
    Automatic(TriggerSignal),
}

pub(crate) struct AcquisitionWorker {
    pub(crate) driver: Box<dyn SensorDriver>,
    pub(crate) engine: MeasurementEngine,
    pub(crate) aggregator: MetricAggregator,
    pub(crate) tolerance: ToleranceMonitor,
    pub(crate) plan: Arc<SessionPlan>,
    pub(crate) shared: Arc<SharedState>,
    pub(crate) permission: RunPermission,
    pub(crate) handoff: Sender<SharedRecord>,
}

impl AcquisitionWorker {
    /// Acquire until the session stops. Returns every metric series.
    pub(crate) fn run(mut self) -> ClassMetricTable<Vec<SeriesPoint>> {
        let started = Instant::now();
        let timeout_ms = self.plan.grab_timeout.as_millis() as u64;
        let mut armed = false;
        let mut applied_exposure: Option<u32> = None;
        let mut frame_rate = FrameRate::default();

        while self.shared.is_recording() {
            if let RunPermission::Automatic(signal) = &self.permission {
                if !signal.is_set() {
                    if armed {
                        info!("Run signal dropped, requesting session stop");
                        self.shared.request_stop();
                        break;
                    }
                    self.shared
                        .status()
                        .set(Status::new(StatusState::WaitingForTrigger));
                    signal.wait_for_run(TRIGGER_POLL);
                    continue;
                }
                if !armed {
                    armed = true;
                    info!("Run signal received, acquisition armed");
                    self.shared.status().set(Status::new(StatusState::Recording));
                }
            }

            let sample = self.plan.schedule.compute(started.elapsed().as_secs_f64());
            if applied_exposure != Some(sample.exposure_us) {
                match self.driver.set_exposure(sample.exposure_us) {
                    Ok(()) => {
                        debug!(
                            "Exposure set to {} us (loop {})",
                            sample.exposure_us, sample.loop_count
                        );
                        applied_exposure = Some(sample.exposure_us);
                    }
                    Err(err) => warn!("Failed to apply exposure {} us: {err}", sample.exposure_us),
                }
            }

            let grab_start = Instant::now();
            let grab = info_span!("acquisition.grab", exposure = sample.exposure_us)
                .in_scope(|| self.driver.grab_frame(timeout_ms));
            metrics::histogram!("deposition_stage_latency_seconds", "stage" => "grab")
                .record(grab_start.elapsed().as_secs_f64());

            let frame = match grab {
                Ok(GrabOutcome::Frame(frame)) => frame,
                Ok(GrabOutcome::Timeout) => {
                    self.grab_failed("timeout", &format!("no frame within {timeout_ms} ms"));
                    applied_exposure = self.recheck_connection(applied_exposure);
                    continue;
                }
                Err(err) => {
                    self.grab_failed(failure_kind(&err), &err.to_string());
                    applied_exposure = self.recheck_connection(applied_exposure);
                    continue;
                }
            };
            if self.shared.set_sensor_connected(true) {
                info!("Sensor connected");
            }
            let fps = frame_rate.tick(Instant::now());
            // Rows carry the sensor's grab time, not the time measurement finished.
            let timestamp =
                DateTime::from_timestamp_millis(frame.timestamp_ms).unwrap_or_else(Utc::now);

            let image = match frame.to_rgb_image() {
                Ok(image) => image,
                Err(err) => {
                    self.grab_failed("invalid", &err.to_string());
                    continue;
                }
            };

            // A stop that lands during the grab discards the frame.
            if !self.shared.is_recording() {
                break;
            }

            let frame_index = self.shared.next_frame_index();
            let frame_span = info_span!("frame", frame = frame_index);
            let _frame_guard = frame_span.enter();

            let measured = self.measure(&image);
            let emitted = self.aggregator.ingest(frame_index, &measured.set);
            if self.tolerance.is_enabled()
                && self.tolerance.evaluate_emitted(&emitted, &self.aggregator) > 0
            {
                self.shared.status().set(self.tolerance.status());
            }

            let annotated = self.plan.renders(ImageRole::Annotated).then(|| {
                let info = OverlayInfo {
                    frame_index,
                    timestamp,
                    exposure_us: sample.exposure_us,
                    loop_count: sample.loop_count,
                    fps,
                    elapsed: started.elapsed(),
                    material: self.plan.material.as_deref(),
                    context: &self.plan.context,
                };
                annotation::annotate(&image, &measured, &self.plan.annotation, &info)
            });
            let segmented = self
                .plan
                .renders(ImageRole::Segmented)
                .then(|| annotation::segment_overlay(&image, &measured));

            let record = Arc::new(FrameRecord {
                frame_index,
                timestamp,
                exposure_us: sample.exposure_us,
                loop_count: sample.loop_count,
                raw: image,
                annotated,
                segmented,
                measurements: measured.set,
                emitted,
            });

            metrics::counter!("deposition_frames_total").increment(1);
            if self.handoff.send(record).is_err() {
                warn!("Dispatcher hand-off closed, stopping acquisition");
                break;
            }
            metrics::gauge!("deposition_queue_depth", "queue" => "handoff")
                .set(self.handoff.len() as f64);
            if frame_index % 100 == 0 {
                debug!(
                    "Acquisition heartbeat: frame #{frame_index}, exposure {} us, grab failures {}",
                    sample.exposure_us,
                    self.shared.grab_failures()
                );
            }
        }
        debug!("Acquisition worker exiting");
        self.aggregator.into_series()
    }

    fn measure(&mut self, image: &image::RgbImage) -> Measured {
        let start = Instant::now();
        let result = info_span!("acquisition.measure").in_scope(|| self.engine.measure(image));
        metrics::histogram!("deposition_stage_latency_seconds", "stage" => "measure")
            .record(start.elapsed().as_secs_f64());
        match result {
            Ok(measured) => measured,
            Err(err) => {
                metrics::counter!("deposition_measurement_failures_total").increment(1);
                warn!("Segmentation failed, frame recorded without measurements: {err:?}");
                Measured::default()
            }
        }
    }

    fn grab_failed(&self, kind: &'static str, detail: &str) {
        let failures = self.shared.record_grab_failure();
        metrics::counter!("deposition_grab_failures_total", "kind" => kind).increment(1);
        if failures == 1 || failures % 50 == 0 {
            warn!("Grab failed ({kind}): {detail} [{failures} total]");
        } else {
            debug!("Grab failed ({kind}): {detail}");
        }
    }

    /// Refresh the connection flag after a failed grab. A disconnect forgets
    /// the applied exposure so it is re-sent once the device returns.
    fn recheck_connection(&self, applied: Option<u32>) -> Option<u32> {
        let info = self.driver.device_info();
        let connected = info.connection == ConnectionState::Connected;
        if self.shared.set_sensor_connected(connected) {
            if connected {
                info!("Sensor {} reconnected", info.model);
            } else {
                warn!("Sensor {} disconnected, retrying", info.model);
            }
        }
        if connected { applied } else { None }
    }
}

fn failure_kind(err: &CaptureError) -> &'static str {
    match err {
        CaptureError::Open { .. } => "open",
        CaptureError::InvalidGrab(_) => "invalid",
        CaptureError::Disconnected => "disconnected",
        CaptureError::Other(_) => "other",
    }
}
