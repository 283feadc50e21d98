//! Presentation-side fan-out and the three consumer threads.
//!
//! The acquisition thread pushes finished records onto an unbounded hand-off
//! queue. A short periodic tick on the presentation thread pops at most one
//! record per call and pushes a lightweight message onto each consumer queue.
//! Consumers drain their queue in FIFO order; a failure in one never affects
//! the others.

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use image::{RgbImage, imageops::FilterType};
use tracing::{debug, info_span, warn};

use crate::{
    chart::LiveChartState,
    model::ClassMetricTable,
    pipeline::{
        config::SessionPlan,
        data::{Payload, PipelineMessage, SharedRecord},
        telemetry,
    },
    sink::{MeasurementRow, PersistenceSink, PresentationSurface},
    status::SharedState,
};

/// Bound on how long a consumer blocks before re-checking the stop flag.
const CONSUMER_POLL: Duration = Duration::from_millis(50);

/// Hand-off depth at which capture is reported as outrunning the tick.
pub(crate) const HANDOFF_BACKLOG_WARN: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsumerKind {
    PersistImage,
    PersistRow,
    Preview,
}

impl ConsumerKind {
    pub const ALL: [ConsumerKind; 3] = [
        ConsumerKind::PersistImage,
        ConsumerKind::PersistRow,
        ConsumerKind::Preview,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ConsumerKind::PersistImage => "persist_image",
            ConsumerKind::PersistRow => "persist_row",
            ConsumerKind::Preview => "preview",
        }
    }
}

/// Runs on the presentation thread; owns the sending side of every consumer queue.
pub(crate) struct Dispatcher {
    handoff: Receiver<SharedRecord>,
    image_tx: Sender<PipelineMessage>,
    row_tx: Sender<PipelineMessage>,
    preview_tx: Sender<PipelineMessage>,
    plan: Arc<SessionPlan>,
    shared: Arc<SharedState>,
    presentation: Arc<dyn PresentationSurface>,
    published_status: Option<u64>,
    published_connection: Option<bool>,
    backlog_warned: bool,
}

impl Dispatcher {
    pub(crate) fn new(
        handoff: Receiver<SharedRecord>,
        queues: [Sender<PipelineMessage>; 3],
        plan: Arc<SessionPlan>,
        shared: Arc<SharedState>,
        presentation: Arc<dyn PresentationSurface>,
    ) -> Self {
        let [image_tx, row_tx, preview_tx] = queues;
        Self {
            handoff,
            image_tx,
            row_tx,
            preview_tx,
            plan,
            shared,
            presentation,
            published_status: None,
            published_connection: None,
            backlog_warned: false,
        }
    }

    /// Publish pending status changes, then fan out at most one record.
    /// Never blocks. Returns the index of the dispatched frame, if any.
    pub(crate) fn tick(&mut self) -> Option<u64> {
        let _span = info_span!("dispatch.tick").entered();
        self.publish_status();

        let record = self.handoff.try_recv().ok()?;
        let frame_index = record.frame_index;

        let row = MeasurementRow {
            frame_index,
            timestamp: record.timestamp,
            exposure_us: record.exposure_us,
            loop_count: record.loop_count,
            material: self.plan.material.clone(),
            context: self.plan.context.clone(),
            measurements: record.measurements.clone(),
        };
        let messages = [
            (
                &self.image_tx,
                ConsumerKind::PersistImage,
                Payload::Images {
                    stills: self.plan.persisted_roles.clone(),
                    video: self.plan.video_roles.clone(),
                },
            ),
            (&self.row_tx, ConsumerKind::PersistRow, Payload::Row(row)),
            (
                &self.preview_tx,
                ConsumerKind::Preview,
                Payload::Preview {
                    roles: self.plan.preview_roles.clone(),
                    width: self.plan.preview_width,
                },
            ),
        ];
        for (tx, kind, payload) in messages {
            let message = PipelineMessage {
                record: record.clone(),
                payload,
            };
            if tx.send(message).is_err() {
                debug!("{} queue closed, dropping frame #{frame_index}", kind.label());
            }
            metrics::gauge!("deposition_queue_depth", "queue" => kind.label())
                .set(tx.len() as f64);
        }
        let backlog = self.handoff.len();
        metrics::gauge!("deposition_queue_depth", "queue" => "handoff").set(backlog as f64);
        self.check_backlog(backlog);
        Some(frame_index)
    }

    /// Warn once when the hand-off queue passes [`HANDOFF_BACKLOG_WARN`];
    /// re-arms after it drains below half. Returns whether a warning fired.
    pub(crate) fn check_backlog(&mut self, depth: usize) -> bool {
        if depth >= HANDOFF_BACKLOG_WARN {
            if !self.backlog_warned {
                self.backlog_warned = true;
                warn!(
                    "Dispatcher is falling behind capture: {depth} record(s) waiting; \
                     consider a shorter tick_interval_ms or a lower frame rate"
                );
                return true;
            }
        } else if depth < HANDOFF_BACKLOG_WARN / 2 {
            self.backlog_warned = false;
        }
        false
    }

    /// Records waiting in the hand-off queue.
    pub(crate) fn pending(&self) -> usize {
        self.handoff.len()
    }

    pub(crate) fn publish_status(&mut self) {
        let (status, version) = self.shared.status().snapshot();
        if self.published_status != Some(version) {
            self.published_status = Some(version);
            self.presentation.update_status(&status);
        }
        let connected = self.shared.sensor_connected();
        if self.published_connection != Some(connected) {
            self.published_connection = Some(connected);
            self.presentation.update_connection(connected);
        }
    }
}

/// Spawn a consumer loop. The loop exits once `running` clears, after the
/// message in hand is finished; anything still queued is discarded.
pub(crate) fn spawn_consumer<F>(
    kind: ConsumerKind,
    rx: Receiver<PipelineMessage>,
    running: Arc<AtomicBool>,
    mut handle: F,
) -> io::Result<thread::JoinHandle<()>>
where
    F: FnMut(PipelineMessage) -> Result<()> + Send + 'static,
{
    telemetry::spawn_thread(format!("consumer-{}", kind.label()), move || {
        let name = kind.label();
        while running.load(Ordering::SeqCst) {
            let message = match rx.recv_timeout(CONSUMER_POLL) {
                Ok(message) => message,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            let frame_index = message.record.frame_index;
            let span = info_span!("consumer", consumer = name, frame = frame_index);
            let _guard = span.enter();
            let start = Instant::now();
            if let Err(err) = handle(message) {
                metrics::counter!("deposition_consumer_errors_total", "consumer" => name)
                    .increment(1);
                warn!("{name} failed for frame #{frame_index}: {err:#}");
            }
            metrics::histogram!("deposition_stage_latency_seconds", "stage" => name)
                .record(start.elapsed().as_secs_f64());
        }
        let discarded = rx.len();
        if discarded > 0 {
            debug!("{name} consumer stopping, discarding {discarded} queued message(s)");
        }
    })
}

/// Writes every requested still and video role of the record.
pub(crate) fn persist_images(sink: &dyn PersistenceSink, message: &PipelineMessage) -> Result<()> {
    let Payload::Images { stills, video } = &message.payload else {
        return Ok(());
    };
    let record = &message.record;
    let writes = stills
        .iter()
        .map(|role| (*role, false))
        .chain(video.iter().map(|role| (*role, true)));
    let mut first_error = None;
    for (role, as_video) in writes {
        let Some(image) = record.image(role) else {
            continue;
        };
        let written = if as_video {
            sink.write_video_frame(record.frame_index, role, image)
                .with_context(|| format!("{role} video frame"))
        } else {
            sink.write_image(record.frame_index, role, image)
                .with_context(|| format!("{role} image"))
        };
        if let Err(err) = written {
            if first_error.is_none() {
                first_error = Some(err);
            } else {
                warn!("{err:#}");
            }
        }
    }
    first_error.map_or(Ok(()), Err)
}

pub(crate) fn persist_row(sink: &dyn PersistenceSink, message: &PipelineMessage) -> Result<()> {
    let Payload::Row(row) = &message.payload else {
        return Ok(());
    };
    sink.write_measurement_row(row)
        .with_context(|| format!("measurement row for frame #{}", row.frame_index))
}

/// Preview consumer state: scaled previews plus the retained chart artists.
pub(crate) struct PreviewConsumer {
    presentation: Arc<dyn PresentationSurface>,
    plan: Arc<SessionPlan>,
    charts: LiveChartState,
    series: ClassMetricTable<(Vec<f64>, Vec<f64>)>,
}

impl PreviewConsumer {
    pub(crate) fn new(presentation: Arc<dyn PresentationSurface>, plan: Arc<SessionPlan>) -> Self {
        Self {
            presentation,
            plan,
            charts: LiveChartState::default(),
            series: ClassMetricTable::default(),
        }
    }

    pub(crate) fn handle(&mut self, message: &PipelineMessage) -> Result<()> {
        let Payload::Preview { roles, width } = &message.payload else {
            return Ok(());
        };
        let record = &message.record;
        for role in roles {
            if let Some(image) = record.image(*role) {
                let preview = scale_to_width(image, *width);
                self.presentation.update_preview(*role, &preview);
            }
        }

        for sample in &record.emitted {
            if !self.plan.charts.shows(sample.metric.group()) {
                continue;
            }
            let (xs, ys) = self.series.get_mut(sample.class, sample.metric);
            xs.push(sample.point.frame_index as f64);
            ys.push(sample.point.value);
            let tolerance = self.plan.tolerances.get(sample.class, sample.metric).as_ref();
            let artists = self
                .charts
                .plot(sample.metric, sample.class, xs, ys, tolerance);
            self.presentation.update_chart(artists);
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn charts(&self) -> &LiveChartState {
        &self.charts
    }
}

/// Downscale to `width` keeping aspect ratio; narrower images pass through.
fn scale_to_width(image: &RgbImage, width: u32) -> RgbImage {
    let (w, h) = image.dimensions();
    if w <= width || w == 0 {
        return image.clone();
    }
    let height = ((h as u64 * width as u64) / w as u64).max(1) as u32;
    image::imageops::resize(image, width, height, FilterType::Triangle)
}
