//! Recording session lifecycle: `Idle -> Recording -> Stopped`.

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, unbounded};
use ml_core::SegmentationModel;
use serde::Serialize;
use tracing::{info, warn};
use video_ingest::SensorDriver;

use crate::{
    aggregate::{MetricAggregator, SeriesPoint},
    chart::LiveChartState,
    error::SessionError,
    measurement::MeasurementEngine,
    model::ClassMetricTable,
    pipeline::{
        acquisition::{AcquisitionWorker, RunPermission},
        config::{RunPermissionMode, SessionConfig, SessionPlan},
        data::PipelineMessage,
        dispatch::{self, ConsumerKind, Dispatcher, PreviewConsumer},
        telemetry,
    },
    sink::{PersistenceSink, PresentationSurface},
    status::{SharedState, Status, StatusState},
    tolerance::ToleranceMonitor,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Recording,
    Stopped,
}

impl SessionState {
    fn name(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Recording => "recording",
            SessionState::Stopped => "stopped",
        }
    }
}

/// Result of one presentation tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// The frame with this index was fanned out to the consumers.
    Dispatched(u64),
    /// Nothing was waiting.
    Empty,
    /// The acquisition worker asked for the session to stop.
    StopRequested,
    /// The session is not recording.
    Inactive,
}

#[derive(Clone, Debug, Serialize)]
pub struct SessionSummary {
    pub frames: u64,
    pub grab_failures: u64,
    pub final_status: Status,
    pub duration: Duration,
}

struct Running {
    running: Arc<AtomicBool>,
    acquisition: thread::JoinHandle<ClassMetricTable<Vec<SeriesPoint>>>,
    consumers: Vec<thread::JoinHandle<()>>,
    dispatcher: Dispatcher,
    persistence: Option<Arc<dyn PersistenceSink>>,
    started: Instant,
}

pub struct RecordingSession {
    plan: Arc<SessionPlan>,
    presentation: Arc<dyn PresentationSurface>,
    shared: Arc<SharedState>,
    state: SessionState,
    running: Option<Running>,
}

impl RecordingSession {
    pub fn new(plan: SessionPlan, presentation: Arc<dyn PresentationSurface>) -> Self {
        Self {
            plan: Arc::new(plan),
            presentation,
            shared: Arc::new(SharedState::default()),
            state: SessionState::Idle,
            running: None,
        }
    }

    /// Validate `config` and build an idle session from it.
    pub fn from_config(
        config: &SessionConfig,
        presentation: Arc<dyn PresentationSurface>,
    ) -> Result<Self, SessionError> {
        Ok(Self::new(config.plan()?, presentation))
    }

    pub fn plan(&self) -> &SessionPlan {
        &self.plan
    }

    pub fn shared(&self) -> &Arc<SharedState> {
        &self.shared
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Open the sensor and start the acquisition worker and the three consumers.
    ///
    /// `model` is only used when segmentation is enabled in the plan;
    /// `persistence` may be absent, in which case the persistence consumers
    /// drain their queues without writing.
    pub fn start(
        &mut self,
        mut driver: Box<dyn SensorDriver>,
        model: Option<Box<dyn SegmentationModel>>,
        persistence: Option<Arc<dyn PersistenceSink>>,
        permission: RunPermission,
    ) -> Result<(), SessionError> {
        if self.state != SessionState::Idle {
            return Err(SessionError::InvalidState(self.state.name(), "idle"));
        }
        if matches!(permission, RunPermission::Manual)
            && self.plan.run_permission == RunPermissionMode::Automatic
        {
            warn!("Configuration asks for automatic run permission but no trigger was supplied");
        }

        driver.open()?;
        let device = driver.device_info();
        info!("Sensor {} opened", device.model);

        let engine = match (self.plan.apply_segmentation, model) {
            (true, Some(model)) => MeasurementEngine::new(model, &self.plan.class_ids),
            (true, None) => {
                warn!("Segmentation enabled but no model supplied; measurements will be empty");
                MeasurementEngine::disabled()
            }
            (false, _) => MeasurementEngine::disabled(),
        };

        self.shared.reset();
        self.shared.set_sensor_connected(true);
        self.shared.set_recording(true);
        let initial = match permission {
            RunPermission::Manual => StatusState::Recording,
            RunPermission::Automatic(_) => StatusState::WaitingForTrigger,
        };
        self.shared.status().set(Status::new(initial));

        let running = Arc::new(AtomicBool::new(true));
        let (handoff_tx, handoff_rx) = unbounded();
        let (image_tx, image_rx) = unbounded();
        let (row_tx, row_rx) = unbounded();
        let (preview_tx, preview_rx) = unbounded();

        let mut consumers = Vec::with_capacity(ConsumerKind::ALL.len());
        let spawned = self.spawn_consumers(
            [image_rx, row_rx, preview_rx],
            &running,
            persistence.clone(),
            &mut consumers,
        );
        if let Err(err) = spawned {
            self.abort_start(&running, consumers);
            return Err(err);
        }

        let worker = AcquisitionWorker {
            driver,
            engine,
            aggregator: MetricAggregator::new(self.plan.windows.clone()),
            tolerance: ToleranceMonitor::new(self.plan.tolerances.clone(), self.plan.compare_values),
            plan: self.plan.clone(),
            shared: self.shared.clone(),
            permission,
            handoff: handoff_tx,
        };
        let acquisition = match telemetry::spawn_thread("acquisition", move || worker.run()) {
            Ok(handle) => handle,
            Err(source) => {
                self.abort_start(&running, consumers);
                return Err(SessionError::Spawn {
                    name: "acquisition",
                    source,
                });
            }
        };

        let mut dispatcher = Dispatcher::new(
            handoff_rx,
            [image_tx, row_tx, preview_tx],
            self.plan.clone(),
            self.shared.clone(),
            self.presentation.clone(),
        );
        dispatcher.publish_status();

        self.running = Some(Running {
            running,
            acquisition,
            consumers,
            dispatcher,
            persistence,
            started: Instant::now(),
        });
        self.state = SessionState::Recording;
        info!("Recording session started");
        Ok(())
    }

    fn spawn_consumers(
        &self,
        [image_rx, row_rx, preview_rx]: [Receiver<PipelineMessage>; 3],
        running: &Arc<AtomicBool>,
        persistence: Option<Arc<dyn PersistenceSink>>,
        handles: &mut Vec<thread::JoinHandle<()>>,
    ) -> Result<(), SessionError> {
        let sink = persistence.clone();
        handles.push(
            dispatch::spawn_consumer(
                ConsumerKind::PersistImage,
                image_rx,
                running.clone(),
                move |message| match sink.as_deref() {
                    Some(sink) => dispatch::persist_images(sink, &message),
                    None => Ok(()),
                },
            )
            .map_err(spawn_error(ConsumerKind::PersistImage))?,
        );

        let sink = persistence;
        handles.push(
            dispatch::spawn_consumer(
                ConsumerKind::PersistRow,
                row_rx,
                running.clone(),
                move |message| match sink.as_deref() {
                    Some(sink) => dispatch::persist_row(sink, &message),
                    None => Ok(()),
                },
            )
            .map_err(spawn_error(ConsumerKind::PersistRow))?,
        );

        let mut preview = PreviewConsumer::new(self.presentation.clone(), self.plan.clone());
        handles.push(
            dispatch::spawn_consumer(
                ConsumerKind::Preview,
                preview_rx,
                running.clone(),
                move |message| preview.handle(&message),
            )
            .map_err(spawn_error(ConsumerKind::Preview))?,
        );
        Ok(())
    }

    fn abort_start(&mut self, running: &Arc<AtomicBool>, handles: Vec<thread::JoinHandle<()>>) {
        running.store(false, Ordering::SeqCst);
        self.shared.set_recording(false);
        for handle in handles {
            let _ = handle.join();
        }
        self.shared.status().set(Status::new(StatusState::Idle));
    }

    /// One presentation tick: publish status, fan out at most one record.
    pub fn tick(&mut self) -> TickOutcome {
        let Some(running) = self.running.as_mut() else {
            return TickOutcome::Inactive;
        };
        let dispatched = running.dispatcher.tick();
        if self.shared.stop_requested() {
            return TickOutcome::StopRequested;
        }
        match dispatched {
            Some(frame_index) => TickOutcome::Dispatched(frame_index),
            None => TickOutcome::Empty,
        }
    }

    /// Records produced but not yet fanned out.
    pub fn pending(&self) -> usize {
        self.running
            .as_ref()
            .map_or(0, |running| running.dispatcher.pending())
    }

    /// Signal every thread to stop and wait for them to finish in-flight work.
    /// Records still queued are discarded.
    pub fn stop(&mut self) -> Result<SessionSummary, SessionError> {
        let Some(running) = self.running.take() else {
            return Err(SessionError::InvalidState(self.state.name(), "recording"));
        };

        self.shared.set_recording(false);
        running.running.store(false, Ordering::SeqCst);
        let series = match running.acquisition.join() {
            Ok(series) => Some(series),
            Err(_) => {
                warn!("Acquisition thread panicked");
                None
            }
        };
        for handle in running.consumers {
            if handle.join().is_err() {
                warn!("Consumer thread panicked");
            }
        }
        if let Some(sink) = running.persistence.as_ref() {
            if let (true, Some(series)) = (self.plan.charts.save_charts, series.as_ref()) {
                self.save_charts(sink.as_ref(), series);
            }
            if let Err(err) = sink.flush() {
                warn!("Failed to flush persistence sink: {err:#}");
            }
        }

        let final_status = self.shared.status().get();
        let summary = SessionSummary {
            frames: self.shared.frames(),
            grab_failures: self.shared.grab_failures(),
            final_status,
            duration: running.started.elapsed(),
        };
        self.shared.status().set(Status::new(StatusState::Idle));
        self.presentation.update_status(&self.shared.status().get());
        self.state = SessionState::Stopped;
        info!(
            "Recording session stopped after {} frame(s), {} grab failure(s)",
            summary.frames, summary.grab_failures
        );
        Ok(summary)
    }

    fn save_charts(&self, sink: &dyn PersistenceSink, series: &ClassMetricTable<Vec<SeriesPoint>>) {
        let charts = LiveChartState::from_series(series, &self.plan.tolerances);
        let mut saved = 0;
        for artists in charts.sorted() {
            match sink.write_chart(artists) {
                Ok(()) => saved += 1,
                Err(err) => warn!(
                    "Failed to save {} {} chart: {err:#}",
                    artists.class, artists.metric
                ),
            }
        }
        info!("Saved {saved} chart(s)");
    }
}

fn spawn_error(kind: ConsumerKind) -> impl FnOnce(io::Error) -> SessionError {
    move |source| SessionError::Spawn {
        name: kind.label(),
        source,
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        if self.running.is_some() {
            let _ = self.stop();
        }
    }
}
