//! `depmon record`: wire a sensor, a model and the preview board into a
//! recording session and drive its presentation tick until asked to stop.

use std::{
    sync::{
        Arc, Once,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use ml_core::SegmentationModel;
use monitor::{
    FsPersistenceSink, PersistenceSink, RecordingSession, RunPermission, SessionConfig,
    SessionPlan, TickOutcome, TriggerSignal,
    pipeline::{RunPermissionMode, TelemetryOptions, telemetry},
};
use tracing::{info, warn};
use video_ingest::{ReplaySensor, SensorDriver};

use crate::{
    cli::RecordArgs,
    server::{PreviewBoard, spawn_preview_server},
};

pub(crate) fn run(args: RecordArgs) -> Result<()> {
    let _telemetry = telemetry::enter_runtime(&TelemetryOptions {
        chrome_trace_path: args.chrome_trace.clone(),
    });
    telemetry::init_metrics_recorder();

    let mut config = match args.config.as_ref() {
        Some(path) => SessionConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => SessionConfig::default(),
    };
    if args.trigger {
        config.run_permission = RunPermissionMode::Automatic;
    }
    let plan = config.plan().context("configuration is invalid")?;
    let duration = args
        .duration
        .map(|seconds| {
            Duration::try_from_secs_f64(seconds)
                .with_context(|| format!("invalid --duration {seconds}"))
        })
        .transpose()?;

    let sensor = open_sensor(&args)?;
    let model = load_model(&args, &plan)?;
    let persistence: Option<Arc<dyn PersistenceSink>> = match plan.save_location.as_ref() {
        Some(root) => {
            let sink = FsPersistenceSink::create(root, Utc::now())?;
            info!("Persisting session to {}", sink.session_dir().display());
            Some(Arc::new(sink))
        }
        None => {
            warn!("No save_location configured; nothing will be persisted");
            None
        }
    };

    let trigger = (plan.run_permission == RunPermissionMode::Automatic).then(TriggerSignal::new);
    let permission = match trigger.clone() {
        Some(signal) => RunPermission::Automatic(signal),
        None => RunPermission::Manual,
    };
    let board = Arc::new(PreviewBoard::new(trigger));
    let server = spawn_preview_server(board.clone(), &args.bind)?;

    let tick_interval = plan.tick_interval;
    let mut session = RecordingSession::new(plan, board);
    session
        .start(sensor, model, persistence, permission)
        .context("failed to start recording session")?;

    let shutdown = install_ctrlc_handler();
    let deadline = duration.map(|duration| Instant::now() + duration);
    loop {
        if shutdown.load(Ordering::SeqCst) {
            info!("Ctrl+C received, stopping");
            break;
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            info!("Recording duration elapsed, stopping");
            break;
        }
        match session.tick() {
            TickOutcome::StopRequested => {
                info!("Run signal dropped, stopping");
                break;
            }
            TickOutcome::Inactive => break,
            TickOutcome::Dispatched(_) | TickOutcome::Empty => {}
        }
        thread::sleep(tick_interval);
    }

    let summary = session.stop()?;
    info!(
        "Session finished: {} frame(s), {} grab failure(s), final status {} in {:.1}s",
        summary.frames,
        summary.grab_failures,
        summary.final_status.state,
        summary.duration.as_secs_f64()
    );
    server.stop();
    Ok(())
}

fn install_ctrlc_handler() -> Arc<AtomicBool> {
    static CTRL_HANDLER: Once = Once::new();
    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_shutdown = shutdown.clone();
    CTRL_HANDLER.call_once(move || {
        if let Err(err) = ctrlc::set_handler(move || {
            handler_shutdown.store(true, Ordering::SeqCst);
        }) {
            warn!("Failed to install Ctrl+C handler: {err}");
        }
    });
    shutdown
}

fn open_sensor(args: &RecordArgs) -> Result<Box<dyn SensorDriver>> {
    if let Some(dir) = args.replay.as_ref() {
        info!("Replaying frames from {}", dir.display());
        return Ok(Box::new(ReplaySensor::new(dir)));
    }
    let Some(uri) = args.source.as_deref() else {
        bail!("either --replay <DIR> or --source <URI> is required");
    };
    live_sensor(uri, args.capture_size())
}

#[cfg(feature = "with-opencv")]
fn live_sensor(uri: &str, size: Option<(i32, i32)>) -> Result<Box<dyn SensorDriver>> {
    Ok(Box::new(video_ingest::OpenCvSensor::new(uri, size)))
}

#[cfg(not(feature = "with-opencv"))]
fn live_sensor(uri: &str, _size: Option<(i32, i32)>) -> Result<Box<dyn SensorDriver>> {
    bail!("cannot open {uri}: depmon was built without the with-opencv feature")
}

fn load_model(args: &RecordArgs, plan: &SessionPlan) -> Result<Option<Box<dyn SegmentationModel>>> {
    if !plan.apply_segmentation {
        info!("Segmentation disabled; frames are recorded without measurements");
        return Ok(None);
    }
    let Some(path) = args.model.as_ref() else {
        warn!("No --model given; frames are recorded without measurements");
        return Ok(None);
    };
    torch_model(path, args.use_cpu, plan).map(Some)
}

#[cfg(feature = "with-tch")]
fn torch_model(
    path: &std::path::Path,
    use_cpu: bool,
    plan: &SessionPlan,
) -> Result<Box<dyn SegmentationModel>> {
    use ml_core::{
        segmenter::TorchSegmenter,
        tch::{Cuda, Device},
    };

    let device = if use_cpu {
        Device::Cpu
    } else {
        crate::runtime::load_torch_cuda_runtime();
        if Cuda::is_available() {
            Device::Cuda(0)
        } else {
            warn!("CUDA unavailable, running segmentation on CPU");
            Device::Cpu
        }
    };
    let segmenter = TorchSegmenter::new(path, device, plan.model_input)
        .with_context(|| format!("failed to load segmentation model {}", path.display()))?
        .with_confidence_threshold(plan.confidence);
    info!("Loaded segmentation model {} on {device:?}", path.display());
    Ok(Box::new(segmenter))
}

#[cfg(not(feature = "with-tch"))]
fn torch_model(
    path: &std::path::Path,
    _use_cpu: bool,
    _plan: &SessionPlan,
) -> Result<Box<dyn SegmentationModel>> {
    bail!(
        "cannot load {}: depmon was built without the with-tch feature",
        path.display()
    )
}
