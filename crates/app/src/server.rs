//! Actix Web preview board: the presentation surface of a recording session.
//!
//! The preview consumer pushes images, status and chart artists into a
//! [`PreviewBoard`]; the server thread only ever reads snapshots of it. A
//! slow browser therefore never holds up the pipeline.

use std::{
    collections::BTreeMap,
    io::Cursor,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use actix_web::{
    App, HttpResponse, HttpServer,
    http::header,
    web::{self, Bytes},
};
use anyhow::{Context, Result};
use async_stream::stream;
use image::{RgbImage, codecs::jpeg::JpegEncoder};
use monitor::{
    ChartArtists, ClassKind, ImageRole, Metric, PresentationSurface, Status, StatusState,
    TriggerSignal, pipeline::telemetry,
};
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

const JPEG_QUALITY: u8 = 80;

#[derive(Clone)]
struct PreviewFrame {
    sequence: u64,
    jpeg: Bytes,
}

/// Latest presentation state, written by the preview consumer and the
/// dispatcher tick.
pub(crate) struct PreviewBoard {
    previews: Mutex<BTreeMap<ImageRole, PreviewFrame>>,
    status: Mutex<Status>,
    connected: AtomicBool,
    charts: Mutex<BTreeMap<(ClassKind, Metric), ChartArtists>>,
    sequence: AtomicU64,
    trigger: Option<TriggerSignal>,
}

#[derive(Serialize)]
struct StatusResponse {
    #[serde(flatten)]
    status: Status,
    sensor_connected: bool,
    /// `None` when the session runs under manual permission.
    trigger: Option<bool>,
}

impl PreviewBoard {
    pub(crate) fn new(trigger: Option<TriggerSignal>) -> Self {
        Self {
            previews: Mutex::new(BTreeMap::new()),
            status: Mutex::new(Status::new(StatusState::Idle)),
            connected: AtomicBool::new(false),
            charts: Mutex::new(BTreeMap::new()),
            sequence: AtomicU64::new(0),
            trigger,
        }
    }

    fn preview(&self, role: ImageRole) -> Option<PreviewFrame> {
        self.previews
            .lock()
            .ok()
            .and_then(|previews| previews.get(&role).cloned())
    }

    fn status_response(&self) -> StatusResponse {
        let status = match self.status.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        StatusResponse {
            status,
            sensor_connected: self.connected.load(Ordering::SeqCst),
            trigger: self.trigger.as_ref().map(TriggerSignal::is_set),
        }
    }

    fn charts(&self) -> Vec<ChartArtists> {
        self.charts
            .lock()
            .map(|charts| charts.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl PresentationSurface for PreviewBoard {
    fn update_preview(&self, role: ImageRole, image: &RgbImage) {
        let jpeg = match encode_jpeg(image) {
            Ok(jpeg) => jpeg,
            Err(err) => {
                warn!("Failed to encode {role} preview: {err:#}");
                return;
            }
        };
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut previews) = self.previews.lock() {
            previews.insert(role, PreviewFrame { sequence, jpeg });
        }
    }

    fn update_status(&self, status: &Status) {
        info!("Status: {}", status.state);
        match self.status.lock() {
            Ok(mut guard) => *guard = status.clone(),
            Err(poisoned) => *poisoned.into_inner() = status.clone(),
        }
    }

    fn update_chart(&self, artists: &ChartArtists) {
        if let Ok(mut charts) = self.charts.lock() {
            charts.insert((artists.class, artists.metric), artists.clone());
        }
    }

    fn update_connection(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

fn encode_jpeg(image: &RgbImage) -> Result<Bytes> {
    let mut buffer = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY)
        .encode_image(image)
        .context("JPEG encode failed")?;
    Ok(Bytes::from(buffer.into_inner()))
}

/// Handle for the preview server thread.
pub(crate) struct PreviewServer {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl PreviewServer {
    /// Signal the server to stop and block until the thread exits.
    pub(crate) fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Spawn the preview server thread and return a handle that can stop it.
pub(crate) fn spawn_preview_server(board: Arc<PreviewBoard>, bind: &str) -> Result<PreviewServer> {
    let bind = bind.to_string();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = telemetry::spawn_thread("preview-server", move || {
        let data = web::Data::from(board);
        let result = actix_web::rt::System::new().block_on(async move {
            let server = HttpServer::new(move || {
                App::new()
                    .app_data(data.clone())
                    .route("/", web::get().to(index_route))
                    .route("/preview/{role}.jpg", web::get().to(preview_handler))
                    .route("/stream/{role}.mjpg", web::get().to(stream_handler))
                    .route("/status", web::get().to(status_handler))
                    .route("/charts", web::get().to(charts_handler))
                    .route("/metrics", web::get().to(metrics_handler))
                    .route("/trigger/{state}", web::post().to(trigger_handler))
            })
            .workers(2)
            .bind(bind.as_str())?
            .run();
            info!("Preview board listening on http://{bind}");

            let srv_handle = server.handle();
            actix_web::rt::spawn(async move {
                let _ = shutdown_rx.await;
                srv_handle.stop(true).await;
            });

            server.await
        });
        if let Err(err) = result {
            error!("HTTP server error: {err}");
        }
    })
    .context("Failed to spawn preview server thread")?;

    Ok(PreviewServer {
        shutdown: Some(shutdown_tx),
        handle: Some(handle),
    })
}

async fn index_route() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(crate::html::dashboard::DASHBOARD_HTML)
}

/// Return the latest preview of one image role.
async fn preview_handler(path: web::Path<String>, board: web::Data<PreviewBoard>) -> HttpResponse {
    let Some(role) = ImageRole::parse(&path) else {
        return HttpResponse::NotFound().body(format!("unknown image role {:?}", path.as_str()));
    };
    match board.preview(role) {
        Some(frame) => HttpResponse::Ok()
            .append_header(("X-Sequence", frame.sequence.to_string()))
            .append_header(("Cache-Control", "no-cache"))
            .content_type("image/jpeg")
            .body(frame.jpeg),
        None => HttpResponse::NoContent().finish(),
    }
}

/// Stream one preview role as multipart MJPEG.
async fn stream_handler(path: web::Path<String>, board: web::Data<PreviewBoard>) -> HttpResponse {
    let Some(role) = ImageRole::parse(&path) else {
        return HttpResponse::NotFound().body(format!("unknown image role {:?}", path.as_str()));
    };
    let board = board.clone();
    let stream = stream! {
        let mut interval = actix_web::rt::time::interval(Duration::from_millis(100));
        let mut last_sent = 0;
        loop {
            interval.tick().await;
            let Some(frame) = board.preview(role) else {
                continue;
            };
            if frame.sequence == last_sent {
                continue;
            }
            last_sent = frame.sequence;
            let mut payload = Vec::with_capacity(frame.jpeg.len() + 64);
            payload.extend_from_slice(b"--frame\r\n");
            payload.extend_from_slice(format!("X-Sequence: {}\r\n", frame.sequence).as_bytes());
            payload.extend_from_slice(b"Content-Type: image/jpeg\r\n\r\n");
            payload.extend_from_slice(&frame.jpeg);
            payload.extend_from_slice(b"\r\n");
            yield Ok::<Bytes, actix_web::Error>(Bytes::from(payload));
        }
    };

    HttpResponse::Ok()
        .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .append_header(("Cache-Control", "no-cache"))
        .append_header(("Content-Type", "multipart/x-mixed-replace; boundary=frame"))
        .streaming(stream)
}

async fn status_handler(board: web::Data<PreviewBoard>) -> HttpResponse {
    HttpResponse::Ok().json(board.status_response())
}

async fn charts_handler(board: web::Data<PreviewBoard>) -> HttpResponse {
    HttpResponse::Ok().json(board.charts())
}

async fn metrics_handler() -> HttpResponse {
    match telemetry::prometheus_handle() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::ServiceUnavailable().body("metrics recorder not installed"),
    }
}

/// `POST /trigger/on` and `POST /trigger/off` drive the automatic run signal.
async fn trigger_handler(path: web::Path<String>, board: web::Data<PreviewBoard>) -> HttpResponse {
    let run = match path.as_str() {
        "on" => true,
        "off" => false,
        other => return HttpResponse::NotFound().body(format!("unknown trigger state {other:?}")),
    };
    let Some(trigger) = board.trigger.as_ref() else {
        return HttpResponse::Conflict().body("session runs under manual permission");
    };
    trigger.set(run);
    info!("Run signal set {} over HTTP", if run { "on" } else { "off" });
    HttpResponse::Ok().json(board.status_response())
}
