//! OpenCV-backed sensor driver.

use chrono::Utc;
use opencv::{
    core::{MatTraitConst, MatTraitConstManual},
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTrait, VideoCaptureTraitConst},
};
use tracing::{debug, warn};

use crate::{
    SensorDriver,
    exposure::ExposureScale,
    types::{CaptureError, ConnectionState, DeviceInfo, Frame, FrameFormat, GrabOutcome},
};

/// UVC drivers select manual exposure with this value of `CAP_PROP_AUTO_EXPOSURE`.
const MANUAL_EXPOSURE_MODE: f64 = 1.0;

/// Sensor reached through an OpenCV `VideoCapture` (V4L device index, path or URI).
pub struct OpenCvSensor {
    uri: String,
    target_size: Option<(i32, i32)>,
    cap: Option<VideoCapture>,
    exposure_scale: ExposureScale,
    read_timeout_ms: Option<u64>,
    frame: Mat,
}

impl OpenCvSensor {
    pub fn new(uri: &str, target_size: Option<(i32, i32)>) -> Self {
        Self {
            uri: uri.to_string(),
            target_size,
            cap: None,
            exposure_scale: ExposureScale::Micros,
            read_timeout_ms: None,
            frame: Mat::default(),
        }
    }

    fn capture(&mut self) -> Result<&mut VideoCapture, CaptureError> {
        self.cap.as_mut().ok_or(CaptureError::Disconnected)
    }
}

impl SensorDriver for OpenCvSensor {
    fn open(&mut self) -> Result<(), CaptureError> {
        let mut cap = open_video_capture(&self.uri)?;
        if let Some(size) = self.target_size {
            configure_camera(&mut cap, size);
        }
        let _ = cap.set(videoio::CAP_PROP_AUTO_EXPOSURE, MANUAL_EXPOSURE_MODE);
        let backend = cap.get_backend_name().unwrap_or_default();
        self.exposure_scale = ExposureScale::for_backend(&backend);
        debug!(
            "Opened {} on backend {backend:?}, exposure scale {:?}",
            self.uri, self.exposure_scale
        );
        self.cap = Some(cap);
        Ok(())
    }

    fn set_exposure(&mut self, micros: u32) -> Result<(), CaptureError> {
        let value = self.exposure_scale.property_value(micros);
        let cap = self.capture()?;
        match cap.set(videoio::CAP_PROP_EXPOSURE, value) {
            Ok(true) => Ok(()),
            Ok(false) => Err(CaptureError::InvalidGrab(format!(
                "device rejected exposure {micros}us"
            ))),
            Err(err) => Err(CaptureError::Other(err.into())),
        }
    }

    fn grab_frame(&mut self, timeout_ms: u64) -> Result<GrabOutcome, CaptureError> {
        if self.read_timeout_ms != Some(timeout_ms) {
            let cap = self.capture()?;
            let _ = cap.set(videoio::CAP_PROP_READ_TIMEOUT_MSEC, timeout_ms as f64);
            self.read_timeout_ms = Some(timeout_ms);
        }

        let mut frame = std::mem::take(&mut self.frame);
        let grabbed = {
            let cap = self.capture()?;
            cap.read(&mut frame).map_err(|e| CaptureError::Other(e.into()))?
        };
        if !grabbed {
            self.frame = frame;
            return Ok(GrabOutcome::Timeout);
        }

        let size = frame.size().map_err(|e| CaptureError::Other(e.into()))?;
        if size.width <= 0 || size.height <= 0 {
            self.frame = frame;
            return Err(CaptureError::InvalidGrab("empty frame".into()));
        }

        let format = match frame.channels() {
            1 => FrameFormat::Mono8,
            3 => FrameFormat::Bgr8,
            other => {
                self.frame = frame;
                return Err(CaptureError::InvalidGrab(format!(
                    "unsupported channel count {other}"
                )));
            }
        };

        let data = frame
            .data_bytes()
            .map_err(|e| CaptureError::Other(e.into()))?
            .to_vec();
        self.frame = frame;

        Ok(GrabOutcome::Frame(Frame {
            data,
            width: size.width,
            height: size.height,
            timestamp_ms: Utc::now().timestamp_millis(),
            format,
        }))
    }

    fn device_info(&self) -> DeviceInfo {
        let connected = self
            .cap
            .as_ref()
            .and_then(|cap| cap.is_opened().ok())
            .unwrap_or(false);
        DeviceInfo {
            model: format!("opencv:{}", self.uri),
            connection: if connected {
                ConnectionState::Connected
            } else {
                ConnectionState::Disconnected
            },
        }
    }
}

/// Parse a `/dev/videoX` style URI and return the zero-based index if present.
pub(crate) fn parse_device_index(uri: &str) -> Option<i32> {
    if let Ok(index) = uri.parse::<i32>() {
        return Some(index);
    }
    if let Some(stripped) = uri.strip_prefix("/dev/video") {
        if stripped.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(index) = stripped.parse::<i32>() {
                return Some(index);
            }
        }
    }
    None
}

/// Attempt to open a camera input either by index or URI.
fn open_video_capture(uri: &str) -> Result<VideoCapture, CaptureError> {
    if let Some(index) = parse_device_index(uri) {
        for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
            match VideoCapture::new(index, backend) {
                Ok(cap) => {
                    if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                        return Ok(cap);
                    }
                }
                Err(err) => {
                    warn!("failed to open device #{index} with backend {backend}: {err}");
                }
            }
        }
    }

    for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
        match VideoCapture::from_file(uri, backend) {
            Ok(cap) => {
                if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                    return Ok(cap);
                }
            }
            Err(err) => {
                warn!("failed to open {uri} with backend {backend}: {err}");
            }
        }
    }

    Err(CaptureError::Open {
        uri: uri.to_string(),
    })
}

/// Request the capture resolution; the device may ignore it.
fn configure_camera(cap: &mut VideoCapture, target_size: (i32, i32)) {
    let _ = cap.set(videoio::CAP_PROP_FRAME_WIDTH, target_size.0 as f64);
    let _ = cap.set(videoio::CAP_PROP_FRAME_HEIGHT, target_size.1 as f64);
}
