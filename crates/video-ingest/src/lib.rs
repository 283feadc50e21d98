//! Image sensor boundary used by the acquisition worker.
//!
//! A sensor is opened once per recording session, then driven one frame at a
//! time: the caller applies an exposure, grabs with a bounded timeout, and
//! inspects [`DeviceInfo`] when a grab fails.

mod exposure;
mod replay;
mod types;

#[cfg(feature = "with-opencv")]
mod camera;

pub use exposure::ExposureScale;
pub use replay::ReplaySensor;
pub use types::{CaptureError, ConnectionState, DeviceInfo, Frame, FrameFormat, GrabOutcome};

#[cfg(feature = "with-opencv")]
pub use camera::OpenCvSensor;

/// Driver contract for an industrial image sensor.
///
/// Implementations are moved onto the acquisition thread, so they only need
/// to be `Send`.
pub trait SensorDriver: Send {
    /// Connect to the device. Called once before the acquisition loop starts.
    fn open(&mut self) -> Result<(), CaptureError>;

    /// Apply an integration time in microseconds to subsequent grabs.
    fn set_exposure(&mut self, micros: u32) -> Result<(), CaptureError>;

    /// Grab one frame, waiting at most `timeout_ms` milliseconds.
    fn grab_frame(&mut self, timeout_ms: u64) -> Result<GrabOutcome, CaptureError>;

    /// Current model name and connection state.
    fn device_info(&self) -> DeviceInfo;
}

impl<T: SensorDriver + ?Sized> SensorDriver for Box<T> {
    fn open(&mut self) -> Result<(), CaptureError> {
        (**self).open()
    }

    fn set_exposure(&mut self, micros: u32) -> Result<(), CaptureError> {
        (**self).set_exposure(micros)
    }

    fn grab_frame(&mut self, timeout_ms: u64) -> Result<GrabOutcome, CaptureError> {
        (**self).grab_frame(timeout_ms)
    }

    fn device_info(&self) -> DeviceInfo {
        (**self).device_info()
    }
}
