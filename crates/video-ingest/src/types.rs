use anyhow::{Error, anyhow};
use image::RgbImage;
use thiserror::Error;

/// Raw frame grabbed from a sensor.
pub struct Frame {
    pub data: Vec<u8>,
    pub width: i32,
    pub height: i32,
    pub timestamp_ms: i64,
    pub format: FrameFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFormat {
    Mono8,
    Bgr8,
    Rgb8,
}

impl FrameFormat {
    pub fn channels(self) -> usize {
        match self {
            FrameFormat::Mono8 => 1,
            FrameFormat::Bgr8 | FrameFormat::Rgb8 => 3,
        }
    }
}

impl Frame {
    /// Convert the sensor buffer into an RGB image.
    pub fn to_rgb_image(&self) -> Result<RgbImage, CaptureError> {
        if self.width <= 0 || self.height <= 0 {
            return Err(CaptureError::InvalidGrab(format!(
                "frame has invalid size {}x{}",
                self.width, self.height
            )));
        }
        let (width, height) = (self.width as u32, self.height as u32);
        let pixels = (width as usize) * (height as usize);
        let expected = pixels * self.format.channels();
        if self.data.len() < expected {
            return Err(CaptureError::InvalidGrab(format!(
                "frame buffer holds {} bytes, expected {expected}",
                self.data.len()
            )));
        }

        let rgb = match self.format {
            FrameFormat::Rgb8 => self.data[..expected].to_vec(),
            FrameFormat::Bgr8 => self.data[..expected]
                .chunks_exact(3)
                .flat_map(|px| [px[2], px[1], px[0]])
                .collect(),
            FrameFormat::Mono8 => self.data[..expected]
                .iter()
                .flat_map(|&v| [v, v, v])
                .collect(),
        };
        RgbImage::from_raw(width, height, rgb)
            .ok_or_else(|| CaptureError::Other(anyhow!("failed to wrap {width}x{height} frame")))
    }
}

/// Result of a grab that did not fail outright.
pub enum GrabOutcome {
    Frame(Frame),
    /// No frame arrived within the timeout.
    Timeout,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub model: String,
    pub connection: ConnectionState,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open video source {uri:?}")]
    Open { uri: String },
    #[error("invalid grab: {0}")]
    InvalidGrab(String),
    #[error("sensor disconnected")]
    Disconnected,
    #[error(transparent)]
    Other(#[from] Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(format: FrameFormat, data: Vec<u8>, width: i32, height: i32) -> Frame {
        Frame {
            data,
            width,
            height,
            timestamp_ms: 0,
            format,
        }
    }

    #[test]
    fn bgr_frames_swap_channels() {
        let image = frame(FrameFormat::Bgr8, vec![1, 2, 3, 4, 5, 6], 2, 1)
            .to_rgb_image()
            .unwrap();
        assert_eq!(image.get_pixel(0, 0).0, [3, 2, 1]);
        assert_eq!(image.get_pixel(1, 0).0, [6, 5, 4]);
    }

    #[test]
    fn mono_frames_expand_to_grey() {
        let image = frame(FrameFormat::Mono8, vec![7, 9], 1, 2)
            .to_rgb_image()
            .unwrap();
        assert_eq!(image.get_pixel(0, 1).0, [9, 9, 9]);
    }

    #[test]
    fn short_buffers_are_invalid_grabs() {
        let err = frame(FrameFormat::Rgb8, vec![0; 5], 2, 1)
            .to_rgb_image()
            .unwrap_err();
        assert!(matches!(err, CaptureError::InvalidGrab(_)));
    }
}
