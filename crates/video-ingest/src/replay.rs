//! Sensor that replays still images from a directory.

use std::{
    fs,
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use anyhow::Context;
use chrono::Utc;
use tracing::{debug, warn};

use crate::{
    SensorDriver,
    types::{CaptureError, ConnectionState, DeviceInfo, Frame, FrameFormat, GrabOutcome},
};

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "tif"];

/// Cycles through the image files of a directory in name order.
///
/// `frame_interval` simulates the sensor frame period; a grab whose timeout is
/// shorter than the interval reports [`GrabOutcome::Timeout`].
pub struct ReplaySensor {
    dir: PathBuf,
    files: Vec<PathBuf>,
    cursor: usize,
    frame_interval: Duration,
    exposure_us: Option<u32>,
    opened: bool,
}

impl ReplaySensor {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            files: Vec::new(),
            cursor: 0,
            frame_interval: Duration::from_millis(33),
            exposure_us: None,
            opened: false,
        }
    }

    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    /// Last exposure requested by the caller.
    pub fn exposure_us(&self) -> Option<u32> {
        self.exposure_us
    }

    fn load(&self, path: &Path) -> Result<Frame, CaptureError> {
        let image = image::open(path)
            .with_context(|| format!("failed to decode {}", path.display()))?
            .to_rgb8();
        let (width, height) = image.dimensions();
        Ok(Frame {
            data: image.into_raw(),
            width: width as i32,
            height: height as i32,
            timestamp_ms: Utc::now().timestamp_millis(),
            format: FrameFormat::Rgb8,
        })
    }
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>, CaptureError> {
    let entries = fs::read_dir(dir).map_err(|_| CaptureError::Open {
        uri: dir.display().to_string(),
    })?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        })
        .collect();
    files.sort();
    Ok(files)
}

impl SensorDriver for ReplaySensor {
    fn open(&mut self) -> Result<(), CaptureError> {
        let files = list_images(&self.dir)?;
        if files.is_empty() {
            return Err(CaptureError::Open {
                uri: self.dir.display().to_string(),
            });
        }
        debug!("Replaying {} image(s) from {}", files.len(), self.dir.display());
        self.files = files;
        self.cursor = 0;
        self.opened = true;
        Ok(())
    }

    fn set_exposure(&mut self, micros: u32) -> Result<(), CaptureError> {
        if !self.opened {
            return Err(CaptureError::Disconnected);
        }
        self.exposure_us = Some(micros);
        Ok(())
    }

    fn grab_frame(&mut self, timeout_ms: u64) -> Result<GrabOutcome, CaptureError> {
        if !self.opened {
            return Err(CaptureError::Disconnected);
        }
        let timeout = Duration::from_millis(timeout_ms);
        if timeout < self.frame_interval {
            thread::sleep(timeout);
            return Ok(GrabOutcome::Timeout);
        }
        thread::sleep(self.frame_interval);

        let path = &self.files[self.cursor % self.files.len()];
        self.cursor = (self.cursor + 1) % self.files.len();
        match self.load(path) {
            Ok(frame) => Ok(GrabOutcome::Frame(frame)),
            Err(err) => {
                warn!("Skipping unreadable replay image {}: {err}", path.display());
                Err(CaptureError::InvalidGrab(path.display().to_string()))
            }
        }
    }

    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            model: format!("replay:{}", self.dir.display()),
            connection: if self.opened {
                ConnectionState::Connected
            } else {
                ConnectionState::Disconnected
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};
    use tempfile::tempdir;

    use super::*;

    fn write_frames(dir: &Path, names: &[&str]) {
        for (value, name) in names.iter().enumerate() {
            RgbImage::from_pixel(4, 3, Rgb([value as u8 * 10, 0, 0]))
                .save(dir.join(name))
                .unwrap();
        }
    }

    #[test]
    fn frames_cycle_in_name_order() {
        let dir = tempdir().unwrap();
        write_frames(dir.path(), &["b.png", "a.png"]);
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut sensor = ReplaySensor::new(dir.path()).with_frame_interval(Duration::ZERO);
        sensor.open().unwrap();
        let mut reds = Vec::new();
        for _ in 0..3 {
            let GrabOutcome::Frame(frame) = sensor.grab_frame(100).unwrap() else {
                panic!("expected a frame");
            };
            reds.push(frame.to_rgb_image().unwrap().get_pixel(0, 0).0[0]);
        }
        // a.png was written second (red = 10), b.png first (red = 0).
        assert_eq!(reds, vec![10, 0, 10]);
    }

    #[test]
    fn short_timeouts_report_timeout() {
        let dir = tempdir().unwrap();
        write_frames(dir.path(), &["a.png"]);
        let mut sensor =
            ReplaySensor::new(dir.path()).with_frame_interval(Duration::from_millis(50));
        sensor.open().unwrap();
        assert!(matches!(sensor.grab_frame(1).unwrap(), GrabOutcome::Timeout));
    }

    #[test]
    fn empty_directories_fail_to_open() {
        let dir = tempdir().unwrap();
        let mut sensor = ReplaySensor::new(dir.path());
        assert!(matches!(sensor.open(), Err(CaptureError::Open { .. })));
        assert_eq!(sensor.device_info().connection, ConnectionState::Disconnected);
    }
}
