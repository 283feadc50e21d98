//! Filesystem persistence: PNG images per role, Motion-JPEG video per role,
//! a JSON-lines measurement log and the final charts as JSON.

use std::{
    collections::{BTreeMap, btree_map::Entry},
    fs::{self, File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use image::{RgbImage, codecs::jpeg::JpegEncoder};
use tracing::debug;

use crate::{
    chart::ChartArtists,
    sink::{ImageRole, MeasurementRow, PersistenceSink},
};

pub const MEASUREMENT_LOG: &str = "measurements.jsonl";
const VIDEO_JPEG_QUALITY: u8 = 90;

/// Writes, under `<root>/<yyyymmdd_HHMMSS>/`:
/// `<role>/frame_000001.png`, `video/<role>.mjpeg` (concatenated JPEG
/// frames), `charts/<class>_<metric>.json` and `measurements.jsonl`.
pub struct FsPersistenceSink {
    session_dir: PathBuf,
    rows: Mutex<BufWriter<File>>,
    videos: Mutex<BTreeMap<ImageRole, BufWriter<File>>>,
}

impl FsPersistenceSink {
    pub fn create(save_location: &Path, started: DateTime<Utc>) -> Result<Self> {
        let session_dir = save_location.join(started.format("%Y%m%d_%H%M%S").to_string());
        fs::create_dir_all(&session_dir)
            .with_context(|| format!("failed to create {}", session_dir.display()))?;
        let log_path = session_dir.join(MEASUREMENT_LOG);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("failed to open {}", log_path.display()))?;
        debug!("persisting session to {}", session_dir.display());
        Ok(Self {
            session_dir,
            rows: Mutex::new(BufWriter::new(file)),
            videos: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    pub fn image_path(&self, role: ImageRole, frame_index: u64) -> PathBuf {
        self.session_dir
            .join(role.as_str())
            .join(format!("frame_{frame_index:06}.png"))
    }

    pub fn video_path(&self, role: ImageRole) -> PathBuf {
        self.session_dir
            .join("video")
            .join(format!("{}.mjpeg", role.as_str()))
    }

    pub fn chart_path(&self, artists: &ChartArtists) -> PathBuf {
        let name = format!("{}_{}", artists.class.label(), artists.metric.label())
            .to_ascii_lowercase()
            .replace(' ', "_");
        self.session_dir.join("charts").join(format!("{name}.json"))
    }
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }
    Ok(())
}

impl PersistenceSink for FsPersistenceSink {
    fn write_image(&self, frame_index: u64, role: ImageRole, image: &RgbImage) -> Result<()> {
        let path = self.image_path(role, frame_index);
        create_parent(&path)?;
        image
            .save(&path)
            .with_context(|| format!("failed to write {}", path.display()))
    }

    fn write_measurement_row(&self, row: &MeasurementRow) -> Result<()> {
        let mut writer = self
            .rows
            .lock()
            .map_err(|_| anyhow!("measurement log writer poisoned"))?;
        serde_json::to_writer(&mut *writer, row).context("failed to encode measurement row")?;
        writer.write_all(b"\n")?;
        writer.flush().context("failed to flush measurement log")?;
        Ok(())
    }

    fn write_video_frame(&self, frame_index: u64, role: ImageRole, image: &RgbImage) -> Result<()> {
        let mut videos = self
            .videos
            .lock()
            .map_err(|_| anyhow!("video writers poisoned"))?;
        let writer = match videos.entry(role) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let path = self.video_path(role);
                create_parent(&path)?;
                let file = File::create(&path)
                    .with_context(|| format!("failed to create {}", path.display()))?;
                debug!("recording {role} video to {}", path.display());
                entry.insert(BufWriter::new(file))
            }
        };
        JpegEncoder::new_with_quality(&mut *writer, VIDEO_JPEG_QUALITY)
            .encode_image(image)
            .with_context(|| format!("failed to encode {role} video frame #{frame_index}"))
    }

    fn write_chart(&self, artists: &ChartArtists) -> Result<()> {
        let path = self.chart_path(artists);
        create_parent(&path)?;
        let file =
            File::create(&path).with_context(|| format!("failed to create {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, artists).context("failed to encode chart")?;
        writer
            .flush()
            .with_context(|| format!("failed to write {}", path.display()))
    }

    fn flush(&self) -> Result<()> {
        {
            let mut videos = self
                .videos
                .lock()
                .map_err(|_| anyhow!("video writers poisoned"))?;
            for (role, writer) in videos.iter_mut() {
                writer
                    .flush()
                    .with_context(|| format!("failed to flush {role} video"))?;
            }
        }
        let mut writer = self
            .rows
            .lock()
            .map_err(|_| anyhow!("measurement log writer poisoned"))?;
        writer.flush().context("failed to flush measurement log")
    }
}
