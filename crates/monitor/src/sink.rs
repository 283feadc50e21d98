//! Boundaries the dispatcher fans frames out to.

use std::{collections::BTreeMap, fmt};

use anyhow::Result;
use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::{
    chart::ChartArtists,
    measurement::MeasurementSet,
    status::Status,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageRole {
    Raw,
    Annotated,
    Segmented,
}

impl ImageRole {
    pub const ALL: [ImageRole; 3] = [ImageRole::Raw, ImageRole::Annotated, ImageRole::Segmented];

    pub fn as_str(self) -> &'static str {
        match self {
            ImageRole::Raw => "raw",
            ImageRole::Annotated => "annotated",
            ImageRole::Segmented => "segmented",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|role| role.as_str() == value)
    }
}

impl fmt::Display for ImageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One measurement log row.
#[derive(Clone, Debug, Serialize)]
pub struct MeasurementRow {
    pub frame_index: u64,
    pub timestamp: DateTime<Utc>,
    pub exposure_us: u32,
    pub loop_count: u64,
    pub material: Option<String>,
    pub context: BTreeMap<String, String>,
    pub measurements: MeasurementSet,
}

/// Durable storage for images and measurement rows. Failures are logged by
/// the caller and never stop the session.
pub trait PersistenceSink: Send + Sync {
    fn write_image(&self, frame_index: u64, role: ImageRole, image: &RgbImage) -> Result<()>;

    fn write_measurement_row(&self, row: &MeasurementRow) -> Result<()>;

    /// Append one frame to the video of `role`. Frames arrive in index order.
    fn write_video_frame(&self, _frame_index: u64, _role: ImageRole, _image: &RgbImage) -> Result<()> {
        Ok(())
    }

    /// Keep the final state of one chart once recording has stopped.
    fn write_chart(&self, _artists: &ChartArtists) -> Result<()> {
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Passive display target; owns no logic.
pub trait PresentationSurface: Send + Sync {
    fn update_preview(&self, role: ImageRole, image: &RgbImage);

    fn update_status(&self, status: &Status);

    fn update_chart(&self, artists: &ChartArtists);

    fn update_connection(&self, _connected: bool) {}
}

/// Surface that discards everything, used for headless runs.
pub struct NullSurface;

impl PresentationSurface for NullSurface {
    fn update_preview(&self, _role: ImageRole, _image: &RgbImage) {}

    fn update_status(&self, _status: &Status) {}

    fn update_chart(&self, _artists: &ChartArtists) {}
}
