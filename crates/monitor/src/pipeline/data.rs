use std::sync::Arc;

use chrono::{DateTime, Utc};
use image::RgbImage;

use crate::{
    aggregate::EmittedSample,
    measurement::MeasurementSet,
    sink::{ImageRole, MeasurementRow},
};

/// Everything produced for one successful grab. Immutable once handed off.
#[derive(Debug)]
pub struct FrameRecord {
    pub frame_index: u64,
    pub timestamp: DateTime<Utc>,
    pub exposure_us: u32,
    pub loop_count: u64,
    pub raw: RgbImage,
    pub annotated: Option<RgbImage>,
    pub segmented: Option<RgbImage>,
    pub measurements: MeasurementSet,
    /// Aggregate points appended to metric series on this frame.
    pub emitted: Vec<EmittedSample>,
}

impl FrameRecord {
    pub fn image(&self, role: ImageRole) -> Option<&RgbImage> {
        match role {
            ImageRole::Raw => Some(&self.raw),
            ImageRole::Annotated => self.annotated.as_ref(),
            ImageRole::Segmented => self.segmented.as_ref(),
        }
    }
}

pub type SharedRecord = Arc<FrameRecord>;

/// Destination-specific part of a [`PipelineMessage`].
#[derive(Debug)]
pub enum Payload {
    /// Roles written as still images and roles appended to their video.
    Images {
        stills: Vec<ImageRole>,
        video: Vec<ImageRole>,
    },
    Row(MeasurementRow),
    Preview { roles: Vec<ImageRole>, width: u32 },
}

/// Unit placed on a consumer queue: a shared view of the record plus its payload.
#[derive(Debug)]
pub struct PipelineMessage {
    pub record: SharedRecord,
    pub payload: Payload,
}
