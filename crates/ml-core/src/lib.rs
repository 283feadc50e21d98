//! Segmentation model boundary.
//!
//! The monitor only depends on [`SegmentationModel`]; the TorchScript backend
//! is compiled in with the `with-tch` feature.

mod mask;

#[cfg(feature = "with-tch")]
pub mod segmenter;

use anyhow::Result;
use image::RgbImage;

pub use mask::{Mask, PixelBounds};

#[cfg(feature = "with-tch")]
pub use tch;

/// One instance returned by the model. The mask is in input-image pixels.
#[derive(Debug, Clone)]
pub struct Segment {
    pub class_id: i64,
    pub score: f32,
    pub mask: Mask,
    /// Model-reported box `[x1, y1, x2, y2]`; measurements use the mask instead.
    pub bbox: [f32; 4],
}

/// Instance segmentation contract consumed by the measurement engine.
pub trait SegmentationModel: Send {
    fn infer(&mut self, image: &RgbImage) -> Result<Vec<Segment>>;
}

impl<T: SegmentationModel + ?Sized> SegmentationModel for Box<T> {
    fn infer(&mut self, image: &RgbImage) -> Result<Vec<Segment>> {
        (**self).infer(image)
    }
}
