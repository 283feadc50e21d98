use std::{convert::TryFrom, path::Path};

use anyhow::{Result, anyhow, bail};
use image::{RgbImage, imageops::FilterType};
use tch::{self, Device, IValue, Kind, Tensor};

use crate::{Mask, SegmentationModel, Segment};

/// Probability above which a mask pixel counts as foreground.
const MASK_THRESHOLD: f32 = 0.5;
const MAX_INSTANCES: usize = 128;

/// TorchScript-backed instance segmenter.
///
/// The scripted module takes a `[1, 3, H, W]` float tensor in `0..1` and
/// returns a tuple `(class_ids [N], scores [N], masks [N, H, W])` with masks
/// at the input resolution.
pub struct TorchSegmenter {
    module: tch::CModule,
    device: Device,
    input_size: (u32, u32),
    confidence_threshold: f32,
}

impl TorchSegmenter {
    /// Load a TorchScript module onto `device`.
    pub fn new<P: AsRef<Path>>(model_path: P, device: Device, input_size: (u32, u32)) -> Result<Self> {
        let module = tch::CModule::load_on_device(model_path, device)?;
        Ok(Self {
            module,
            device,
            input_size,
            confidence_threshold: 0.25,
        })
    }

    /// Override the confidence threshold used for filtering instances.
    pub fn with_confidence_threshold(mut self, confidence: f32) -> Self {
        self.confidence_threshold = confidence;
        self
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Resize and normalise an RGB image into the model's input tensor.
    fn image_to_tensor(&self, image: &RgbImage) -> Tensor {
        let (in_w, in_h) = self.input_size;
        let resized;
        let source = if image.dimensions() != (in_w, in_h) {
            resized = image::imageops::resize(image, in_w, in_h, FilterType::Triangle);
            &resized
        } else {
            image
        };

        Tensor::from_slice(source.as_raw())
            .to_device(self.device)
            .to_kind(Kind::Float)
            .view([1, in_h as i64, in_w as i64, 3])
            .permute([0, 3, 1, 2])
            / 255.0
    }
}

impl SegmentationModel for TorchSegmenter {
    fn infer(&mut self, image: &RgbImage) -> Result<Vec<Segment>> {
        let input = self.image_to_tensor(image);
        let output = self.module.forward_is(&[IValue::Tensor(input)])?;
        let IValue::Tuple(items) = output else {
            bail!("segmenter output must be a (class_ids, scores, masks) tuple");
        };
        let [class_ids, scores, masks] = <[IValue; 3]>::try_from(items)
            .map_err(|items| anyhow!("segmenter returned {} outputs, expected 3", items.len()))?;
        let (IValue::Tensor(class_ids), IValue::Tensor(scores), IValue::Tensor(masks)) =
            (class_ids, scores, masks)
        else {
            bail!("segmenter outputs must all be tensors");
        };

        let class_ids: Vec<i64> =
            Vec::<i64>::try_from(&class_ids.to_device(Device::Cpu).to_kind(Kind::Int64))?;
        let scores: Vec<f32> =
            Vec::<f32>::try_from(&scores.to_device(Device::Cpu).to_kind(Kind::Float))?;
        let masks = masks.to_device(Device::Cpu).to_kind(Kind::Float);
        let shape = masks.size();
        if shape.len() != 3 {
            bail!("unexpected mask tensor shape: {shape:?}");
        }
        let (count, mask_h, mask_w) = (shape[0] as usize, shape[1] as u32, shape[2] as u32);
        if class_ids.len() != count || scores.len() != count {
            bail!(
                "segmenter returned {} class id(s), {} score(s) and {} mask(s)",
                class_ids.len(),
                scores.len(),
                count
            );
        }

        let (frame_w, frame_h) = image.dimensions();
        let mut segments = Vec::new();
        for idx in 0..count {
            let score = scores[idx];
            if score < self.confidence_threshold {
                continue;
            }
            let probabilities = Vec::<f32>::try_from(&masks.get(idx as i64).flatten(0, -1))?;
            let Some(mask) = Mask::from_scores(mask_w, mask_h, &probabilities, MASK_THRESHOLD)
            else {
                continue;
            };
            let mask = mask.resize_nearest(frame_w, frame_h);
            let bbox = mask
                .bounds()
                .map(|b| [b.x_min as f32, b.y_min as f32, b.x_max as f32, b.y_max as f32])
                .unwrap_or_default();
            segments.push(Segment {
                class_id: class_ids[idx],
                score,
                mask,
                bbox,
            });
            if segments.len() >= MAX_INSTANCES {
                break;
            }
        }

        Ok(segments)
    }
}
