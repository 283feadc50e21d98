//! Measurement engine: one segmentation pass per frame, reduced to the largest
//! instance of each class.

use std::collections::BTreeMap;

use anyhow::Result;
use image::RgbImage;
use ml_core::{SegmentationModel, Segment};
use serde::{Serialize, Serializer, ser::SerializeMap};
use tracing::trace;

use crate::model::{ClassKind, Metric};

/// Bounding box and area of the kept instance of one class, in frame pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ClassMeasurement {
    pub x_min: u32,
    pub x_max: u32,
    pub y_min: u32,
    pub y_max: u32,
    pub area: u64,
}

impl ClassMeasurement {
    pub fn x_center(&self) -> f64 {
        (self.x_min as f64 + self.x_max as f64) / 2.0
    }

    pub fn y_center(&self) -> f64 {
        (self.y_min as f64 + self.y_max as f64) / 2.0
    }

    /// Per-frame raw value that feeds `metric`'s window.
    pub fn sample(&self, metric: Metric) -> f64 {
        match metric {
            Metric::XMinimum => self.x_min as f64,
            Metric::XMaximum => self.x_max as f64,
            Metric::YMinimum => self.y_min as f64,
            Metric::YMaximum => self.y_max as f64,
            Metric::XAverage | Metric::XAverageStdDev => self.x_center(),
            Metric::YAverage | Metric::YAverageStdDev => self.y_center(),
            Metric::ClassArea | Metric::ClassAreaStdDev => self.area as f64,
        }
    }
}

/// Per-class measurements of one frame. `None` means the class was not detected.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeasurementSet {
    classes: [Option<ClassMeasurement>; ClassKind::COUNT],
}

impl MeasurementSet {
    pub fn get(&self, class: ClassKind) -> Option<&ClassMeasurement> {
        self.classes[class.index()].as_ref()
    }

    pub fn set(&mut self, class: ClassKind, value: Option<ClassMeasurement>) {
        self.classes[class.index()] = value;
    }

    /// Raw value for `metric`, or `None` when the class was absent from the frame.
    pub fn sample(&self, class: ClassKind, metric: Metric) -> Option<f64> {
        self.get(class).map(|m| m.sample(metric))
    }

    pub fn detected(&self) -> usize {
        self.classes.iter().filter(|c| c.is_some()).count()
    }
}

impl Serialize for MeasurementSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(ClassKind::COUNT))?;
        for class in ClassKind::ALL {
            map.serialize_entry(class.label(), &self.get(class))?;
        }
        map.end()
    }
}

/// Measurement result plus the instances that produced it, kept for rendering.
#[derive(Clone, Debug, Default)]
pub struct Measured {
    pub set: MeasurementSet,
    pub instances: [Option<Segment>; ClassKind::COUNT],
}

/// Runs the segmentation model and derives the per-class measurements.
pub struct MeasurementEngine {
    model: Option<Box<dyn SegmentationModel>>,
    class_ids: BTreeMap<i64, ClassKind>,
}

impl MeasurementEngine {
    /// `class_ids` maps each class of interest to the model's class id.
    pub fn new(model: Box<dyn SegmentationModel>, class_ids: &BTreeMap<ClassKind, i64>) -> Self {
        Self {
            model: Some(model),
            class_ids: class_ids.iter().map(|(class, id)| (*id, *class)).collect(),
        }
    }

    /// Engine that never runs inference; every frame measures as all-null.
    pub fn disabled() -> Self {
        Self {
            model: None,
            class_ids: BTreeMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.model.is_some()
    }

    /// Segment `image` once and reduce the detections per class.
    pub fn measure(&mut self, image: &RgbImage) -> Result<Measured> {
        let Some(model) = self.model.as_mut() else {
            return Ok(Measured::default());
        };
        let segments = model.infer(image)?;
        trace!("segmentation returned {} instance(s)", segments.len());
        let class_ids = &self.class_ids;
        Ok(reduce_segments(segments, |id| class_ids.get(&id).copied()))
    }
}

/// Keep the largest-area instance per class; ties keep the first encountered.
/// Instances of unmapped classes and empty masks are discarded.
pub fn reduce_segments(
    segments: Vec<Segment>,
    class_of: impl Fn(i64) -> Option<ClassKind>,
) -> Measured {
    let mut best: [Option<(u64, Segment)>; ClassKind::COUNT] = Default::default();
    for segment in segments {
        let Some(class) = class_of(segment.class_id) else {
            continue;
        };
        let area = segment.mask.area();
        if area == 0 {
            continue;
        }
        let slot = &mut best[class.index()];
        if slot.as_ref().is_none_or(|(kept, _)| area > *kept) {
            *slot = Some((area, segment));
        }
    }

    let mut measured = Measured::default();
    for class in ClassKind::ALL {
        if let Some((area, segment)) = best[class.index()].take() {
            let measurement = segment.mask.bounds().map(|b| ClassMeasurement {
                x_min: b.x_min,
                x_max: b.x_max,
                y_min: b.y_min,
                y_max: b.y_max,
                area,
            });
            measured.set.set(class, measurement);
            measured.instances[class.index()] = Some(segment);
        }
    }
    measured
}
