use std::{io, path::PathBuf};

use thiserror::Error;
use video_ingest::CaptureError;

use crate::model::{ClassKind, Metric};

/// Configuration rejected before a recording session starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed configuration {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("exposure step must be non-zero")]
    ZeroExposureStep,
    #[error("exposure step duration must be a positive number of seconds, got {0}")]
    InvalidStepDuration(f64),
    #[error("exposure sweep {start}..{end} contains no steps")]
    EmptyExposureSweep { start: u32, end: u32 },
    #[error("exposure value must be positive")]
    ZeroExposure,
    #[error("window size for {0} must be at least one frame")]
    ZeroWindow(Metric),
    #[error("value comparison is enabled but no material is selected")]
    NoMaterial,
    #[error("material {0:?} has no tolerance table")]
    UnknownMaterial(String),
    #[error("no tolerance entry for {class} / {metric} in material {material:?}")]
    MissingTolerance {
        material: String,
        class: ClassKind,
        metric: Metric,
    },
    #[error("tolerance for {class} / {metric} must be non-negative")]
    NegativeTolerance { class: ClassKind, metric: Metric },
    #[error("{0} must be positive")]
    NonPositive(&'static str),
    #[error("model class id {id} is mapped to both {first} and {second}")]
    DuplicateClassId {
        id: i64,
        first: ClassKind,
        second: ClassKind,
    },
}

/// Failure to start or drive a recording session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("session is {0}, expected {1}")]
    InvalidState(&'static str, &'static str),
    #[error("sensor failed to open: {0}")]
    Sensor(#[from] CaptureError),
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: io::Error,
    },
}
