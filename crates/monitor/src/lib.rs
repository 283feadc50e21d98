//! Real-time deposition monitoring core.
//!
//! Frames are grabbed under a scheduled exposure, segmented once, reduced to
//! per-class measurements, aggregated over frame windows and checked against
//! the material's tolerance bands. Finished frames fan out to persistence and
//! presentation consumers without ever blocking capture.

pub mod aggregate;
pub mod annotation;
pub mod chart;
pub mod error;
pub mod exposure;
pub mod measurement;
pub mod model;
pub mod persist;
pub mod pipeline;
pub mod sink;
pub mod status;
pub mod tolerance;

pub use aggregate::{EmittedSample, MetricAggregator, SeriesPoint, WindowSetting};
pub use annotation::{AnnotationOptions, Corner, OverlayInfo};
pub use chart::{ChartArtists, ChartOptions, LiveChartState};
pub use error::{ConfigError, SessionError};
pub use exposure::{ExposureMode, ExposureSample, ExposureSchedule, ExposureState, compute_exposure};
pub use measurement::{ClassMeasurement, MeasurementEngine, MeasurementSet};
pub use model::{ChartGroup, ClassKind, ClassMetricTable, Metric, MetricKind};
pub use persist::FsPersistenceSink;
pub use pipeline::{
    RecordingSession, RunPermission, SessionConfig, SessionPlan, SessionState, SessionSummary,
    TickOutcome, TriggerSignal,
};
pub use sink::{ImageRole, MeasurementRow, NullSurface, PersistenceSink, PresentationSurface};
pub use status::{SharedState, Status, StatusState};
pub use tolerance::{ToleranceMonitor, ToleranceSpec, ToleranceTable};
