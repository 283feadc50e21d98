//! Threaded recording pipeline: acquisition worker, dispatcher and consumers.

pub mod acquisition;
pub mod config;
pub mod data;
pub mod dispatch;
pub mod session;
pub mod telemetry;

pub use acquisition::{RunPermission, TriggerSignal};
pub use config::{
    MaterialTolerances, MetricOptions, RecordingOptions, RunPermissionMode, SegmentationOptions,
    SessionConfig, SessionPlan, TelemetryOptions,
};
pub use data::{FrameRecord, Payload, PipelineMessage, SharedRecord};
pub use dispatch::ConsumerKind;
pub use session::{RecordingSession, SessionState, SessionSummary, TickOutcome};
