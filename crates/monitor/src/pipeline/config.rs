//! Session configuration store.
//!
//! The JSON document is loaded once per recording session and resolved into
//! an immutable [`SessionPlan`]. Every configuration error surfaces from
//! [`SessionConfig::plan`], before any pipeline thread exists.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    aggregate::{DEFAULT_WINDOW, WindowSetting},
    annotation::AnnotationOptions,
    chart::ChartOptions,
    error::ConfigError,
    exposure::{ExposureSchedule, ExposureState},
    model::{ClassKind, Metric, MetricTable},
    sink::ImageRole,
    tolerance::{ToleranceSpec, ToleranceTable},
};

/// Per-material tolerance entries, keyed by class then metric.
pub type MaterialTolerances = BTreeMap<ClassKind, BTreeMap<Metric, ToleranceSpec>>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunPermissionMode {
    #[default]
    Manual,
    Automatic,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingOptions {
    pub image_raw: bool,
    pub image_annotated: bool,
    pub image_segmented: bool,
    pub preview_raw: bool,
    pub preview_annotated: bool,
    pub preview_segmented: bool,
    pub video_raw: bool,
    pub video_annotated: bool,
    pub video_segmented: bool,
    /// Root directory for persisted sessions; nothing is written when absent.
    pub save_location: Option<PathBuf>,
    /// Width previews are scaled down to before reaching the presentation surface.
    pub preview_width: u32,
}

impl Default for RecordingOptions {
    fn default() -> Self {
        Self {
            image_raw: true,
            image_annotated: false,
            image_segmented: false,
            preview_raw: true,
            preview_annotated: true,
            preview_segmented: false,
            video_raw: false,
            video_annotated: false,
            video_segmented: false,
            save_location: None,
            preview_width: 640,
        }
    }
}

impl RecordingOptions {
    pub fn persisted_roles(&self) -> Vec<ImageRole> {
        roles(self.image_raw, self.image_annotated, self.image_segmented)
    }

    pub fn preview_roles(&self) -> Vec<ImageRole> {
        roles(self.preview_raw, self.preview_annotated, self.preview_segmented)
    }

    pub fn video_roles(&self) -> Vec<ImageRole> {
        roles(self.video_raw, self.video_annotated, self.video_segmented)
    }
}

fn roles(raw: bool, annotated: bool, segmented: bool) -> Vec<ImageRole> {
    [
        (raw, ImageRole::Raw),
        (annotated, ImageRole::Annotated),
        (segmented, ImageRole::Segmented),
    ]
    .into_iter()
    .filter_map(|(on, role)| on.then_some(role))
    .collect()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationOptions {
    pub apply_segmentation: bool,
    pub compare_values: bool,
    /// Model class id for each process feature.
    pub class_ids: BTreeMap<ClassKind, i64>,
    pub confidence: f32,
    pub input_width: u32,
    pub input_height: u32,
}

impl Default for SegmentationOptions {
    fn default() -> Self {
        Self {
            apply_segmentation: true,
            compare_values: false,
            class_ids: ClassKind::ALL
                .into_iter()
                .map(|class| (class, class.index() as i64))
                .collect(),
            confidence: 0.25,
            input_width: 640,
            input_height: 640,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricOptions {
    pub enabled: bool,
    pub window: u64,
}

impl Default for MetricOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            window: DEFAULT_WINDOW,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub recording: RecordingOptions,
    pub annotation: AnnotationOptions,
    pub charts: ChartOptions,
    pub exposure: ExposureState,
    pub run_permission: RunPermissionMode,
    pub segmentation: SegmentationOptions,
    pub metrics: BTreeMap<Metric, MetricOptions>,
    pub material: Option<String>,
    pub materials: BTreeMap<String, MaterialTolerances>,
    /// Free-form job metadata copied into every measurement row.
    pub context: BTreeMap<String, String>,
    pub grab_timeout_ms: u64,
    pub tick_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            recording: RecordingOptions::default(),
            annotation: AnnotationOptions::default(),
            charts: ChartOptions::default(),
            exposure: ExposureState::default(),
            run_permission: RunPermissionMode::default(),
            segmentation: SegmentationOptions::default(),
            metrics: BTreeMap::new(),
            material: None,
            materials: BTreeMap::new(),
            context: BTreeMap::new(),
            grab_timeout_ms: 1_000,
            tick_interval_ms: 30,
        }
    }
}

#[derive(Clone, Debug, Default)]
/// Optional telemetry knobs for tracing output.
pub struct TelemetryOptions {
    /// Write a Chrome trace JSON file capturing pipeline spans.
    pub chrome_trace_path: Option<PathBuf>,
}

/// Validated, immutable view of a [`SessionConfig`].
#[derive(Clone, Debug)]
pub struct SessionPlan {
    pub schedule: ExposureSchedule,
    pub windows: MetricTable<WindowSetting>,
    pub tolerances: ToleranceTable,
    pub compare_values: bool,
    pub apply_segmentation: bool,
    pub class_ids: BTreeMap<ClassKind, i64>,
    pub confidence: f32,
    pub model_input: (u32, u32),
    pub persisted_roles: Vec<ImageRole>,
    pub video_roles: Vec<ImageRole>,
    pub preview_roles: Vec<ImageRole>,
    pub annotation: AnnotationOptions,
    pub charts: ChartOptions,
    pub save_location: Option<PathBuf>,
    pub preview_width: u32,
    pub run_permission: RunPermissionMode,
    pub material: Option<String>,
    pub context: BTreeMap<String, String>,
    pub grab_timeout: Duration,
    pub tick_interval: Duration,
}

impl SessionPlan {
    /// Whether any consumer needs `role` rendered for each frame.
    pub fn renders(&self, role: ImageRole) -> bool {
        self.persisted_roles.contains(&role)
            || self.video_roles.contains(&role)
            || self.preview_roles.contains(&role)
    }
}

impl SessionConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn plan(&self) -> Result<SessionPlan, ConfigError> {
        let schedule = ExposureSchedule::new(self.exposure.clone())?;

        if self.grab_timeout_ms == 0 {
            return Err(ConfigError::NonPositive("grab_timeout_ms"));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::NonPositive("tick_interval_ms"));
        }
        if self.recording.preview_width == 0 {
            return Err(ConfigError::NonPositive("recording.preview_width"));
        }
        let seg = &self.segmentation;
        if seg.input_width == 0 || seg.input_height == 0 {
            return Err(ConfigError::NonPositive("segmentation input size"));
        }
        let mut seen: BTreeMap<i64, ClassKind> = BTreeMap::new();
        for (class, id) in &seg.class_ids {
            if let Some(first) = seen.insert(*id, *class) {
                return Err(ConfigError::DuplicateClassId {
                    id: *id,
                    first,
                    second: *class,
                });
            }
        }

        let windows = self.windows()?;
        let tolerances = self.tolerances(&windows)?;
        let persist = self.recording.save_location.is_some();

        Ok(SessionPlan {
            schedule,
            windows,
            tolerances,
            compare_values: seg.compare_values,
            apply_segmentation: seg.apply_segmentation,
            class_ids: seg.class_ids.clone(),
            confidence: seg.confidence,
            model_input: (seg.input_width, seg.input_height),
            persisted_roles: if persist {
                self.recording.persisted_roles()
            } else {
                Vec::new()
            },
            video_roles: if persist {
                self.recording.video_roles()
            } else {
                Vec::new()
            },
            preview_roles: self.recording.preview_roles(),
            annotation: self.annotation.clone(),
            charts: self.charts.clone(),
            save_location: self.recording.save_location.clone(),
            preview_width: self.recording.preview_width,
            run_permission: self.run_permission,
            material: self.material.clone(),
            context: self.context.clone(),
            grab_timeout: Duration::from_millis(self.grab_timeout_ms),
            tick_interval: Duration::from_millis(self.tick_interval_ms),
        })
    }

    fn windows(&self) -> Result<MetricTable<WindowSetting>, ConfigError> {
        let mut windows = MetricTable::from_fn(|_| WindowSetting::default());
        for (metric, options) in &self.metrics {
            if options.window == 0 {
                return Err(ConfigError::ZeroWindow(*metric));
            }
            *windows.get_mut(*metric) = WindowSetting {
                enabled: options.enabled,
                window: options.window,
            };
        }
        Ok(windows)
    }

    /// Resolve the active material once. Comparison demands an entry for every
    /// enabled metric of every class; otherwise whatever exists is kept for
    /// drawing bands.
    fn tolerances(
        &self,
        windows: &MetricTable<WindowSetting>,
    ) -> Result<ToleranceTable, ConfigError> {
        let compare = self.segmentation.compare_values;
        let Some(material) = self.material.as_ref() else {
            if compare {
                return Err(ConfigError::NoMaterial);
            }
            return Ok(ToleranceTable::default());
        };
        let entries = self
            .materials
            .get(material)
            .ok_or_else(|| ConfigError::UnknownMaterial(material.clone()))?;

        let mut table = ToleranceTable::default();
        for class in ClassKind::ALL {
            for metric in Metric::ALL {
                let spec = entries.get(&class).and_then(|m| m.get(&metric)).copied();
                match spec {
                    Some(spec) => {
                        if !(spec.positive >= 0.0 && spec.negative >= 0.0) {
                            return Err(ConfigError::NegativeTolerance { class, metric });
                        }
                        *table.get_mut(class, metric) = Some(spec);
                    }
                    None if compare && windows.get(metric).enabled => {
                        return Err(ConfigError::MissingTolerance {
                            material: material.clone(),
                            class,
                            metric,
                        });
                    }
                    None => {}
                }
            }
        }
        Ok(table)
    }
}
