//! Windowed reduction of per-frame measurements into metric series.
//!
//! All state here is owned by the acquisition thread; nothing is shared.

use serde::Serialize;

use crate::{
    measurement::MeasurementSet,
    model::{ClassKind, ClassMetricTable, Metric, MetricKind, MetricTable},
};

pub const DEFAULT_WINDOW: u64 = 10;

/// Enabled flag and window length for one metric.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowSetting {
    pub enabled: bool,
    pub window: u64,
}

impl Default for WindowSetting {
    fn default() -> Self {
        Self {
            enabled: true,
            window: DEFAULT_WINDOW,
        }
    }
}

/// One aggregate point of a metric series.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub frame_index: u64,
    pub value: f64,
}

/// A point appended to a series during the current frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct EmittedSample {
    pub class: ClassKind,
    pub metric: Metric,
    pub point: SeriesPoint,
    /// Raw values reduced into `point`; zero when the class was never detected in the window.
    pub samples: usize,
}

pub struct MetricAggregator {
    settings: MetricTable<WindowSetting>,
    buffers: ClassMetricTable<Vec<f64>>,
    series: ClassMetricTable<Vec<SeriesPoint>>,
}

impl MetricAggregator {
    /// Window lengths must already be validated as non-zero.
    pub fn new(settings: MetricTable<WindowSetting>) -> Self {
        Self {
            settings,
            buffers: ClassMetricTable::default(),
            series: ClassMetricTable::default(),
        }
    }

    pub fn setting(&self, metric: Metric) -> WindowSetting {
        *self.settings.get(metric)
    }

    /// Buffer a raw per-frame value. Absent samples are skipped.
    pub fn update(&mut self, metric: Metric, class: ClassKind, raw: Option<f64>) {
        if let Some(value) = raw {
            self.buffers.get_mut(class, metric).push(value);
        }
    }

    /// Reduce and clear every class buffer of `metric` when `frame_index` closes a window.
    pub fn maybe_flush(&mut self, metric: Metric, frame_index: u64) -> Vec<EmittedSample> {
        let window = self.settings.get(metric).window;
        if frame_index == 0 || window == 0 || frame_index % window != 0 {
            return Vec::new();
        }
        let mut emitted = Vec::with_capacity(ClassKind::COUNT);
        for class in ClassKind::ALL {
            let buffer = self.buffers.get_mut(class, metric);
            let samples = buffer.len();
            let value = reduce(metric.kind(), buffer);
            buffer.clear();
            let point = SeriesPoint { frame_index, value };
            self.series.get_mut(class, metric).push(point);
            emitted.push(EmittedSample {
                class,
                metric,
                point,
                samples,
            });
        }
        emitted
    }

    /// Feed one frame's measurements through every enabled metric.
    pub fn ingest(&mut self, frame_index: u64, measurements: &MeasurementSet) -> Vec<EmittedSample> {
        let mut emitted = Vec::new();
        for metric in Metric::ALL {
            if !self.settings.get(metric).enabled {
                continue;
            }
            for class in ClassKind::ALL {
                self.update(metric, class, measurements.sample(class, metric));
            }
            emitted.extend(self.maybe_flush(metric, frame_index));
        }
        emitted
    }

    pub fn series(&self, class: ClassKind, metric: Metric) -> &[SeriesPoint] {
        self.series.get(class, metric)
    }

    pub fn buffered(&self, class: ClassKind, metric: Metric) -> usize {
        self.buffers.get(class, metric).len()
    }

    /// Hand over every series, e.g. once acquisition ends.
    pub fn into_series(self) -> ClassMetricTable<Vec<SeriesPoint>> {
        self.series
    }

    pub fn reset(&mut self) {
        self.buffers = ClassMetricTable::default();
        self.series = ClassMetricTable::default();
    }
}

/// Mean or population standard deviation; an empty window reduces to zero.
pub fn reduce(kind: MetricKind, values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    match kind {
        MetricKind::Average => mean,
        MetricKind::StdDev => {
            let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            variance.sqrt()
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::measurement::ClassMeasurement;

    fn aggregator_with_window(window: u64) -> MetricAggregator {
        MetricAggregator::new(MetricTable::from_fn(|_| WindowSetting {
            enabled: true,
            window,
        }))
    }

    #[test]
    fn constant_input_emits_once_per_full_window() {
        let mut agg = aggregator_with_window(10);
        let mut emitted = Vec::new();
        for frame in 1..=25 {
            agg.update(Metric::ClassArea, ClassKind::ArcFlash, Some(42.0));
            agg.update(Metric::ClassAreaStdDev, ClassKind::ArcFlash, Some(42.0));
            emitted.extend(agg.maybe_flush(Metric::ClassArea, frame));
            emitted.extend(agg.maybe_flush(Metric::ClassAreaStdDev, frame));
        }

        let area = agg.series(ClassKind::ArcFlash, Metric::ClassArea);
        assert_eq!(
            area,
            &[
                SeriesPoint {
                    frame_index: 10,
                    value: 42.0
                },
                SeriesPoint {
                    frame_index: 20,
                    value: 42.0
                }
            ]
        );
        let std = agg.series(ClassKind::ArcFlash, Metric::ClassAreaStdDev);
        assert_eq!(std.len(), 2);
        assert!(std.iter().all(|p| p.value == 0.0));
        // Three classes flushed at frames 10 and 20 for both metrics.
        assert_eq!(emitted.len(), 2 * 2 * ClassKind::COUNT);
        assert_eq!(agg.buffered(ClassKind::ArcFlash, Metric::ClassArea), 5);
    }

    #[test]
    fn null_samples_do_not_grow_the_buffer() {
        let mut agg = aggregator_with_window(10);
        agg.update(Metric::XAverage, ClassKind::WeldingWire, None);
        assert_eq!(agg.buffered(ClassKind::WeldingWire, Metric::XAverage), 0);
        agg.update(Metric::XAverage, ClassKind::WeldingWire, Some(1.0));
        assert_eq!(agg.buffered(ClassKind::WeldingWire, Metric::XAverage), 1);
    }

    #[test]
    fn frame_zero_never_flushes() {
        let mut agg = aggregator_with_window(1);
        agg.update(Metric::XMinimum, ClassKind::ArcFlash, Some(3.0));
        assert!(agg.maybe_flush(Metric::XMinimum, 0).is_empty());
        assert_eq!(agg.maybe_flush(Metric::XMinimum, 1).len(), ClassKind::COUNT);
    }

    #[test]
    fn empty_window_reduces_to_zero() {
        let mut agg = aggregator_with_window(2);
        let emitted = agg.maybe_flush(Metric::YAverage, 2);
        assert!(emitted.iter().all(|s| s.point.value == 0.0 && s.samples == 0));
        assert_eq!(agg.series(ClassKind::ArcFlash, Metric::YAverage).len(), 1);
    }

    #[test]
    fn emitted_points_count_their_samples() {
        let mut agg = aggregator_with_window(3);
        agg.update(Metric::XMinimum, ClassKind::WeldingWire, Some(4.0));
        agg.update(Metric::XMinimum, ClassKind::WeldingWire, None);
        agg.update(Metric::XMinimum, ClassKind::WeldingWire, Some(6.0));
        let emitted = agg.maybe_flush(Metric::XMinimum, 3);
        let wire = emitted
            .iter()
            .find(|s| s.class == ClassKind::WeldingWire)
            .unwrap();
        assert_eq!(wire.samples, 2);
        assert_relative_eq!(wire.point.value, 5.0);
        let series = agg.into_series();
        assert_eq!(series.get(ClassKind::WeldingWire, Metric::XMinimum).len(), 1);
    }

    #[test]
    fn std_metric_is_population_deviation() {
        assert_relative_eq!(
            reduce(MetricKind::StdDev, &[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]),
            2.0
        );
        assert_relative_eq!(reduce(MetricKind::Average, &[1.0, 2.0, 6.0]), 3.0);
    }

    #[test]
    fn derived_centre_is_buffered_per_frame() {
        let mut agg = aggregator_with_window(2);
        let frame = |x_min, x_max| {
            let mut set = MeasurementSet::default();
            set.set(
                ClassKind::SolidificationPool,
                Some(ClassMeasurement {
                    x_min,
                    x_max,
                    y_min: 0,
                    y_max: 0,
                    area: 1,
                }),
            );
            set
        };
        agg.ingest(1, &frame(0, 10));
        let emitted = agg.ingest(2, &frame(10, 30));
        let x_avg = emitted
            .iter()
            .find(|s| s.class == ClassKind::SolidificationPool && s.metric == Metric::XAverage)
            .unwrap();
        // Centres 5 and 20.
        assert_relative_eq!(x_avg.point.value, 12.5);
        let x_std = agg.series(ClassKind::SolidificationPool, Metric::XAverageStdDev);
        assert_relative_eq!(x_std[0].value, 7.5);
    }

    #[test]
    fn disabled_metrics_are_skipped() {
        let mut settings = MetricTable::from_fn(|_| WindowSetting {
            enabled: true,
            window: 1,
        });
        settings.get_mut(Metric::ClassArea).enabled = false;
        let mut agg = MetricAggregator::new(settings);
        let emitted = agg.ingest(1, &MeasurementSet::default());
        assert!(emitted.iter().all(|s| s.metric != Metric::ClassArea));
        assert!(agg.series(ClassKind::ArcFlash, Metric::ClassArea).is_empty());
        assert_eq!(
            agg.series(ClassKind::ArcFlash, Metric::XMinimum).len(),
            1
        );
    }

    #[test]
    fn windows_are_per_metric() {
        let mut settings = MetricTable::from_fn(|_| WindowSetting::default());
        settings.get_mut(Metric::XMinimum).window = 3;
        let mut agg = MetricAggregator::new(settings);
        for frame in 1..=10 {
            agg.ingest(frame, &MeasurementSet::default());
        }
        assert_eq!(agg.series(ClassKind::ArcFlash, Metric::XMinimum).len(), 3);
        assert_eq!(agg.series(ClassKind::ArcFlash, Metric::XMaximum).len(), 1);
        agg.reset();
        assert!(agg.series(ClassKind::ArcFlash, Metric::XMinimum).is_empty());
    }
}
