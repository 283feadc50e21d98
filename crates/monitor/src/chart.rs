//! Retained chart state: one artist set per (metric, class), mutated in place.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::{
    aggregate::SeriesPoint,
    model::{ChartGroup, ClassKind, ClassMetricTable, Metric},
    tolerance::{ToleranceSpec, ToleranceTable},
};

const Y_MARGIN: f64 = 0.05;

/// Which chart groups are drawn live, and whether the final charts are kept.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChartOptions {
    /// Groups absent from the map are shown.
    pub show_charts: BTreeMap<ChartGroup, bool>,
    /// Hand every chart to the persistence sink once recording stops.
    pub save_charts: bool,
}

impl ChartOptions {
    pub fn shows(&self, group: ChartGroup) -> bool {
        self.show_charts.get(&group).copied().unwrap_or(true)
    }
}

/// Styling fixed when the artists are first created.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChartStyle {
    pub title: &'static str,
    pub series_label: String,
    pub x_label: &'static str,
    pub y_label: &'static str,
    pub color: String,
}

/// Filled region between the tolerance edges, spanning the current x range.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Band {
    pub lower: f64,
    pub upper: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChartArtists {
    pub metric: Metric,
    pub class: ClassKind,
    pub style: ChartStyle,
    pub line: Vec<[f64; 2]>,
    pub band: Option<Band>,
    pub centerline: Option<f64>,
    pub x_limits: [f64; 2],
    pub y_limits: [f64; 2],
    pub revision: u64,
}

impl ChartArtists {
    fn create(metric: Metric, class: ClassKind) -> Self {
        let group = metric.group();
        Self {
            metric,
            class,
            style: ChartStyle {
                title: group.title(),
                series_label: format!("{class} {metric}"),
                x_label: "Frame Index",
                y_label: group.y_label(),
                color: class.color_hex(),
            },
            line: Vec::new(),
            band: None,
            centerline: None,
            x_limits: [0.0, 1.0],
            y_limits: [0.0, 1.0],
            revision: 0,
        }
    }

    fn update(&mut self, xs: &[f64], ys: &[f64], tolerance: Option<&ToleranceSpec>) {
        self.line.clear();
        self.line
            .extend(xs.iter().zip(ys).map(|(&x, &y)| [x, y]));

        self.band = tolerance.map(|spec| Band {
            lower: spec.lower(),
            upper: spec.upper(),
        });
        self.centerline = tolerance.map(|spec| spec.desired);

        if let Some(limits) = x_limits(xs) {
            self.x_limits = limits;
        }
        let band_edges = self.band.iter().flat_map(|b| [b.lower, b.upper]);
        if let Some(limits) = y_limits(ys.iter().copied().chain(band_edges)) {
            self.y_limits = limits;
        }
        self.revision = self.revision.wrapping_add(1);
    }
}

/// `[min, max]` of the x series, widened by 0.5 either side for a single point.
fn x_limits(xs: &[f64]) -> Option<[f64; 2]> {
    let (lo, hi) = min_max(xs.iter().copied())?;
    if lo == hi {
        return Some([lo - 0.5, hi + 0.5]);
    }
    Some([lo, hi])
}

fn y_limits(values: impl Iterator<Item = f64>) -> Option<[f64; 2]> {
    let (lo, hi) = min_max(values)?;
    if lo == hi {
        return Some([lo - 0.5, hi + 0.5]);
    }
    let pad = (hi - lo) * Y_MARGIN;
    Some([lo - pad, hi + pad])
}

fn min_max(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    values
        .filter(|v| v.is_finite())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

#[derive(Default)]
pub struct LiveChartState {
    artists: HashMap<(Metric, ClassKind), ChartArtists>,
    created: u64,
}

impl LiveChartState {
    /// Update the artists for `(metric, class)`, creating them on first use.
    pub fn plot(
        &mut self,
        metric: Metric,
        class: ClassKind,
        xs: &[f64],
        ys: &[f64],
        tolerance: Option<&ToleranceSpec>,
    ) -> &ChartArtists {
        let created = &mut self.created;
        let artists = self.artists.entry((metric, class)).or_insert_with(|| {
            *created += 1;
            ChartArtists::create(metric, class)
        });
        artists.update(xs, ys, tolerance);
        artists
    }

    /// Plot every non-empty series once. Used to render the final charts of a session.
    pub fn from_series(
        series: &ClassMetricTable<Vec<SeriesPoint>>,
        tolerances: &ToleranceTable,
    ) -> Self {
        let mut charts = Self::default();
        for (class, metric, points) in series.iter() {
            if points.is_empty() {
                continue;
            }
            let xs: Vec<f64> = points.iter().map(|p| p.frame_index as f64).collect();
            let ys: Vec<f64> = points.iter().map(|p| p.value).collect();
            charts.plot(metric, class, &xs, &ys, tolerances.get(class, metric).as_ref());
        }
        charts
    }

    pub fn artists(&self, metric: Metric, class: ClassKind) -> Option<&ChartArtists> {
        self.artists.get(&(metric, class))
    }

    /// Artist sets ordered by metric, then class.
    pub fn sorted(&self) -> Vec<&ChartArtists> {
        let mut artists: Vec<&ChartArtists> = self.artists.values().collect();
        artists.sort_by_key(|a| (a.metric, a.class));
        artists
    }

    /// Number of artist sets ever created.
    pub fn created(&self) -> u64 {
        self.created
    }

    pub fn len(&self) -> usize {
        self.artists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artists.is_empty()
    }

    pub fn clear(&mut self) {
        self.artists.clear();
    }
}
