//! Tolerance monitor: compares freshly emitted aggregate samples with the
//! active material's bands.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    aggregate::{EmittedSample, MetricAggregator, SeriesPoint},
    model::{ClassKind, ClassMetricTable, Metric},
    status::{Status, StatusState},
};

/// Desired value with asymmetric tolerances, as stored per material.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToleranceSpec {
    #[serde(rename = "value")]
    pub desired: f64,
    #[serde(rename = "pos_tolerance")]
    pub positive: f64,
    #[serde(rename = "neg_tolerance")]
    pub negative: f64,
}

impl ToleranceSpec {
    pub fn upper(&self) -> f64 {
        self.desired + self.positive
    }

    pub fn lower(&self) -> f64 {
        self.desired - self.negative
    }

    /// Band edges are inclusive.
    pub fn contains(&self, value: f64) -> bool {
        !(value > self.upper() || value < self.lower())
    }
}

/// Resolved tolerances of the session's material.
pub type ToleranceTable = ClassMetricTable<Option<ToleranceSpec>>;

#[derive(Clone, Debug, PartialEq)]
pub struct Verdict {
    pub in_tolerance: bool,
    pub detail: String,
}

#[derive(Clone, Debug)]
struct Violation {
    detail: String,
    /// Order in which out-of-band verdicts were reached.
    sequence: u64,
}

/// Tracks which (class, metric) pairs are currently out of band.
pub struct ToleranceMonitor {
    table: ToleranceTable,
    enabled: bool,
    violating: ClassMetricTable<Option<Violation>>,
    sequence: u64,
}

impl ToleranceMonitor {
    pub fn new(table: ToleranceTable, enabled: bool) -> Self {
        Self {
            table,
            enabled,
            violating: ClassMetricTable::default(),
            sequence: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn table(&self) -> &ToleranceTable {
        &self.table
    }

    /// Judge the newest point of `series`. Returns `None` when comparison is
    /// disabled, the series is empty, or no band is configured for the pair.
    pub fn evaluate(
        &mut self,
        metric: Metric,
        class: ClassKind,
        series: &[SeriesPoint],
    ) -> Option<Verdict> {
        if !self.enabled {
            return None;
        }
        let point = series.last()?;
        let spec = (*self.table.get(class, metric))?;
        let verdict = judge(&spec, metric, class, point);

        let slot = self.violating.get_mut(class, metric);
        if verdict.in_tolerance {
            if slot.take().is_some() {
                info!("{class} / {metric} back in tolerance at frame {}", point.frame_index);
            }
        } else {
            if slot.is_none() {
                metrics::counter!("deposition_tolerance_violations_total").increment(1);
                warn!("{}", verdict.detail);
            }
            self.sequence += 1;
            *slot = Some(Violation {
                detail: verdict.detail.clone(),
                sequence: self.sequence,
            });
        }
        Some(verdict)
    }

    /// Judge the points emitted on this frame. Windows that buffered no
    /// sample (the class never appeared) are not judged. Returns how many
    /// points received a verdict.
    pub fn evaluate_emitted(
        &mut self,
        emitted: &[EmittedSample],
        aggregator: &MetricAggregator,
    ) -> usize {
        let mut judged = 0;
        for sample in emitted.iter().filter(|sample| sample.samples > 0) {
            let series = aggregator.series(sample.class, sample.metric);
            if self.evaluate(sample.metric, sample.class, series).is_some() {
                judged += 1;
            }
        }
        judged
    }

    /// Status implied by the current set of violations, detailing the most
    /// recent one. Stays in `ToleranceError` until every pair has returned
    /// to its band.
    pub fn status(&self) -> Status {
        let latest = self
            .violating
            .iter()
            .filter_map(|(_, _, violation)| violation.as_ref())
            .max_by_key(|violation| violation.sequence);
        match latest {
            Some(violation) => {
                Status::with_detail(StatusState::ToleranceError, violation.detail.as_str())
            }
            None => Status::new(StatusState::Recording),
        }
    }

    pub fn violations(&self) -> usize {
        self.violating.iter().filter(|(_, _, v)| v.is_some()).count()
    }
}

fn judge(spec: &ToleranceSpec, metric: Metric, class: ClassKind, point: &SeriesPoint) -> Verdict {
    if spec.contains(point.value) {
        return Verdict {
            in_tolerance: true,
            detail: String::new(),
        };
    }
    Verdict {
        in_tolerance: false,
        detail: format!(
            "{class} {metric} out of tolerance at frame {}: {:.2} not in [{:.2}, {:.2}] (desired {:.2})",
            point.frame_index,
            point.value,
            spec.lower(),
            spec.upper(),
            spec.desired
        ),
    }
}
