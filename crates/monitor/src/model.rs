//! Fixed process-feature classes, metrics, and the table keyed by the pair.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Process feature detected by the segmentation model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ClassKind {
    #[serde(rename = "Welding Wire")]
    WeldingWire,
    #[serde(rename = "Solidification Pool", alias = "Solidification Zone")]
    SolidificationPool,
    #[serde(rename = "Arc Flash")]
    ArcFlash,
}

impl ClassKind {
    pub const COUNT: usize = 3;
    pub const ALL: [ClassKind; Self::COUNT] = [
        ClassKind::WeldingWire,
        ClassKind::SolidificationPool,
        ClassKind::ArcFlash,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        match self {
            ClassKind::WeldingWire => "Welding Wire",
            ClassKind::SolidificationPool => "Solidification Pool",
            ClassKind::ArcFlash => "Arc Flash",
        }
    }

    /// Chart and overlay colour.
    pub fn color(self) -> [u8; 3] {
        match self {
            ClassKind::SolidificationPool => [0x1f, 0x77, 0xb4],
            ClassKind::WeldingWire => [0xff, 0x7f, 0x0e],
            ClassKind::ArcFlash => [0x2c, 0xa0, 0x2c],
        }
    }

    pub fn color_hex(self) -> String {
        let [r, g, b] = self.color();
        format!("#{r:02x}{g:02x}{b:02x}")
    }
}

impl fmt::Display for ClassKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How a metric window is reduced to one aggregate sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetricKind {
    Average,
    StdDev,
}

/// Derived quantity tracked per class over a frame window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Metric {
    #[serde(rename = "X Minimum")]
    XMinimum,
    #[serde(rename = "X Maximum")]
    XMaximum,
    #[serde(rename = "Y Minimum")]
    YMinimum,
    #[serde(rename = "Y Maximum")]
    YMaximum,
    #[serde(rename = "X Average")]
    XAverage,
    #[serde(rename = "Y Average")]
    YAverage,
    #[serde(rename = "Class Area")]
    ClassArea,
    #[serde(rename = "Class Area Standard Deviation")]
    ClassAreaStdDev,
    #[serde(rename = "X Average Standard Deviation")]
    XAverageStdDev,
    #[serde(rename = "Y Average Standard Deviation")]
    YAverageStdDev,
}

impl Metric {
    pub const COUNT: usize = 10;
    pub const ALL: [Metric; Self::COUNT] = [
        Metric::XMinimum,
        Metric::XMaximum,
        Metric::YMinimum,
        Metric::YMaximum,
        Metric::XAverage,
        Metric::YAverage,
        Metric::ClassArea,
        Metric::ClassAreaStdDev,
        Metric::XAverageStdDev,
        Metric::YAverageStdDev,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        match self {
            Metric::XMinimum => "X Minimum",
            Metric::XMaximum => "X Maximum",
            Metric::YMinimum => "Y Minimum",
            Metric::YMaximum => "Y Maximum",
            Metric::XAverage => "X Average",
            Metric::YAverage => "Y Average",
            Metric::ClassArea => "Class Area",
            Metric::ClassAreaStdDev => "Class Area Standard Deviation",
            Metric::XAverageStdDev => "X Average Standard Deviation",
            Metric::YAverageStdDev => "Y Average Standard Deviation",
        }
    }

    pub fn kind(self) -> MetricKind {
        match self {
            Metric::ClassAreaStdDev | Metric::XAverageStdDev | Metric::YAverageStdDev => {
                MetricKind::StdDev
            }
            _ => MetricKind::Average,
        }
    }

    pub fn group(self) -> ChartGroup {
        match self {
            Metric::XMinimum | Metric::XMaximum | Metric::XAverage => ChartGroup::XPosition,
            Metric::YMinimum | Metric::YMaximum | Metric::YAverage => ChartGroup::YPosition,
            Metric::XAverageStdDev | Metric::YAverageStdDev => ChartGroup::PositionStdDev,
            Metric::ClassArea => ChartGroup::ClassArea,
            Metric::ClassAreaStdDev => ChartGroup::ClassAreaStdDev,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Chart a metric is drawn on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ChartGroup {
    #[serde(rename = "X Position Values")]
    XPosition,
    #[serde(rename = "Y Position Values")]
    YPosition,
    #[serde(rename = "Position Standard Deviations")]
    PositionStdDev,
    #[serde(rename = "Class Area")]
    ClassArea,
    #[serde(rename = "Class Area Standard Deviation")]
    ClassAreaStdDev,
}

impl ChartGroup {
    pub const ALL: [ChartGroup; 5] = [
        ChartGroup::XPosition,
        ChartGroup::YPosition,
        ChartGroup::PositionStdDev,
        ChartGroup::ClassArea,
        ChartGroup::ClassAreaStdDev,
    ];

    pub fn title(self) -> &'static str {
        match self {
            ChartGroup::XPosition => "X Position Values",
            ChartGroup::YPosition => "Y Position Values",
            ChartGroup::PositionStdDev => "Position Standard Deviations",
            ChartGroup::ClassArea => "Class Area",
            ChartGroup::ClassAreaStdDev => "Class Area Standard Deviation",
        }
    }

    pub fn y_label(self) -> &'static str {
        match self {
            ChartGroup::XPosition | ChartGroup::YPosition => "Pixel Position",
            ChartGroup::PositionStdDev => "Std. Deviation (px)",
            ChartGroup::ClassArea => "Area (px)",
            ChartGroup::ClassAreaStdDev => "Std. Deviation (px)",
        }
    }
}

/// Dense table with one slot per (class, metric) pair.
#[derive(Clone, Debug, PartialEq)]
pub struct ClassMetricTable<T> {
    cells: [[T; Metric::COUNT]; ClassKind::COUNT],
}

impl<T> ClassMetricTable<T> {
    pub fn from_fn(mut f: impl FnMut(ClassKind, Metric) -> T) -> Self {
        Self {
            cells: std::array::from_fn(|c| {
                std::array::from_fn(|m| f(ClassKind::ALL[c], Metric::ALL[m]))
            }),
        }
    }

    pub fn get(&self, class: ClassKind, metric: Metric) -> &T {
        &self.cells[class.index()][metric.index()]
    }

    pub fn get_mut(&mut self, class: ClassKind, metric: Metric) -> &mut T {
        &mut self.cells[class.index()][metric.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (ClassKind, Metric, &T)> {
        ClassKind::ALL.into_iter().flat_map(move |class| {
            Metric::ALL
                .into_iter()
                .map(move |metric| (class, metric, self.get(class, metric)))
        })
    }
}

impl<T: Default> Default for ClassMetricTable<T> {
    fn default() -> Self {
        Self::from_fn(|_, _| T::default())
    }
}

/// One slot per metric.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricTable<T> {
    cells: [T; Metric::COUNT],
}

impl<T> MetricTable<T> {
    pub fn from_fn(mut f: impl FnMut(Metric) -> T) -> Self {
        Self {
            cells: std::array::from_fn(|m| f(Metric::ALL[m])),
        }
    }

    pub fn get(&self, metric: Metric) -> &T {
        &self.cells[metric.index()]
    }

    pub fn get_mut(&mut self, metric: Metric) -> &mut T {
        &mut self.cells[metric.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_indices_match_all_ordering() {
        for (idx, class) in ClassKind::ALL.iter().enumerate() {
            assert_eq!(class.index(), idx);
        }
        for (idx, metric) in Metric::ALL.iter().enumerate() {
            assert_eq!(metric.index(), idx);
        }
    }

    #[test]
    fn std_metrics_are_exactly_the_three_deviation_metrics() {
        let std: Vec<_> = Metric::ALL
            .into_iter()
            .filter(|m| m.kind() == MetricKind::StdDev)
            .collect();
        assert_eq!(
            std,
            vec![
                Metric::ClassAreaStdDev,
                Metric::XAverageStdDev,
                Metric::YAverageStdDev
            ]
        );
    }

    #[test]
    fn legacy_solidification_zone_name_deserialises() {
        let class: ClassKind = serde_json::from_str("\"Solidification Zone\"").unwrap();
        assert_eq!(class, ClassKind::SolidificationPool);
        let metric: Metric = serde_json::from_str("\"X Average\"").unwrap();
        assert_eq!(metric, Metric::XAverage);
    }

    #[test]
    fn table_slots_are_independent() {
        let mut table: ClassMetricTable<u32> = ClassMetricTable::default();
        *table.get_mut(ClassKind::ArcFlash, Metric::ClassArea) = 7;
        assert_eq!(*table.get(ClassKind::ArcFlash, Metric::ClassArea), 7);
        assert_eq!(*table.get(ClassKind::WeldingWire, Metric::ClassArea), 0);
        assert_eq!(table.iter().count(), ClassKind::COUNT * Metric::COUNT);
    }

    #[test]
    fn chart_groups_use_their_titles_as_keys() {
        for group in ChartGroup::ALL {
            let json = serde_json::to_string(&group).unwrap();
            assert_eq!(json, format!("\"{}\"", group.title()));
        }
    }

    #[test]
    fn class_colours_render_as_hex() {
        assert_eq!(ClassKind::SolidificationPool.color_hex(), "#1f77b4");
    }
}
