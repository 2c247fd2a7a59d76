use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Local};

use crate::{
    datasource::source::{MetricKind, MetricSample, Reading, Unit},
    model::statistics::RunningStatistics,
};

/// Statistics of one metric together with the value of the cycle that
/// produced the snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotEntry {
    pub stats: RunningStatistics,
    pub sample: MetricSample,
}

impl fmt::Display for SnapshotEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.sample.kind, self.sample)?;
        let prec = self.sample.unit.precision();
        if let (Some(min), Ok(avg), Some(max)) =
            (self.stats.min(), self.stats.average(), self.stats.max())
        {
            write!(f, " (min {min:.prec$}, avg {avg:.prec$}, max {max:.prec$})")?;
        }
        Ok(())
    }
}

/// Aggregate of one per-core metric family across all cores.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoreSummary {
    pub unit: Unit,
    /// Cores that produced a value this cycle
    pub reporting: usize,
    pub min: f64,
    pub avg: f64,
    pub max: f64,
    /// Extremes over every core for the whole session
    pub session_min: f64,
    pub session_max: f64,
}

impl fmt::Display for CoreSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prec = self.unit.precision();
        write!(
            f,
            "min {:.prec$}, avg {:.prec$}, max {:.prec$} {} over {} core(s) \
             (session {:.prec$} to {:.prec$})",
            self.min,
            self.avg,
            self.max,
            self.unit.symbol(),
            self.reporting,
            self.session_min,
            self.session_max,
        )
    }
}

/// Immutable result of one polling cycle, ordered by metric kind.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    taken_at: DateTime<Local>,
    entries: BTreeMap<MetricKind, SnapshotEntry>,
}

impl Snapshot {
    pub fn new(
        taken_at: DateTime<Local>,
        entries: BTreeMap<MetricKind, SnapshotEntry>,
    ) -> Self {
        Self { taken_at, entries }
    }

    pub fn taken_at(&self) -> DateTime<Local> {
        self.taken_at
    }

    pub fn get(&self, kind: &MetricKind) -> Option<&SnapshotEntry> {
        self.entries.get(kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MetricKind, &SnapshotEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn available(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.sample.value.is_available())
            .count()
    }

    pub fn cpu_frequency_summary(&self) -> Option<CoreSummary> {
        self.summarize(|kind| matches!(kind, MetricKind::CpuFrequency(_)))
    }

    pub fn cpu_temperature_summary(&self) -> Option<CoreSummary> {
        self.summarize(|kind| matches!(kind, MetricKind::CpuTemperature(_)))
    }

    /// None when no matching core reported a value this cycle.
    fn summarize(&self, family: impl Fn(&MetricKind) -> bool) -> Option<CoreSummary> {
        let entries: Vec<&SnapshotEntry> = self
            .entries
            .iter()
            .filter(|(kind, _)| family(*kind))
            .map(|(_, entry)| entry)
            .collect();

        let values: Vec<f64> = entries
            .iter()
            .filter_map(|entry| match entry.sample.value {
                Reading::Value(v) => Some(v),
                Reading::Unavailable => None,
            })
            .collect();
        let first = entries.first()?;
        if values.is_empty() {
            return None;
        }

        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let session_min = entries
            .iter()
            .filter_map(|entry| entry.stats.min())
            .fold(min, f64::min);
        let session_max = entries
            .iter()
            .filter_map(|entry| entry.stats.max())
            .fold(max, f64::max);

        Some(CoreSummary {
            unit: first.sample.unit,
            reporting: values.len(),
            min,
            avg: values.iter().sum::<f64>() / values.len() as f64,
            max,
            session_min,
            session_max,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(kind: MetricKind, history: &[f64], current: Reading) -> (MetricKind, SnapshotEntry) {
        let mut stats = RunningStatistics::new();
        for v in history {
            stats.update(*v);
        }
        let sample = MetricSample::new(kind, current, Local::now());
        (kind, SnapshotEntry { stats, sample })
    }

    #[test]
    fn cpu_frequency_summary_spans_reporting_cores() {
        let entries = BTreeMap::from([
            entry(MetricKind::CpuFrequency(0), &[800.0, 3200.0], Reading::Value(3200.0)),
            entry(MetricKind::CpuFrequency(1), &[4600.0, 1200.0], Reading::Value(1200.0)),
            entry(MetricKind::CpuFrequency(2), &[400.0], Reading::Unavailable),
            entry(MetricKind::CpuTemperature(0), &[55.0], Reading::Value(55.0)),
            entry(MetricKind::Wattage, &[15.0], Reading::Value(15.0)),
        ]);
        let snapshot = Snapshot::new(Local::now(), entries);

        let freq = snapshot.cpu_frequency_summary().unwrap();
        assert_eq!(freq.unit, Unit::Megahertz);
        assert_eq!(freq.reporting, 2);
        assert_eq!((freq.min, freq.avg, freq.max), (1200.0, 2200.0, 3200.0));
        // core 2 is silent this cycle but its history still counts
        assert_eq!((freq.session_min, freq.session_max), (400.0, 4600.0));

        let temp = snapshot.cpu_temperature_summary().unwrap();
        assert_eq!(temp.reporting, 1);
        assert_eq!((temp.min, temp.avg, temp.max), (55.0, 55.0, 55.0));
    }

    #[test]
    fn summary_needs_a_reporting_core() {
        let entries = BTreeMap::from([entry(
            MetricKind::CpuTemperature(0),
            &[40.0],
            Reading::Unavailable,
        )]);
        let snapshot = Snapshot::new(Local::now(), entries);
        assert_eq!(snapshot.cpu_temperature_summary(), None);
        assert_eq!(snapshot.cpu_frequency_summary(), None);
    }

    #[test]
    fn summary_display() {
        let entries = BTreeMap::from([
            entry(MetricKind::CpuFrequency(0), &[1000.0], Reading::Value(1000.0)),
            entry(MetricKind::CpuFrequency(1), &[3000.0], Reading::Value(3000.0)),
        ]);
        let summary = Snapshot::new(Local::now(), entries)
            .cpu_frequency_summary()
            .unwrap();
        assert_eq!(
            summary.to_string(),
            "min 1000.00, avg 2000.00, max 3000.00 MHz over 2 core(s) \
             (session 1000.00 to 3000.00)"
        );
    }

    #[test]
    fn entry_display_includes_stats_once_populated() {
        let now = Local::now();
        let mut stats = RunningStatistics::new();
        let empty = SnapshotEntry {
            stats,
            sample: MetricSample::new(MetricKind::Wattage, Reading::Unavailable, now),
        };
        assert_eq!(empty.to_string(), "CPU package power: Unavailable");

        stats.update(10.0);
        stats.update(20.0);
        let full = SnapshotEntry {
            stats,
            sample: MetricSample::new(MetricKind::Wattage, Reading::Value(20.0), now),
        };
        assert_eq!(
            full.to_string(),
            "CPU package power: 20.00 W (min 10.00, avg 15.00, max 20.00)"
        );
    }
}
